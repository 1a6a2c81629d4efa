// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! Failure injection test macros

/// Macro to generate a single failure injection test
#[macro_export]
macro_rules! fi_test {
    (
        $fixture:ty,
        $prefix:ident,
        $test_name:ident,
        $prob_lost:expr,
        $prob_apply_then_error:expr,
        $prob_error_then_apply:expr,
        $expect_success:expr,
        $expect_applied:expr,
        $expected_error:expr
    ) => {
        paste::paste! {
            #[test]
            fn [<test_ $prefix _fi_ $test_name>]() {
                use $crate::common::fault_config::FaultConfig;
                use $crate::fixtures::StoreTestFixture;
                use $crate::simulator::Simulator;

                let seed: u64 = rand::random();
                let config = FaultConfig {
                    prob_lost: $prob_lost,
                    prob_apply_then_error: $prob_apply_then_error,
                    prob_error_then_apply: $prob_error_then_apply,
                };
                let fixture = <$fixture>::new_with_config(Simulator::new(seed), config);
                let connector = fixture.create_impl();
                let env = fixture.get_env();
                drop(fixture);
                $crate::scenarios::failure_injection_scenarios::run_fault_test(
                    connector,
                    env,
                    /* should_succeed: */ $expect_success,
                    /* should_apply: */ $expect_applied,
                    /* expected_error_msg: */ $expected_error,
                );
            }
        }
    };
}

/// Macro to generate all failure injection tests for a given fixture
#[macro_export]
macro_rules! failure_injection_tests {
    ($fixture:ty, $prefix:ident) => {
        $crate::fi_test!(
            $fixture, $prefix, success, /* prob_lost: */ 0.0,
            /* prob_apply_then_error: */ 0.0, /* prob_error_then_apply: */ 0.0,
            /* expect_success: */ true, /* expect_applied: */ true,
            /* expected_error: */ None
        );
        $crate::fi_test!(
            $fixture,
            $prefix,
            lost_request,
            /* prob_lost: */ 1.0,
            /* prob_apply_then_error: */ 0.0,
            /* prob_error_then_apply: */ 0.0,
            /* expect_success: */ false,
            /* expect_applied: */ false,
            /* expected_error: */ Some("Lost")
        );
        $crate::fi_test!(
            $fixture,
            $prefix,
            apply_then_error,
            /* prob_lost: */ 0.0,
            /* prob_apply_then_error: */ 1.0,
            /* prob_error_then_apply: */ 0.0,
            /* expect_success: */ false,
            /* expect_applied: */ true,
            /* expected_error: */ Some("ApplyThenError")
        );
        $crate::fi_test!(
            $fixture,
            $prefix,
            error_then_apply,
            /* prob_lost: */ 0.0,
            /* prob_apply_then_error: */ 0.0,
            /* prob_error_then_apply: */ 1.0,
            /* expect_success: */ false,
            /* expect_applied: */ true,
            /* expected_error: */ Some("ErrorThenApply")
        );

        paste::paste! {
            #[test]
            fn [<test_ $prefix _fi_permutations>]() {
                use $crate::common::fault_config::FaultConfig;
                use $crate::fixtures::StoreTestFixture;
                use $crate::simulator::Simulator;

                let seed: u64 = rand::random();
                let config = FaultConfig {
                    prob_lost: 0.25,
                    prob_apply_then_error: 0.25,
                    prob_error_then_apply: 0.25,
                };
                let fixture = <$fixture>::new_with_config(Simulator::new(seed), config);
                let connector = fixture.create_impl();
                let env = fixture.get_env();
                drop(fixture);
                $crate::scenarios::failure_injection_scenarios::run_permutations_with_faults_test(
                    connector,
                    env,
                );
            }
        }
    };
}
