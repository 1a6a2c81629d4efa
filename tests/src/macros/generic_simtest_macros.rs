// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! Macros for generating simulator-based test suites

#[macro_export]
macro_rules! gen_test {
    // Tests that accept a fixture.
    // We assume tests:
    //  - use run_test_* naming,
    //  - return Result<T> for some T, and
    //  - are exported from the scenarios module.
    ($test_name:ident, $suffix:ident, $fixture:ty) => {
        paste::paste! {
            #[test]
            fn [<$test_name _ $suffix>]() {
                use $crate::fixtures::SimulatorFixture;
                use rand::Rng;
                let seed: u64 = rand::thread_rng().r#gen();
                let simulator = $crate::simulator::Simulator::new(seed);
                let fixture = <$fixture as SimulatorFixture>::new(simulator);
                let env_rc = fixture.simulator();
                let handle = env_rc.spawn(async move {
                    $crate::scenarios::[<run_ $test_name>](&fixture).await
                });
                env_rc.run();
                $crate::futures::executor::block_on(handle)
                    .expect("Test scenario should complete successfully")
                    .unwrap();
            }
        }
    };
    // Tests that create fixtures internally.
    // Same assumptions as above.
    ($test_name:ident, $suffix:ident, $fixture:ty, no_fixture) => {
        paste::paste! {
            #[test]
            fn [<$test_name _ $suffix>]() {
                $crate::scenarios::[<run_ $test_name>]::<$fixture>().unwrap();
            }
        }
    };
}

/// Generates the simulator-based suite every counter store backend must pass.
///
/// # Usage
/// ```ignore
/// store_tests!(InMemoryStoreFixture, in_memory);
/// ```
///
/// This generates test functions like:
/// - `test_version_check_in_memory`
/// - `test_serializable_conflict_in_memory`
/// - `test_correct_strategies_count_every_increment_in_memory`
#[macro_export]
macro_rules! store_tests {
    ($fixture:ty, $suffix:ident) => {
        $crate::gen_test!(test_fresh_counter_reads_zero, $suffix, $fixture);
        $crate::gen_test!(test_version_check, $suffix, $fixture);
        $crate::gen_test!(test_increment_returns_new_value, $suffix, $fixture);
        $crate::gen_test!(test_reset, $suffix, $fixture);
        $crate::gen_test!(test_lock_excludes_other_handles, $suffix, $fixture);
        $crate::gen_test!(test_serializable_conflict, $suffix, $fixture);
        $crate::gen_test!(test_rollback_discards_writes, $suffix, $fixture);
        $crate::gen_test!(test_rejects_bad_counter_ids, $suffix, $fixture);
        $crate::gen_test!(test_expired_lock_is_reclaimed, $suffix, $fixture);

        $crate::gen_test!(test_correct_strategies_count_every_increment, $suffix, $fixture);
        $crate::gen_test!(test_unsynchronized_single_worker_is_exact, $suffix, $fixture);
        $crate::gen_test!(test_unsynchronized_never_over_counts, $suffix, $fixture);
        $crate::gen_test!(test_get_is_monotonic, $suffix, $fixture);
        $crate::gen_test!(test_experiments_start_from_zero, $suffix, $fixture);
        $crate::gen_test!(test_mismatched_factory_is_refused, $suffix, $fixture);
    };
}

/// Generates the simulator-based suite for a consensus cluster.
///
/// # Usage
/// ```ignore
/// consensus_tests!(ThreeReplicaClusterFixture, three_replicas);
/// ```
#[macro_export]
macro_rules! consensus_tests {
    ($fixture:ty, $suffix:ident) => {
        $crate::gen_test!(test_consensus_counts_every_increment, $suffix, $fixture);
        $crate::gen_test!(test_consensus_reset_is_idempotent, $suffix, $fixture);
        $crate::gen_test!(test_follower_kill_is_invisible, $suffix, $fixture);
        $crate::gen_test!(test_leader_kill_fails_over, $suffix, $fixture);
        $crate::gen_test!(test_fault_after_run_is_skipped, $suffix, $fixture);
        $crate::gen_test!(test_no_quorum_fails_run, $suffix, $fixture);
    };
}
