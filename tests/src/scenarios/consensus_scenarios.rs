// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! The consensus-backed counter, with and without node failures.

use std::time::Duration;

use anyhow::Result;
use counterbench_api::FaultInjector;
use counterbench_api::FaultKind;
use counterbench_core::ConsensusCounterFactory;
use counterbench_core::Counter;
use counterbench_core::CounterFactory;
use counterbench_core::ExperimentConfig;
use counterbench_core::ExperimentRunner;
use counterbench_core::FaultPlan;
use counterbench_core::StrategyKind;
use counterbench_core::Verdict;
use counterbench_core::WorkerSettings;

use crate::common::helpers::assert_no_lost_updates;
use crate::common::helpers::settings;
use crate::fixtures::ClusterTestFixture;

fn experiment(workers: usize, iterations: u64) -> ExperimentConfig {
    ExperimentConfig::new(StrategyKind::DistributedConsensus, workers, iterations)
}

pub async fn run_test_consensus_counts_every_increment<F: ClusterTestFixture>(
    fixture: &F,
) -> Result<()> {
    let env = fixture.get_env();
    let factory = ConsensusCounterFactory::new(fixture.create_cluster(), settings(), env.clone());
    let runner = ExperimentRunner::new(env, WorkerSettings::default());

    let result = runner.run(&experiment(4, 30), &factory).await?;
    assert_no_lost_updates(&result);
    assert_eq!(result.counter_stats().transient_errors, 0);
    Ok(())
}

/// Resetting twice leaves the counter at zero both times, and counting resumes
/// from one.
pub async fn run_test_consensus_reset_is_idempotent<F: ClusterTestFixture>(
    fixture: &F,
) -> Result<()> {
    let factory =
        ConsensusCounterFactory::new(fixture.create_cluster(), settings(), fixture.get_env());
    let mut counter = factory.create_counter().await?;
    let mut other = factory.create_counter().await?;
    for _ in 0..5 {
        counter.increment().await?;
    }
    assert_eq!(other.get().await?, 5);

    counter.reset().await?;
    assert_eq!(counter.get().await?, 0);
    assert_eq!(other.get().await?, 0);
    other.reset().await?;
    assert_eq!(counter.get().await?, 0);
    assert_eq!(other.get().await?, 0);

    assert_eq!(counter.increment().await?, 1);
    Ok(())
}

pub async fn run_test_follower_kill_is_invisible<F: ClusterTestFixture>(
    fixture: &F,
) -> Result<()> {
    let env = fixture.get_env();
    let cluster = fixture.create_cluster();
    let factory = ConsensusCounterFactory::new(cluster.clone(), settings(), env.clone());
    let runner = ExperimentRunner::new(env, WorkerSettings::default());
    let plan = FaultPlan::new(
        FaultKind::KillFollower,
        Duration::ZERO,
        Duration::from_millis(5),
    );

    let outcome = runner
        .run_with_fault(&experiment(3, 50), &factory, &cluster, &plan)
        .await?;
    let record = outcome.injected().expect("follower should have been killed");
    assert_eq!(record.kind, FaultKind::KillFollower);
    assert_no_lost_updates(&outcome.result);
    Ok(())
}

pub async fn run_test_leader_kill_fails_over<F: ClusterTestFixture>(fixture: &F) -> Result<()> {
    let env = fixture.get_env();
    let cluster = fixture.create_cluster();
    let factory = ConsensusCounterFactory::new(cluster.clone(), settings(), env.clone());
    let runner = ExperimentRunner::new(env, WorkerSettings::default());
    let plan = FaultPlan::new(
        FaultKind::KillLeader,
        Duration::from_millis(50),
        Duration::from_millis(10),
    );

    let outcome = runner
        .run_with_fault(&experiment(3, 100), &factory, &cluster, &plan)
        .await?;
    assert!(outcome.injected().is_some(), "leader should have been killed");

    let result = &outcome.result;
    assert!(
        result.counter_stats().transient_errors > 0,
        "clients should have noticed the failover"
    );
    // Retried increments carry their operation id, so none is applied twice.
    assert_no_lost_updates(result);
    assert_eq!(
        Verdict::classify(StrategyKind::DistributedConsensus, result),
        Verdict::Pass
    );
    Ok(())
}

pub async fn run_test_fault_after_run_is_skipped<F: ClusterTestFixture>(
    fixture: &F,
) -> Result<()> {
    let env = fixture.get_env();
    let cluster = fixture.create_cluster();
    let factory = ConsensusCounterFactory::new(cluster.clone(), settings(), env.clone());
    let runner = ExperimentRunner::new(env, WorkerSettings::default());
    let plan = FaultPlan::new(
        FaultKind::KillLeader,
        Duration::ZERO,
        Duration::from_secs(3600),
    );

    let outcome = runner
        .run_with_fault(&experiment(2, 5), &factory, &cluster, &plan)
        .await?;
    assert!(outcome.fault.is_none());
    assert_no_lost_updates(&outcome.result);

    // Nothing was killed: a fresh run still has a leader.
    let again = runner.run(&experiment(1, 3), &factory).await?;
    assert_eq!(again.final_value, 3);
    assert_eq!(again.counter_stats().transient_errors, 0);
    Ok(())
}

pub async fn run_test_no_quorum_fails_run<F: ClusterTestFixture>(fixture: &F) -> Result<()> {
    let env = fixture.get_env();
    let cluster = fixture.create_cluster();
    let factory = ConsensusCounterFactory::new(cluster.clone(), settings(), env.clone());
    let runner = ExperimentRunner::new(env, WorkerSettings::default());

    // Kill followers until a majority is gone.
    let mut killed = 0;
    while cluster.inject(FaultKind::KillFollower).await.is_ok() {
        killed += 1;
    }
    assert!(killed > 0);

    let err = runner
        .run(&experiment(1, 2), &factory)
        .await
        .expect_err("no quorum, no counter");
    assert!(
        err.root_cause().is_unavailable(),
        "unexpected error: {err}"
    );
    Ok(())
}
