// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! Behavior every `CounterStore` backend must share, whatever sits behind it.

use std::rc::Rc;

use anyhow::Result;
use counterbench_api::CounterError;
use counterbench_api::CounterSnapshot;
use counterbench_api::CounterStore;
use counterbench_api::Environment;
use counterbench_api::StoreConnector;
use counterbench_core::StoreCounterFactory;
use counterbench_core::StrategyKind;
use counterbench_core::StrategySettings;
use rand::Rng;

use crate::common::helpers::settings;
use crate::fixtures::StoreTestFixture;

fn random_counter_id<E: Environment>(env: &E) -> String {
    format!("counter-{}", env.with_rng(|rng| rng.r#gen::<u32>()))
}

pub async fn run_test_fresh_counter_reads_zero<F: StoreTestFixture>(fixture: &F) -> Result<()> {
    let env = fixture.get_env();
    let mut store = fixture.create_impl().connect().await?;
    let counter_id = random_counter_id(&*env);

    let snapshot = store.read(&counter_id).await?;
    assert_eq!(snapshot, CounterSnapshot::default());
    Ok(())
}

pub async fn run_test_version_check<F: StoreTestFixture>(fixture: &F) -> Result<()> {
    let env = fixture.get_env();
    let connector = fixture.create_impl();
    let mut first = connector.connect().await?;
    let mut second = connector.connect().await?;
    let counter_id = random_counter_id(&*env);

    let seen = first.read(&counter_id).await?;
    assert!(
        second
            .write_if_version_matches(&counter_id, seen.value + 1, seen.version)
            .await?,
        "write against the current version should apply"
    );
    assert!(
        !first
            .write_if_version_matches(&counter_id, seen.value + 1, seen.version)
            .await?,
        "write against a stale version must be refused"
    );

    let current = first.read(&counter_id).await?;
    assert_eq!(current.value, 1);
    assert!(current.version > seen.version);
    assert!(
        first
            .write_if_version_matches(&counter_id, 2, current.version)
            .await?
    );
    assert_eq!(first.read(&counter_id).await?.value, 2);
    Ok(())
}

pub async fn run_test_increment_returns_new_value<F: StoreTestFixture>(fixture: &F) -> Result<()> {
    let env = fixture.get_env();
    let mut store = fixture.create_impl().connect().await?;
    let counter_id = random_counter_id(&*env);
    let increments: i64 = env.with_rng(|rng| rng.gen_range(1..20));

    for expected in 1..=increments {
        assert_eq!(store.increment_in_place(&counter_id).await?, expected);
    }
    let snapshot = store.read(&counter_id).await?;
    assert_eq!(snapshot.value, increments);
    assert_eq!(snapshot.version, increments as u64);
    Ok(())
}

pub async fn run_test_reset<F: StoreTestFixture>(fixture: &F) -> Result<()> {
    let env = fixture.get_env();
    let mut store = fixture.create_impl().connect().await?;
    let counter_id = random_counter_id(&*env);

    store.write_unconditional(&counter_id, 17).await?;
    store.reset(&counter_id).await?;
    let after_first = store.read(&counter_id).await?;
    assert_eq!(after_first.value, 0);

    // Idempotent in value; the version still moves.
    store.reset(&counter_id).await?;
    let after_second = store.read(&counter_id).await?;
    assert_eq!(after_second.value, 0);
    assert!(after_second.version > after_first.version);
    Ok(())
}

pub async fn run_test_lock_excludes_other_handles<F: StoreTestFixture>(fixture: &F) -> Result<()> {
    let env = fixture.get_env();
    let connector = fixture.create_impl();
    let mut holder = connector.connect().await?;
    let mut contender = connector.connect().await?;
    let counter_id = random_counter_id(&*env);

    let token = holder.lock(&counter_id).await?;
    match contender.lock(&counter_id).await {
        Err(CounterError::LockTimeout {
            counter_id: timed_out,
            ..
        }) => assert_eq!(timed_out, counter_id),
        other => anyhow::bail!("second lock should time out, got {other:?}"),
    }

    holder.unlock(token.clone()).await?;
    let next = contender.lock(&counter_id).await?;
    assert!(
        next.fencing > token.fencing,
        "fencing must grow with every grant"
    );
    contender.unlock(next).await?;
    Ok(())
}

pub async fn run_test_serializable_conflict<F: StoreTestFixture>(fixture: &F) -> Result<()> {
    let env = fixture.get_env();
    let connector = fixture.create_impl();
    let mut first = connector.connect().await?;
    let mut second = connector.connect().await?;
    let counter_id = random_counter_id(&*env);
    first.write_unconditional(&counter_id, 10).await?;

    first.begin_serializable().await?;
    second.begin_serializable().await?;
    let a = first.read(&counter_id).await?;
    let b = second.read(&counter_id).await?;
    first.write_unconditional(&counter_id, a.value + 1).await?;
    first.commit().await?;

    // Stores may refuse the stale write itself or only its commit.
    let outcome = async {
        second.write_unconditional(&counter_id, b.value + 1).await?;
        second.commit().await
    }
    .await;
    let err = outcome.expect_err("second committer read a stale value");
    assert!(err.is_transient_conflict(), "unexpected error: {err}");

    // The failed transaction is gone; the handle works normally again.
    second.rollback().await?;
    assert_eq!(second.read(&counter_id).await?.value, 11);
    Ok(())
}

pub async fn run_test_rollback_discards_writes<F: StoreTestFixture>(fixture: &F) -> Result<()> {
    let env = fixture.get_env();
    let mut store = fixture.create_impl().connect().await?;
    let counter_id = random_counter_id(&*env);
    store.write_unconditional(&counter_id, 5).await?;

    store.begin_serializable().await?;
    let snapshot = store.read(&counter_id).await?;
    store
        .write_unconditional(&counter_id, snapshot.value * 100)
        .await?;
    store.rollback().await?;

    assert_eq!(store.read(&counter_id).await?.value, 5);
    Ok(())
}

pub async fn run_test_rejects_bad_counter_ids<F: StoreTestFixture>(fixture: &F) -> Result<()> {
    let env = fixture.get_env();
    let connector = Rc::new(fixture.create_impl());

    for counter_id in [String::new(), "has space".to_string(), "x".repeat(300)] {
        let bad = StrategySettings {
            counter_id,
            ..settings()
        };
        let result = StoreCounterFactory::new(
            connector.clone(),
            StrategyKind::InPlaceAtomic,
            bad,
            env.clone(),
        );
        assert!(matches!(result, Err(CounterError::PermanentFailure(_))));
    }
    Ok(())
}
