// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::rc::Rc;

use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::CounterStore;
use counterbench_api::Environment;

use super::next_value;
use crate::counter::Counter;
use crate::counter::CounterStats;
use crate::retry::RetryPolicy;

/// Compare-and-set on the row version: read `(value, version)`, write
/// `value + 1` only if the version has not moved, otherwise start over.
pub struct OptimisticCounter<S: CounterStore, E: Environment> {
    store: S,
    counter_id: String,
    retry: RetryPolicy,
    env: Rc<E>,
    stats: CounterStats,
}

impl<S: CounterStore, E: Environment> OptimisticCounter<S, E> {
    pub fn new(store: S, counter_id: impl Into<String>, retry: RetryPolicy, env: Rc<E>) -> Self {
        Self {
            store,
            counter_id: counter_id.into(),
            retry,
            env,
            stats: CounterStats::default(),
        }
    }
}

impl<S: CounterStore, E: Environment> Counter for OptimisticCounter<S, E> {
    async fn increment(&mut self) -> CounterResult<i64> {
        let mut retrier = self.retry.retrier(self.env.clone());
        loop {
            let snapshot = self.store.read(&self.counter_id).await?;
            let next = next_value(&self.counter_id, snapshot.value)?;
            if self
                .store
                .write_if_version_matches(&self.counter_id, next, snapshot.version)
                .await?
            {
                return Ok(next);
            }
            self.stats.conflicts += 1;
            retrier
                .backoff(CounterError::TransientConflict(format!(
                    "{} moved past version {}",
                    self.counter_id, snapshot.version
                )))
                .await?;
            self.stats.retries += 1;
        }
    }

    async fn get(&mut self) -> CounterResult<i64> {
        Ok(self.store.read(&self.counter_id).await?.value)
    }

    async fn reset(&mut self) -> CounterResult<()> {
        self.store.reset(&self.counter_id).await
    }

    fn stats(&self) -> CounterStats {
        self.stats
    }
}
