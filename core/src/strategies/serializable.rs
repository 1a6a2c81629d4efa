// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::rc::Rc;

use counterbench_api::CounterResult;
use counterbench_api::CounterStore;
use counterbench_api::Environment;
use tracing::warn;

use super::next_value;
use crate::counter::Counter;
use crate::counter::CounterStats;
use crate::retry::RetryPolicy;

/// Read and write inside a serializable transaction. A serialization failure
/// at any step rolls back and reruns the whole transaction.
pub struct SerializableCounter<S: CounterStore, E: Environment> {
    store: S,
    counter_id: String,
    retry: RetryPolicy,
    env: Rc<E>,
    stats: CounterStats,
}

impl<S: CounterStore, E: Environment> SerializableCounter<S, E> {
    pub fn new(store: S, counter_id: impl Into<String>, retry: RetryPolicy, env: Rc<E>) -> Self {
        Self {
            store,
            counter_id: counter_id.into(),
            retry,
            env,
            stats: CounterStats::default(),
        }
    }

    async fn attempt(&mut self) -> CounterResult<i64> {
        self.store.begin_serializable().await?;
        let snapshot = self.store.read(&self.counter_id).await?;
        let next = next_value(&self.counter_id, snapshot.value)?;
        self.store.write_unconditional(&self.counter_id, next).await?;
        self.store.commit().await?;
        Ok(next)
    }

    async fn abandon(&mut self) {
        if let Err(err) = self.store.rollback().await {
            warn!(counter_id = %self.counter_id, error = %err, "rollback failed");
        }
    }
}

impl<S: CounterStore, E: Environment> Counter for SerializableCounter<S, E> {
    async fn increment(&mut self) -> CounterResult<i64> {
        let mut retrier = self.retry.retrier(self.env.clone());
        loop {
            let err = match self.attempt().await {
                Ok(value) => return Ok(value),
                Err(err) => err,
            };
            self.abandon().await;
            if !err.is_transient_conflict() {
                return Err(err);
            }
            self.stats.conflicts += 1;
            retrier.backoff(err).await?;
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
