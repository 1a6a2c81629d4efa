// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use counterbench_api::CounterResult;
use counterbench_api::CounterStore;

use super::next_value;
use crate::counter::Counter;

/// Read, add one, write back. Nothing stops another client from writing between
/// the read and the write, so concurrent increments overwrite each other.
pub struct UnsynchronizedCounter<S: CounterStore> {
    store: S,
    counter_id: String,
}

impl<S: CounterStore> UnsynchronizedCounter<S> {
    pub fn new(store: S, counter_id: impl Into<String>) -> Self {
        Self {
            store,
            counter_id: counter_id.into(),
        }
    }
}

impl<S: CounterStore> Counter for UnsynchronizedCounter<S> {
    async fn increment(&mut self) -> CounterResult<i64> {
        let snapshot = self.store.read(&self.counter_id).await?;
        let next = next_value(&self.counter_id, snapshot.value)?;
        self.store.write_unconditional(&self.counter_id, next).await?;
        Ok(next)
    }

    async fn get(&mut self) -> CounterResult<i64> {
        Ok(self.store.read(&self.counter_id).await?.value)
    }

    async fn reset(&mut self) -> CounterResult<()> {
        self.store.reset(&self.counter_id).await
    }
}
