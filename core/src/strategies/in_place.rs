// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use counterbench_api::CounterResult;
use counterbench_api::CounterStore;

use crate::counter::Counter;

/// One atomic increment executed by the store. Store faults are returned as is;
/// retrying is the worker's call.
pub struct InPlaceCounter<S: CounterStore> {
    store: S,
    counter_id: String,
}

impl<S: CounterStore> InPlaceCounter<S> {
    pub fn new(store: S, counter_id: impl Into<String>) -> Self {
        Self {
            store,
            counter_id: counter_id.into(),
        }
    }
}

impl<S: CounterStore> Counter for InPlaceCounter<S> {
    async fn increment(&mut self) -> CounterResult<i64> {
        self.store.increment_in_place(&self.counter_id).await
    }

    async fn get(&mut self) -> CounterResult<i64> {
        Ok(self.store.read(&self.counter_id).await?.value)
    }

    async fn reset(&mut self) -> CounterResult<()> {
        self.store.reset(&self.counter_id).await
    }
}
