// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use counterbench_api::CounterResult;
use counterbench_api::CounterStore;
use counterbench_api::LockToken;
use tracing::warn;

use super::next_value;
use crate::counter::Counter;

/// Takes the counter's exclusive lock, then reads and writes under it.
///
/// The write carries the lock token, so a holder whose lease was reclaimed
/// cannot overwrite the new holder's update; it gets `LockLost` instead. The
/// lock is released whatever happens between acquiring and releasing it.
/// `LockTimeout`, `LockLost` and lock-service unavailability are returned to
/// the caller.
pub struct PessimisticCounter<S: CounterStore> {
    store: S,
    counter_id: String,
}

impl<S: CounterStore> PessimisticCounter<S> {
    pub fn new(store: S, counter_id: impl Into<String>) -> Self {
        Self {
            store,
            counter_id: counter_id.into(),
        }
    }

    async fn update_locked(&mut self, token: &LockToken) -> CounterResult<i64> {
        let snapshot = self.store.read(&self.counter_id).await?;
        let next = next_value(&self.counter_id, snapshot.value)?;
        self.store.write_locked(token, next).await?;
        Ok(next)
    }
}

impl<S: CounterStore> Counter for PessimisticCounter<S> {
    async fn increment(&mut self) -> CounterResult<i64> {
        let token = self.store.lock(&self.counter_id).await?;
        let updated = self.update_locked(&token).await;
        let released = self.store.unlock(token).await;
        match (updated, released) {
            (Ok(value), Ok(())) => Ok(value),
            (Ok(_), Err(err)) => Err(err),
            (Err(err), released) => {
                if let Err(unlock_err) = released {
                    warn!(
                        counter_id = %self.counter_id,
                        error = %unlock_err,
                        "failed to release lock after a failed update"
                    );
                }
                Err(err)
            }
        }
    }

    async fn get(&mut self) -> CounterResult<i64> {
        Ok(self.store.read(&self.counter_id).await?.value)
    }

    async fn reset(&mut self) -> CounterResult<()> {
        self.store.reset(&self.counter_id).await
    }
}
