// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::cell::RefCell;
use std::rc::Rc;

use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::CounterSnapshot;
use counterbench_api::CounterStore;
use counterbench_api::Environment;
use counterbench_api::LockConfig;
use counterbench_api::LockToken;
use counterbench_api::StoreConnector;
use tracing::debug;

use crate::in_memory_counter_store_state::InMemoryCounterStoreState;
use crate::in_memory_counter_store_state::SessionId;
use crate::latency::LatencyModel;

#[derive(Debug, Clone, Default)]
pub struct InMemoryStoreConfig {
    pub lock: LockConfig,
    pub latency: LatencyModel,
}

/// In-memory reference store.
///
/// Every handle is its own session (connection) over a shared
/// `InMemoryCounterStoreState`. Each operation waits one latency sample before
/// touching the shared state, which is where concurrent workers interleave.
pub struct InMemoryCounterStore<E: Environment> {
    state: Rc<RefCell<InMemoryCounterStoreState>>,
    env: Rc<E>,
    config: Rc<InMemoryStoreConfig>,
    session: SessionId,
}

impl<E: Environment> InMemoryCounterStore<E> {
    pub fn new(env: Rc<E>, config: InMemoryStoreConfig) -> Self {
        let mut state = InMemoryCounterStoreState::new();
        let session = state.open_session();
        Self {
            state: Rc::new(RefCell::new(state)),
            env,
            config: Rc::new(config),
            session,
        }
    }

    /// A new connection to the same store.
    pub fn handle(&self) -> Self {
        let session = self.state.borrow_mut().open_session();
        Self {
            state: self.state.clone(),
            env: self.env.clone(),
            config: self.config.clone(),
            session,
        }
    }

    pub fn session(&self) -> SessionId {
        self.session
    }

    async fn pause(&self) {
        self.config.latency.pause(&*self.env).await;
    }
}

impl<E: Environment> Drop for InMemoryCounterStore<E> {
    fn drop(&mut self) {
        if let Ok(mut state) = self.state.try_borrow_mut() {
            state.close_session(self.session);
        }
    }
}

impl<E: Environment> CounterStore for InMemoryCounterStore<E> {
    async fn read(&mut self, counter_id: &str) -> CounterResult<CounterSnapshot> {
        self.pause().await;
        let snapshot = self.state.borrow_mut().read(self.session, counter_id);
        debug!(session = self.session, counter_id, value = snapshot.value, version = snapshot.version, "read");
        Ok(snapshot)
    }

    async fn write_unconditional(&mut self, counter_id: &str, value: i64) -> CounterResult<()> {
        self.pause().await;
        debug!(session = self.session, counter_id, value, "write");
        self.state.borrow_mut().write(self.session, counter_id, value)
    }

    async fn write_if_version_matches(
        &mut self,
        counter_id: &str,
        value: i64,
        expected_version: u64,
    ) -> CounterResult<bool> {
        self.pause().await;
        let written = self
            .state
            .borrow_mut()
            .write_if_version_matches(counter_id, value, expected_version)?;
        debug!(session = self.session, counter_id, value, expected_version, written, "conditional write");
        Ok(written)
    }

    async fn increment_in_place(&mut self, counter_id: &str) -> CounterResult<i64> {
        self.pause().await;
        self.state.borrow_mut().increment(counter_id)
    }

    async fn lock(&mut self, counter_id: &str) -> CounterResult<LockToken> {
        let lock = &self.config.lock;
        lock.validate()?;
        let deadline = self.env.now() + lock.acquire_timeout;
        loop {
            self.pause().await;
            let now = self.env.now();
            let granted = self
                .state
                .borrow_mut()
                .try_lock(self.session, counter_id, now, lock.lease);
            if let Some(token) = granted {
                debug!(session = self.session, counter_id, fencing = token.fencing, "lock acquired");
                return Ok(token);
            }
            if now >= deadline {
                return Err(CounterError::LockTimeout {
                    counter_id: counter_id.to_string(),
                    timeout: lock.acquire_timeout,
                });
            }
            self.env.sleep(lock.retry_interval).await;
        }
    }

    async fn write_locked(&mut self, token: &LockToken, value: i64) -> CounterResult<()> {
        self.pause().await;
        debug!(session = self.session, counter_id = %token.counter_id, fencing = token.fencing, value, "locked write");
        self.state.borrow_mut().write_locked(token, value)
    }

    async fn unlock(&mut self, token: LockToken) -> CounterResult<()> {
        self.pause().await;
        if !self.state.borrow_mut().unlock(&token) {
            tracing::warn!(
                session = self.session,
                counter_id = %token.counter_id,
                fencing = token.fencing,
                "lock lease expired before release"
            );
        }
        Ok(())
    }

    async fn begin_serializable(&mut self) -> CounterResult<()> {
        self.pause().await;
        self.state.borrow_mut().begin(self.session)
    }

    async fn commit(&mut self) -> CounterResult<()> {
        self.pause().await;
        self.state.borrow_mut().commit(self.session)
    }

    async fn rollback(&mut self) -> CounterResult<()> {
        self.pause().await;
        self.state.borrow_mut().rollback(self.session);
        Ok(())
    }

    async fn reset(&mut self, counter_id: &str) -> CounterResult<()> {
        self.pause().await;
        self.state.borrow_mut().reset(counter_id)
    }
}

impl<E: Environment> StoreConnector for InMemoryCounterStore<E> {
    type Store = InMemoryCounterStore<E>;

    async fn connect(&self) -> CounterResult<Self::Store> {
        Ok(self.handle())
    }
}
