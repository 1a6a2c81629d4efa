// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::rc::Rc;
use std::time::Duration;

use anyhow::Result;
use counterbench_api::LockConfig;
use counterbench_api::RealEnvironment;
use counterbench_memory::InMemoryCounterStore;
use counterbench_memory::InMemoryStoreConfig;

use super::IntegrationFixture;
use super::StoreTestFixture;

/// The in-memory store on the real clock, driven by a tokio runtime. Database
/// backends provide their own fixtures next to their container setup.
pub struct RealInMemoryStoreFixture {
    store: InMemoryCounterStore<RealEnvironment>,
    env: Rc<RealEnvironment>,
    lock: LockConfig,
}

impl RealInMemoryStoreFixture {
    pub fn new() -> Self {
        let env = Rc::new(RealEnvironment::new());
        let lock = LockConfig {
            acquire_timeout: Duration::from_millis(200),
            ..LockConfig::default()
        };
        let config = InMemoryStoreConfig {
            lock: lock.clone(),
            ..InMemoryStoreConfig::default()
        };
        Self {
            store: InMemoryCounterStore::new(env.clone(), config),
            env,
            lock,
        }
    }
}

impl Default for RealInMemoryStoreFixture {
    fn default() -> Self {
        Self::new()
    }
}

impl StoreTestFixture for RealInMemoryStoreFixture {
    type Env = RealEnvironment;
    type Connector = InMemoryCounterStore<RealEnvironment>;

    fn get_env(&self) -> Rc<Self::Env> {
        self.env.clone()
    }

    fn create_impl(&self) -> Self::Connector {
        self.store.handle()
    }

    fn lock_config(&self) -> LockConfig {
        self.lock.clone()
    }
}

impl IntegrationFixture for RealInMemoryStoreFixture {
    async fn new_async() -> Result<Self> {
        Ok(Self::new())
    }
}
