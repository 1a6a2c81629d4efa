// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! Common test fixtures for counter backends

use std::future::Future;
use std::rc::Rc;

use anyhow::Result;
use counterbench_api::Environment;
use counterbench_api::FaultInjector;
use counterbench_api::LockConfig;
use counterbench_api::RegisterConnector;
use counterbench_api::StoreConnector;

use crate::simulator::Simulator;

/// How to create test fixtures for a counter store backend.
/// Implement this trait for each backend you want to test.
///
/// The fixture owns the shared state (in-memory tables, a channel backend, a
/// database container) and hands out connectors that all reach that same state.
pub trait StoreTestFixture: Sized {
    type Env: Environment + 'static;

    type Connector: StoreConnector + 'static;

    fn get_env(&self) -> Rc<Self::Env>;

    /// A connector whose handles all share this fixture's state.
    fn create_impl(&self) -> Self::Connector;

    /// Lock settings the fixture's stores were built with.
    fn lock_config(&self) -> LockConfig {
        LockConfig::default()
    }
}

/// How to create test fixtures for a consensus-backed counter service.
pub trait ClusterTestFixture: Sized {
    type Env: Environment + 'static;

    type Cluster: RegisterConnector + FaultInjector + Clone + 'static;

    fn get_env(&self) -> Rc<Self::Env>;

    fn create_cluster(&self) -> Self::Cluster;
}

/// Construction trait for fixtures that run inside a Simulator
pub trait SimulatorFixture: Sized {
    fn new(simulator: Simulator) -> Self;

    fn simulator(&self) -> Rc<Simulator>;
}

/// Construction trait for fixtures that require async initialization
pub trait IntegrationFixture: Sized {
    fn new_async() -> impl Future<Output = Result<Self>>;
}

pub mod integration;
