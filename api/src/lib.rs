// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! counterbench API - capability traits shared by strategies and backends
//!
//! - `CounterStore` / `StoreConnector`: the narrow interface to a backing store
//! - `ConsensusRegister` / `RegisterConnector`: the replicated register used by the
//!   distributed strategy
//! - `FaultInjector`: node failures injected by the failure harness
//! - `Environment`: clock, randomness and sleeping, swappable for simulation

pub mod environment;
pub mod error;
pub mod fault;
pub mod register;
pub mod store;
pub mod validation;

pub use environment::Clock;
pub use environment::Environment;
pub use environment::RealClock;
pub use environment::RealEnvironment;
pub use error::CounterError;
pub use error::CounterResult;
pub use error::ReplicaId;
pub use fault::FaultInjector;
pub use fault::FaultKind;
pub use fault::FaultRecord;
pub use register::ConsensusRegister;
pub use register::OperationId;
pub use register::RegisterConnector;
pub use store::CounterSnapshot;
pub use store::CounterStore;
pub use store::LockConfig;
pub use store::LockToken;
pub use store::StoreConnector;
pub use validation::validate_counter_id;
