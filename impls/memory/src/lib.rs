// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! In-memory backends.
//!
//! - `InMemoryCounterStore`: reference `CounterStore` with per-session
//!   transactions and leased locks
//! - `ChanneledCounterStore`: the same store served by a single backend task over
//!   channels, which can be shut down to simulate an outage
//! - `InMemoryCluster`: a replicated counter with leader election, used by the
//!   distributed strategy and as a `FaultInjector`

mod channeled_counter_store;
mod in_memory_cluster;
mod in_memory_counter_store;
mod in_memory_counter_store_state;
mod latency;

pub use channeled_counter_store::ChanneledCounterStore;
pub use channeled_counter_store::ChanneledCounterStoreBackend;
pub use in_memory_cluster::ClusterClient;
pub use in_memory_cluster::ClusterConfig;
pub use in_memory_cluster::InMemoryCluster;
pub use in_memory_counter_store::InMemoryCounterStore;
pub use in_memory_counter_store::InMemoryStoreConfig;
pub use in_memory_counter_store_state::InMemoryCounterStoreState;
pub use in_memory_counter_store_state::SessionId;
pub use latency::LatencyModel;
