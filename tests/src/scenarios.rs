// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

pub mod consensus_scenarios;
pub mod sim_only_scenarios;
pub mod store_scenarios;

// Re-export run_test_* functions for use by the gen_test! macro
pub use consensus_scenarios::*;
pub use sim_only_scenarios::*;
pub use store_scenarios::*;
pub use strategy_scenarios::*;
