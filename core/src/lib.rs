// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! counterbench core: counter strategies and the experiment machinery around
//! them.
//!
//! An experiment resets the shared counter, runs N workers concurrently against
//! one strategy, reads the final value and compares it with
//! `workers * iterationsPerWorker`.

pub mod config;
pub mod counter;
pub mod failure;
pub mod logging;
pub mod report;
pub mod retry;
pub mod runner;
pub mod strategies;
pub mod worker;

pub use config::ExperimentConfig;
pub use config::StrategyKind;
pub use config::StrategySettings;
pub use config::WorkerSettings;
pub use counter::Counter;
pub use counter::CounterFactory;
pub use counter::CounterStats;
pub use counterbench_api::CounterError;
pub use counterbench_api::CounterResult;
pub use counterbench_api::Environment;
pub use counterbench_api::RealEnvironment;
pub use failure::FailoverOutcome;
pub use failure::FaultPlan;
pub use failure::ManualFaultInjector;
pub use logging::init_logging;
pub use report::ExperimentReport;
pub use report::ExperimentSummary;
pub use report::Verdict;
pub use retry::Backoff;
pub use retry::Retrier;
pub use retry::RetryPolicy;
pub use runner::ExperimentResult;
pub use runner::ExperimentRunner;
pub use strategies::ConsensusCounterFactory;
pub use strategies::StoreCounter;
pub use strategies::StoreCounterFactory;
pub use worker::CounterWorker;
pub use worker::WorkerReport;
