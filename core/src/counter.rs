// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::ops::AddAssign;

use counterbench_api::CounterResult;
use serde::Deserialize;
use serde::Serialize;

use crate::config::StrategyKind;

/// Events a strategy absorbed internally while serving its callers.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct CounterStats {
    /// Version mismatches and serialization failures.
    pub conflicts: u64,
    /// Unavailability observed and retried (leader failover).
    pub transient_errors: u64,
    pub retries: u64,
}

impl AddAssign for CounterStats {
    fn add_assign(&mut self, other: Self) {
        self.conflicts += other.conflicts;
        self.transient_errors += other.transient_errors;
        self.retries += other.retries;
    }
}

/// A shared counter as seen by one client. This is the surface the HTTP front end
/// exposes as `/inc`, `/count` and `/reset`.
pub trait Counter {
    /// Adds one and returns the value this increment produced.
    async fn increment(&mut self) -> CounterResult<i64>;

    async fn get(&mut self) -> CounterResult<i64>;

    /// Sets the counter back to zero.
    async fn reset(&mut self) -> CounterResult<()>;

    fn stats(&self) -> CounterStats {
        CounterStats::default()
    }
}

/// Produces one independent counter client per worker, all bound to the same
/// strategy and shared state.
pub trait CounterFactory {
    type Counter: Counter;

    fn strategy(&self) -> StrategyKind;

    async fn create_counter(&self) -> CounterResult<Self::Counter>;
}
