// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::fmt;
use std::str::FromStr;

use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::validate_counter_id;
use serde::Deserialize;
use serde::Serialize;

use crate::retry::RetryPolicy;

/// Update discipline applied to the shared counter.
#[derive(
    Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, clap::ValueEnum
)]
#[serde(rename_all = "kebab-case")]
pub enum StrategyKind {
    /// Read, then blind write. Loses updates under concurrency.
    Unsynchronized,
    /// One atomic server-side increment.
    InPlaceAtomic,
    /// Exclusive lock around read and write.
    PessimisticLock,
    /// Version-checked write, retried on conflict.
    OptimisticCas,
    /// Serializable transaction, retried on serialization failure.
    SerializableRetry,
    /// Replicated register behind a consensus protocol.
    DistributedConsensus,
}

impl StrategyKind {
    pub const ALL: [StrategyKind; 6] = [
        StrategyKind::Unsynchronized,
        StrategyKind::SerializableRetry,
        StrategyKind::InPlaceAtomic,
        StrategyKind::PessimisticLock,
        StrategyKind::OptimisticCas,
        StrategyKind::DistributedConsensus,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            StrategyKind::Unsynchronized => "unsynchronized",
            StrategyKind::InPlaceAtomic => "in-place-atomic",
            StrategyKind::PessimisticLock => "pessimistic-lock",
            StrategyKind::OptimisticCas => "optimistic-cas",
            StrategyKind::SerializableRetry => "serializable-retry",
            StrategyKind::DistributedConsensus => "distributed-consensus",
        }
    }

    /// Human readable name for summaries.
    pub fn title(&self) -> &'static str {
        match self {
            StrategyKind::Unsynchronized => "Lost update",
            StrategyKind::InPlaceAtomic => "In-place update",
            StrategyKind::PessimisticLock => "Row-level locking",
            StrategyKind::OptimisticCas => "Optimistic concurrency control",
            StrategyKind::SerializableRetry => "Serializable update",
            StrategyKind::DistributedConsensus => "Consensus-backed counter",
        }
    }

    /// Only the unsynchronized baseline may legitimately end below the expected
    /// total.
    pub fn may_lose_updates(&self) -> bool {
        matches!(self, StrategyKind::Unsynchronized)
    }

    /// Whether the strategy runs against a `CounterStore` rather than a
    /// `ConsensusRegister`.
    pub fn uses_store(&self) -> bool {
        !matches!(self, StrategyKind::DistributedConsensus)
    }
}

impl fmt::Display for StrategyKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for StrategyKind {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        StrategyKind::ALL
            .into_iter()
            .find(|kind| kind.as_str() == s)
            .ok_or_else(|| CounterError::PermanentFailure(format!("unknown strategy: {s}")))
    }
}

/// One experiment: a strategy and a fixed amount of concurrent work.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentConfig {
    pub strategy: StrategyKind,
    pub workers: usize,
    pub iterations_per_worker: u64,
}

impl ExperimentConfig {
    pub fn new(strategy: StrategyKind, workers: usize, iterations_per_worker: u64) -> Self {
        Self {
            strategy,
            workers,
            iterations_per_worker,
        }
    }

    pub fn validate(&self) -> CounterResult<()> {
        if self.workers == 0 {
            return Err(CounterError::PermanentFailure(
                "workers must be positive".to_string(),
            ));
        }
        if self.iterations_per_worker == 0 {
            return Err(CounterError::PermanentFailure(
                "iterationsPerWorker must be positive".to_string(),
            ));
        }
        self.expected_final_value().map(|_| ())
    }

    /// `workers * iterationsPerWorker`, for every strategy.
    pub fn expected_final_value(&self) -> CounterResult<i64> {
        i64::try_from(self.workers)
            .ok()
            .zip(i64::try_from(self.iterations_per_worker).ok())
            .and_then(|(workers, iterations)| workers.checked_mul(iterations))
            .ok_or_else(|| {
                CounterError::PermanentFailure(format!(
                    "{} workers x {} iterations overflows the counter",
                    self.workers, self.iterations_per_worker
                ))
            })
    }
}

/// Knobs of the strategy layer.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StrategySettings {
    pub counter_id: String,
    /// Optimistic and serializable retry loops.
    pub conflict_retry: RetryPolicy,
    /// Failover retries of the consensus-backed counter.
    pub consensus_retry: RetryPolicy,
}

impl StrategySettings {
    pub fn new(counter_id: impl Into<String>) -> CounterResult<Self> {
        let counter_id = counter_id.into();
        validate_counter_id(&counter_id)?;
        Ok(Self {
            counter_id,
            ..Default::default()
        })
    }
}

impl Default for StrategySettings {
    fn default() -> Self {
        Self {
            counter_id: "counter".to_string(),
            conflict_retry: RetryPolicy::conflicts(),
            consensus_retry: RetryPolicy::consensus(),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct WorkerSettings {
    /// Applied to `Unavailable`, `NotLeader` and `LockTimeout` surfacing from a
    /// strategy.
    pub retry: RetryPolicy,
}

impl Default for WorkerSettings {
    fn default() -> Self {
        Self {
            retry: RetryPolicy::worker(),
        }
    }
}
