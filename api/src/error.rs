// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! Error taxonomy shared by stores, registers, strategies and workers.

use std::time::Duration;

use thiserror::Error;

/// Index of a replica inside a consensus cluster.
pub type ReplicaId = usize;

#[derive(Error, Debug, Clone, PartialEq, Eq)]
pub enum CounterError {
    /// Optimistic version mismatch or a serialization failure reported by the store.
    #[error("transient conflict: {0}")]
    TransientConflict(String),
    /// Store, lock service or consensus leader unreachable.
    #[error("unavailable: {0}")]
    Unavailable(String),
    /// The contacted replica is alive but does not lead the current term.
    #[error("replica {replica} is not the leader (leader hint: {leader_hint:?})")]
    NotLeader {
        replica: ReplicaId,
        leader_hint: Option<ReplicaId>,
    },
    #[error("lock on {counter_id} not acquired within {timeout:?}")]
    LockTimeout {
        counter_id: String,
        timeout: Duration,
    },
    /// A write under a lock found the grant gone or handed to someone else.
    /// Nothing was written.
    #[error("lock on {counter_id} (fencing {fencing}) lost before the write")]
    LockLost { counter_id: String, fencing: u64 },
    #[error("gave up after {attempts} attempts: {last_error}")]
    RetryExhausted {
        attempts: u32,
        last_error: Box<CounterError>,
    },
    /// Bad configuration, overflow, missing schema. Never retried.
    #[error("permanent failure: {0}")]
    PermanentFailure(String),
}

pub type CounterResult<T> = std::result::Result<T, CounterError>;

impl CounterError {
    pub fn retry_exhausted(attempts: u32, last_error: CounterError) -> Self {
        CounterError::RetryExhausted {
            attempts,
            last_error: Box::new(last_error),
        }
    }

    pub fn is_transient_conflict(&self) -> bool {
        matches!(self, CounterError::TransientConflict(_))
    }

    /// Leader or store unreachable; the distributed client layer retries these.
    pub fn is_unavailable(&self) -> bool {
        matches!(
            self,
            CounterError::Unavailable(_) | CounterError::NotLeader { .. }
        )
    }

    /// Errors a worker may retry by re-issuing the whole increment.
    pub fn is_worker_retryable(&self) -> bool {
        self.is_unavailable()
            || matches!(
                self,
                CounterError::LockTimeout { .. } | CounterError::LockLost { .. }
            )
    }

    /// Errors that abort the worker instead of being counted as a failed increment.
    pub fn is_permanent(&self) -> bool {
        matches!(self, CounterError::PermanentFailure(_))
    }

    /// The innermost error behind any number of `RetryExhausted` wrappers.
    pub fn root_cause(&self) -> &CounterError {
        match self {
            CounterError::RetryExhausted { last_error, .. } => last_error.root_cause(),
            other => other,
        }
    }
}
