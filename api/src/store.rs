// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! Counter store capability interface
//!
//! Every non-distributed strategy is written against [`CounterStore`]. A store
//! handle behaves like a single database connection: it owns at most one open
//! transaction and the locks it acquired, and is used by one worker at a time.
//! Fresh handles come from a [`StoreConnector`].

use std::future::Future;
use std::rc::Rc;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;

use crate::error::CounterError;
use crate::error::CounterResult;

/// Committed state of one counter row.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
pub struct CounterSnapshot {
    pub value: i64,
    pub version: u64,
}

/// Proof of an exclusive lock held on one counter.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockToken {
    pub counter_id: String,
    /// Connection that owns the lock.
    pub owner: u64,
    /// Increases with every grant of the same lock.
    pub fencing: u64,
}

/// Parameters of the lock collaborator.
///
/// The lease must outlast the acquire timeout. Otherwise a contender that is
/// still waiting can take over a grant whose holder is alive and mid-update.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LockConfig {
    /// How long `lock` waits before failing with `LockTimeout`.
    pub acquire_timeout: Duration,
    /// How long a grant survives without being released. A holder that dies
    /// loses the lock once its lease runs out.
    pub lease: Duration,
    /// Pause between acquisition attempts while the lock is held elsewhere.
    pub retry_interval: Duration,
}

impl Default for LockConfig {
    fn default() -> Self {
        Self {
            acquire_timeout: Duration::from_secs(5),
            lease: Duration::from_secs(30),
            retry_interval: Duration::from_millis(1),
        }
    }
}

impl LockConfig {
    pub fn validate(&self) -> CounterResult<()> {
        if self.lease <= self.acquire_timeout {
            return Err(CounterError::PermanentFailure(format!(
                "lock lease {:?} must be longer than the acquire timeout {:?}",
                self.lease, self.acquire_timeout
            )));
        }
        Ok(())
    }
}

pub trait CounterStore {
    /// Current committed value and version. A counter that was never written
    /// reads as `(0, 0)`. Inside a serializable transaction the read becomes part
    /// of the transaction's read set.
    fn read(&mut self, counter_id: &str) -> impl Future<Output = CounterResult<CounterSnapshot>>;

    /// Blind write. Advances the version.
    fn write_unconditional(
        &mut self,
        counter_id: &str,
        value: i64,
    ) -> impl Future<Output = CounterResult<()>>;

    /// Writes `value` only if the stored version still equals `expected_version`.
    ///
    /// Returns `Ok(false)` when another writer got there first.
    fn write_if_version_matches(
        &mut self,
        counter_id: &str,
        value: i64,
        expected_version: u64,
    ) -> impl Future<Output = CounterResult<bool>>;

    /// Single atomic server-side increment. Returns the new value.
    fn increment_in_place(&mut self, counter_id: &str) -> impl Future<Output = CounterResult<i64>>;

    /// Acquires the exclusive lock for `counter_id`, waiting at most the
    /// configured acquire timeout. Fails with `PermanentFailure` if the lock
    /// configuration is invalid.
    fn lock(&mut self, counter_id: &str) -> impl Future<Output = CounterResult<LockToken>>;

    /// Writes `value` to the locked counter, but only while `token` is still the
    /// current grant. A lease that was reclaimed by another handle fails with
    /// `LockLost` and leaves the counter untouched.
    fn write_locked(
        &mut self,
        token: &LockToken,
        value: i64,
    ) -> impl Future<Output = CounterResult<()>>;

    fn unlock(&mut self, token: LockToken) -> impl Future<Output = CounterResult<()>>;

    /// Opens a transaction at the strictest isolation level the store offers.
    fn begin_serializable(&mut self) -> impl Future<Output = CounterResult<()>>;

    /// Commits the open transaction. A serialization failure is reported as
    /// `TransientConflict`.
    fn commit(&mut self) -> impl Future<Output = CounterResult<()>>;

    /// Discards the open transaction. A no-op without one.
    fn rollback(&mut self) -> impl Future<Output = CounterResult<()>>;

    /// Sets the value to zero, keeping the counter's identity. Advances the version.
    fn reset(&mut self, counter_id: &str) -> impl Future<Output = CounterResult<()>>;
}

/// Hands out independent store handles, one per worker.
pub trait StoreConnector {
    type Store: CounterStore;

    fn connect(&self) -> impl Future<Output = CounterResult<Self::Store>>;
}

impl<C: StoreConnector> StoreConnector for Rc<C> {
    type Store = C::Store;

    fn connect(&self) -> impl Future<Output = CounterResult<Self::Store>> {
        C::connect(self)
    }
}
