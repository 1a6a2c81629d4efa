// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! Consensus-backed register interface

use std::fmt;
use std::future::Future;

use serde::Deserialize;
use serde::Serialize;

use crate::error::CounterResult;

/// Identity of one logical increment. Retries of the same increment carry the
/// same id so the register can apply it at most once.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct OperationId {
    pub session: u64,
    pub sequence: u64,
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}/{}", self.session, self.sequence)
    }
}

/// Client handle to a replicated register.
///
/// All operations are linearizable when they succeed. A handle may fail with
/// `Unavailable` (replica down, election running, quorum lost) or `NotLeader`
/// (with a hint to the current leader); the handle updates its routing on both
/// so the next attempt goes somewhere more useful.
pub trait ConsensusRegister {
    /// Session this handle stamps into its operation ids. Sequence numbers within
    /// a session must be increasing.
    fn session(&self) -> u64;

    /// Adds one and returns the new value. Re-submitting an `op` that already
    /// committed returns the original result without incrementing again.
    fn increment_and_get(&mut self, op: OperationId) -> impl Future<Output = CounterResult<i64>>;

    fn get(&mut self) -> impl Future<Output = CounterResult<i64>>;

    fn set(&mut self, value: i64) -> impl Future<Output = CounterResult<()>>;
}

/// Hands out register handles, each with its own session.
pub trait RegisterConnector {
    type Register: ConsensusRegister;

    fn connect(&self) -> impl Future<Output = CounterResult<Self::Register>>;
}
