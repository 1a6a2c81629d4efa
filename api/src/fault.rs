// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::fmt;
use std::future::Future;
use std::str::FromStr;

use serde::Deserialize;
use serde::Serialize;

use crate::error::CounterError;
use crate::error::CounterResult;
use crate::error::ReplicaId;

/// Node failure injected while an experiment is running.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum FaultKind {
    KillFollower,
    KillLeader,
}

impl fmt::Display for FaultKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            FaultKind::KillFollower => write!(f, "kill-follower"),
            FaultKind::KillLeader => write!(f, "kill-leader"),
        }
    }
}

impl FromStr for FaultKind {
    type Err = CounterError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "kill-follower" => Ok(FaultKind::KillFollower),
            "kill-leader" => Ok(FaultKind::KillLeader),
            other => Err(CounterError::PermanentFailure(format!(
                "unknown fault kind: {other}"
            ))),
        }
    }
}

/// What an injector actually did.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultRecord {
    pub kind: FaultKind,
    /// Replica that was killed, when the injector controls the cluster itself.
    pub replica: Option<ReplicaId>,
}

pub trait FaultInjector {
    fn inject(&self, kind: FaultKind) -> impl Future<Output = CounterResult<FaultRecord>>;
}
