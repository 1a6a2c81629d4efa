// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! Failure injection harness for the consensus-backed counter.
//!
//! The harness waits a warm-up period, starts the experiment, and triggers one
//! node failure `fault_after` into the run while the workers keep going. With
//! [`ManualFaultInjector`] the failure is performed by an operator following the
//! logged instruction; the in-memory cluster performs it itself.

use std::pin::pin;
use std::time::Duration;

use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::Environment;
use counterbench_api::FaultInjector;
use counterbench_api::FaultKind;
use counterbench_api::FaultRecord;
use futures::future::Either;
use futures::future::select;
use serde::Deserialize;
use serde::Serialize;
use tracing::info;
use tracing::warn;

use crate::config::ExperimentConfig;
use crate::counter::CounterFactory;
use crate::runner::ExperimentResult;
use crate::runner::ExperimentRunner;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct FaultPlan {
    pub kind: FaultKind,
    /// Pause before the experiment starts, for the operator to get ready.
    pub startup_delay: Duration,
    /// Delay from the start of the experiment to the fault.
    pub fault_after: Duration,
}

impl FaultPlan {
    pub fn new(kind: FaultKind, startup_delay: Duration, fault_after: Duration) -> Self {
        Self {
            kind,
            startup_delay,
            fault_after,
        }
    }
}

/// Asks a human to kill the node.
#[derive(Debug, Default, Clone, Copy)]
pub struct ManualFaultInjector;

impl FaultInjector for ManualFaultInjector {
    async fn inject(&self, kind: FaultKind) -> CounterResult<FaultRecord> {
        let target = match kind {
            FaultKind::KillLeader => "the LEADER node",
            FaultKind::KillFollower => "a node that is NOT the leader",
        };
        warn!("kill {target} now");
        Ok(FaultRecord {
            kind,
            replica: None,
        })
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct FailoverOutcome {
    pub result: ExperimentResult,
    /// `None` when the experiment finished before the fault was due.
    pub fault: Option<CounterResult<FaultRecord>>,
}

impl FailoverOutcome {
    pub fn injected(&self) -> Option<&FaultRecord> {
        self.fault.as_ref().and_then(|fault| fault.as_ref().ok())
    }

    pub fn injection_error(&self) -> Option<&CounterError> {
        self.fault.as_ref().and_then(|fault| fault.as_ref().err())
    }
}

impl<E: Environment> ExperimentRunner<E> {
    pub async fn run_with_fault<F: CounterFactory, I: FaultInjector>(
        &self,
        config: &ExperimentConfig,
        factory: &F,
        injector: &I,
        plan: &FaultPlan,
    ) -> CounterResult<FailoverOutcome> {
        info!(
            fault = %plan.kind,
            startup_delay_ms = plan.startup_delay.as_millis() as u64,
            fault_after_ms = plan.fault_after.as_millis() as u64,
            "failure test armed"
        );
        self.env().sleep(plan.startup_delay).await;

        let env = self.env().clone();
        let experiment = pin!(self.run(config, factory));
        let fault = pin!(async move {
            env.sleep(plan.fault_after).await;
            injector.inject(plan.kind).await
        });

        match select(experiment, fault).await {
            Either::Left((result, _)) => {
                warn!(fault = %plan.kind, "experiment finished before the fault was injected");
                Ok(FailoverOutcome {
                    result: result?,
                    fault: None,
                })
            }
            Either::Right((fault, experiment)) => {
                match &fault {
                    Ok(record) => info!(fault = %record.kind, replica = ?record.replica, "fault injected"),
                    Err(err) => warn!(error = %err, "fault injection failed"),
                }
                Ok(FailoverOutcome {
                    result: experiment.await?,
                    fault: Some(fault),
                })
            }
        }
    }
}
