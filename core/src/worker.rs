// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! Worker that drives one counter client through a fixed number of increments.

use std::rc::Rc;

use counterbench_api::CounterResult;
use counterbench_api::Environment;
use serde::Deserialize;
use serde::Serialize;
use tracing::error;
use tracing::warn;

use crate::counter::Counter;
use crate::counter::CounterStats;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct WorkerReport {
    pub worker: usize,
    /// Increments that returned successfully.
    pub completed: u64,
    /// Increments given up on after the worker's own retries.
    pub failed: u64,
    /// Iterations never attempted because the worker aborted.
    pub skipped: u64,
    /// Retryable errors the worker saw from the strategy.
    pub transient_errors: u64,
    pub retries: u64,
    /// Permanent error that stopped the worker early.
    pub aborted: Option<String>,
    /// What the strategy absorbed on its own.
    pub counter: CounterStats,
}

impl WorkerReport {
    /// Increments that did not complete.
    pub fn unresolved(&self) -> u64 {
        self.failed + self.skipped
    }
}

pub struct CounterWorker<C: Counter, E: Environment> {
    id: usize,
    counter: C,
    iterations: u64,
    retry: RetryPolicy,
    env: Rc<E>,
}

impl<C: Counter, E: Environment> CounterWorker<C, E> {
    pub fn new(id: usize, counter: C, iterations: u64, retry: RetryPolicy, env: Rc<E>) -> Self {
        Self {
            id,
            counter,
            iterations,
            retry,
            env,
        }
    }

    /// Runs every iteration. A failed increment is recorded and the worker moves
    /// on; a permanent error stops the worker.
    pub async fn run(mut self) -> WorkerReport {
        let mut report = WorkerReport {
            worker: self.id,
            ..Default::default()
        };
        for iteration in 0..self.iterations {
            match self.increment(&mut report).await {
                Ok(_) => report.completed += 1,
                Err(err) if err.is_permanent() => {
                    error!(worker = self.id, iteration, error = %err, "worker aborted");
                    report.failed += 1;
                    report.skipped = self.iterations - iteration - 1;
                    report.aborted = Some(err.to_string());
                    break;
                }
                Err(err) => {
                    warn!(worker = self.id, iteration, error = %err, "increment failed");
                    report.failed += 1;
                }
            }
        }
        report.counter = self.counter.stats();
        report
    }

    async fn increment(&mut self, report: &mut WorkerReport) -> CounterResult<i64> {
        let mut retrier = self.retry.retrier(self.env.clone());
        loop {
            match self.counter.increment().await {
                Err(err) if err.is_worker_retryable() => {
                    report.transient_errors += 1;
                    retrier.backoff(err).await?;
                    report.retries += 1;
                }
                other => return other,
            }
        }
    }
}
