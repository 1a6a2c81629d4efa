// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::fmt;

use serde::Deserialize;
use serde::Serialize;

use crate::config::ExperimentConfig;
use crate::config::StrategyKind;
use crate::runner::ExperimentResult;

/// Metrics every experiment emits, with exactly these keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentReport {
    pub final_value: i64,
    pub expected_value: i64,
    pub lost_updates: i64,
    pub elapsed_seconds: f64,
    pub throughput_ops_per_second: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Verdict {
    /// Final value matches the expected total.
    Pass,
    /// Updates lost by a strategy that does not prevent it.
    ExpectedLoss,
    /// Mismatch explained by increments that failed after all retries, or that a
    /// worker re-issued after an ambiguous failure.
    UnresolvedFaults,
    /// Mismatch no reported fault explains.
    Violation,
}

impl Verdict {
    pub fn classify(strategy: StrategyKind, result: &ExperimentResult) -> Self {
        let lost = result.lost_updates();
        if lost == 0 {
            return Verdict::Pass;
        }
        if lost > 0 && strategy.may_lose_updates() {
            return Verdict::ExpectedLoss;
        }
        let unresolved = result.unresolved_failures();
        let worker_retries: u64 = result.workers.iter().map(|w| w.retries).sum();
        let explained = if lost > 0 {
            lost.unsigned_abs() <= unresolved
        } else {
            lost.unsigned_abs() <= worker_retries
        };
        if explained {
            Verdict::UnresolvedFaults
        } else {
            Verdict::Violation
        }
    }

    pub fn passed(&self) -> bool {
        matches!(self, Verdict::Pass)
    }
}

impl fmt::Display for Verdict {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Verdict::Pass => f.write_str("PASS"),
            Verdict::ExpectedLoss => f.write_str("FAIL (lost updates)"),
            Verdict::UnresolvedFaults => f.write_str("FAIL (unresolved faults)"),
            Verdict::Violation => f.write_str("FAIL (violation)"),
        }
    }
}

/// Everything known about one experiment, for tables and JSON output.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ExperimentSummary {
    pub strategy: StrategyKind,
    pub config: ExperimentConfig,
    pub report: ExperimentReport,
    pub verdict: Verdict,
    pub conflicts: u64,
    pub transient_errors: u64,
    pub retries: u64,
    pub unresolved_failures: u64,
    pub aborted_workers: usize,
}

impl ExperimentSummary {
    pub fn new(result: &ExperimentResult) -> Self {
        let stats = result.counter_stats();
        let worker_transient: u64 = result.workers.iter().map(|w| w.transient_errors).sum();
        let worker_retries: u64 = result.workers.iter().map(|w| w.retries).sum();
        Self {
            strategy: result.config.strategy,
            config: result.config.clone(),
            report: result.report(),
            verdict: Verdict::classify(result.config.strategy, result),
            conflicts: stats.conflicts,
            transient_errors: stats.transient_errors + worker_transient,
            retries: stats.retries + worker_retries,
            unresolved_failures: result.unresolved_failures(),
            aborted_workers: result.workers.iter().filter(|w| w.aborted.is_some()).count(),
        }
    }
}
