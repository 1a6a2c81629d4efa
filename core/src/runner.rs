// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::rc::Rc;
use std::time::Duration;

use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::Environment;
use futures::future::join_all;
use tracing::info;

use crate::config::ExperimentConfig;
use crate::config::WorkerSettings;
use crate::counter::Counter;
use crate::counter::CounterFactory;
use crate::counter::CounterStats;
use crate::report::ExperimentReport;
use crate::worker::CounterWorker;
use crate::worker::WorkerReport;

/// Outcome of one experiment. Built once by the runner, read by the reporter.
#[derive(Debug, Clone, PartialEq)]
pub struct ExperimentResult {
    pub config: ExperimentConfig,
    pub final_value: i64,
    pub expected_value: i64,
    pub elapsed: Duration,
    pub workers: Vec<WorkerReport>,
}

impl ExperimentResult {
    pub fn lost_updates(&self) -> i64 {
        self.expected_value - self.final_value
    }

    /// Final value per second of elapsed time; zero when no time elapsed.
    pub fn throughput(&self) -> f64 {
        let seconds = self.elapsed.as_secs_f64();
        if seconds > 0.0 {
            self.final_value as f64 / seconds
        } else {
            0.0
        }
    }

    pub fn report(&self) -> ExperimentReport {
        ExperimentReport {
            final_value: self.final_value,
            expected_value: self.expected_value,
            lost_updates: self.lost_updates(),
            elapsed_seconds: self.elapsed.as_secs_f64(),
            throughput_ops_per_second: self.throughput(),
        }
    }

    pub fn unresolved_failures(&self) -> u64 {
        self.workers.iter().map(WorkerReport::unresolved).sum()
    }

    pub fn counter_stats(&self) -> CounterStats {
        let mut total = CounterStats::default();
        for worker in &self.workers {
            total += worker.counter;
        }
        total
    }
}

/// Resets the counter, runs the workers concurrently, then reads the final value.
pub struct ExperimentRunner<E: Environment> {
    env: Rc<E>,
    settings: WorkerSettings,
}

impl<E: Environment> ExperimentRunner<E> {
    pub fn new(env: Rc<E>, settings: WorkerSettings) -> Self {
        Self { env, settings }
    }

    pub fn env(&self) -> &Rc<E> {
        &self.env
    }

    pub async fn run<F: CounterFactory>(
        &self,
        config: &ExperimentConfig,
        factory: &F,
    ) -> CounterResult<ExperimentResult> {
        config.validate()?;
        if factory.strategy() != config.strategy {
            return Err(CounterError::PermanentFailure(format!(
                "experiment wants {} but the factory builds {}",
                config.strategy,
                factory.strategy()
            )));
        }
        let expected_value = config.expected_final_value()?;

        let mut control = factory.create_counter().await?;
        control.reset().await?;

        let mut workers = Vec::with_capacity(config.workers);
        for id in 0..config.workers {
            workers.push(CounterWorker::new(
                id,
                factory.create_counter().await?,
                config.iterations_per_worker,
                self.settings.retry.clone(),
                self.env.clone(),
            ));
        }

        info!(
            strategy = %config.strategy,
            workers = config.workers,
            iterations_per_worker = config.iterations_per_worker,
            "experiment started"
        );
        let start = self.env.now();
        let reports = join_all(workers.into_iter().map(CounterWorker::run)).await;
        let elapsed = self.env.now().saturating_duration_since(start);

        let final_value = control.get().await?;
        let result = ExperimentResult {
            config: config.clone(),
            final_value,
            expected_value,
            elapsed,
            workers: reports,
        };
        info!(
            strategy = %config.strategy,
            final_value,
            expected_value,
            lost_updates = result.lost_updates(),
            elapsed_ms = elapsed.as_millis() as u64,
            "experiment finished"
        );
        Ok(result)
    }
}
