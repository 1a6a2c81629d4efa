// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! Bounded retry combinator shared by the strategies and the worker.
//!
//! Retry loops in this crate call into `&mut self` on every attempt, which rules
//! out closure-based combinators such as `tokio_retry::Retry`. Instead a loop
//! owns a [`Retrier`] and hands it each retryable error:
//!
//! ```ignore
//! let mut retrier = policy.retrier(env.clone());
//! loop {
//!     match self.attempt().await {
//!         Err(err) if err.is_transient_conflict() => retrier.backoff(err).await?,
//!         other => return other,
//!     }
//! }
//! ```
//!
//! `backoff` sleeps for the next delay, or fails with `RetryExhausted` carrying
//! the last error once `max_attempts` attempts have been made.

use std::rc::Rc;
use std::time::Duration;

use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::Environment;
use rand::Rng;
use tokio_retry::strategy::ExponentialBackoff;
use tokio_retry::strategy::FixedInterval;
use tracing::debug;

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Backoff {
    /// Retry right away (still yields to other tasks).
    Immediate,
    Fixed(Duration),
    /// Doubling delays starting at `initial`, capped at `max`.
    Exponential { initial: Duration, max: Duration },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RetryPolicy {
    /// Total attempts including the first one. `1` disables retries.
    pub max_attempts: u32,
    pub backoff: Backoff,
    /// Scale every delay by a random factor in `[0.5, 1.0]`.
    pub jitter: bool,
}

impl RetryPolicy {
    /// Version conflicts and serialization failures.
    pub fn conflicts() -> Self {
        Self {
            max_attempts: 1000,
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(1),
                max: Duration::from_millis(32),
            },
            jitter: true,
        }
    }

    /// Leader failover in the consensus-backed counter. Sized to outlast an
    /// election.
    pub fn consensus() -> Self {
        Self {
            max_attempts: 100,
            backoff: Backoff::Exponential {
                initial: Duration::from_millis(10),
                max: Duration::from_millis(500),
            },
            jitter: true,
        }
    }

    /// Whole-increment retries in the worker for unavailability and lock
    /// timeouts.
    pub fn worker() -> Self {
        Self {
            max_attempts: 5,
            backoff: Backoff::Fixed(Duration::from_millis(100)),
            jitter: false,
        }
    }

    pub fn no_retry() -> Self {
        Self {
            max_attempts: 1,
            backoff: Backoff::Immediate,
            jitter: false,
        }
    }

    pub fn with_max_attempts(mut self, max_attempts: u32) -> Self {
        self.max_attempts = max_attempts;
        self
    }

    pub fn with_backoff(mut self, backoff: Backoff) -> Self {
        self.backoff = backoff;
        self
    }

    /// Delays between consecutive attempts, before jitter.
    pub fn delays(&self) -> Box<dyn Iterator<Item = Duration>> {
        let retries = self.max_attempts.saturating_sub(1) as usize;
        match &self.backoff {
            Backoff::Immediate => Box::new(std::iter::repeat(Duration::ZERO).take(retries)),
            Backoff::Fixed(delay) => Box::new(FixedInterval::new(*delay).take(retries)),
            Backoff::Exponential { initial, max } => {
                let (initial, max) = (*initial, *max);
                // ExponentialBackoff yields 2, 4, 8, ... ms; halved, that is the
                // multiplier of `initial` for each retry.
                Box::new(
                    ExponentialBackoff::from_millis(2)
                        .map(move |step| {
                            let multiplier = u32::try_from(step.as_millis() / 2).unwrap_or(u32::MAX);
                            initial.saturating_mul(multiplier).min(max)
                        })
                        .take(retries),
                )
            }
        }
    }

    pub fn retrier<E: Environment>(&self, env: Rc<E>) -> Retrier<E> {
        Retrier {
            env,
            delays: self.delays(),
            jitter: self.jitter,
            attempts: 0,
        }
    }
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self::conflicts()
    }
}

/// State of one retry loop.
pub struct Retrier<E: Environment> {
    env: Rc<E>,
    delays: Box<dyn Iterator<Item = Duration>>,
    jitter: bool,
    attempts: u32,
}

impl<E: Environment> Retrier<E> {
    /// Records a failed attempt, then waits before the next one. Fails with
    /// `RetryExhausted` when no attempts are left.
    pub async fn backoff(&mut self, error: CounterError) -> CounterResult<()> {
        self.attempts += 1;
        let Some(delay) = self.delays.next() else {
            return Err(CounterError::retry_exhausted(self.attempts, error));
        };
        let delay = if self.jitter {
            let scale = self.env.with_rng(|rng| rng.gen_range(0.5..=1.0));
            delay.mul_f64(scale)
        } else {
            delay
        };
        debug!(attempt = self.attempts, ?delay, %error, "retrying");
        self.env.sleep(delay).await;
        Ok(())
    }

    /// Failed attempts recorded so far.
    pub fn attempts(&self) -> u32 {
        self.attempts
    }
}
