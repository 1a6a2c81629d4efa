// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::cell::RefCell;
use std::future::Future;
use std::time::Duration;
use std::time::Instant;

use futures::future::Either;
use rand::SeedableRng;
use rand::rngs::StdRng;

/// Source of the current time for lease expiry and elapsed-time measurement.
pub trait Clock {
    fn current_time(&self) -> Instant;
}

/// Monotonic wall clock.
#[derive(Default)]
pub struct RealClock;

impl RealClock {
    pub fn new() -> Self {
        Self
    }
}

impl Clock for RealClock {
    fn current_time(&self) -> Instant {
        Instant::now()
    }
}

/// Everything a strategy, store or worker needs from the outside world: time,
/// randomness and the ability to wait.
///
/// Production code runs against [`RealEnvironment`]; the test simulator provides a
/// deterministic implementation with a logical clock and a seeded RNG, so the same
/// experiment can be replayed interleaving for interleaving.
pub trait Environment {
    type Clock: Clock;

    fn with_rng<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut StdRng) -> R;

    fn with_clock<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Self::Clock) -> R;

    /// Waits for `duration`. A zero duration still yields to other tasks.
    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + 'static;

    fn now(&self) -> Instant {
        self.with_clock(|clock| clock.current_time())
    }
}

/// Production environment backed by tokio timers and an entropy-seeded RNG.
pub struct RealEnvironment {
    rng: RefCell<StdRng>,
    clock: RealClock,
}

impl RealEnvironment {
    pub fn new() -> Self {
        Self {
            rng: RefCell::new(StdRng::from_entropy()),
            clock: RealClock::new(),
        }
    }

    /// Same as [`RealEnvironment::new`] but with a reproducible RNG stream
    /// (latency samples, backoff jitter).
    pub fn with_seed(seed: u64) -> Self {
        Self {
            rng: RefCell::new(StdRng::seed_from_u64(seed)),
            clock: RealClock::new(),
        }
    }
}

impl Default for RealEnvironment {
    fn default() -> Self {
        Self::new()
    }
}

impl Environment for RealEnvironment {
    type Clock = RealClock;

    fn with_rng<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&mut StdRng) -> R,
    {
        f(&mut self.rng.borrow_mut())
    }

    fn with_clock<F, R>(&self, f: F) -> R
    where
        F: FnOnce(&Self::Clock) -> R,
    {
        f(&self.clock)
    }

    fn sleep(&self, duration: Duration) -> impl Future<Output = ()> + 'static {
        if duration.is_zero() {
            Either::Left(tokio::task::yield_now())
        } else {
            Either::Right(tokio::time::sleep(duration))
        }
    }
}
