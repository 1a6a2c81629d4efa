// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::time::Duration;

use counterbench_api::Environment;
use rand::Rng;

/// Per-operation delay, drawn uniformly from `[min, max]` with the environment RNG.
///
/// Every operation goes through [`LatencyModel::pause`], even with a zero model,
/// so concurrent callers always get a chance to interleave.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct LatencyModel {
    pub min: Duration,
    pub max: Duration,
}

impl LatencyModel {
    pub const ZERO: LatencyModel = LatencyModel {
        min: Duration::ZERO,
        max: Duration::ZERO,
    };

    pub fn fixed(latency: Duration) -> Self {
        Self {
            min: latency,
            max: latency,
        }
    }

    pub fn uniform(min: Duration, max: Duration) -> Self {
        Self {
            min: min.min(max),
            max: min.max(max),
        }
    }

    pub fn sample<E: Environment>(&self, env: &E) -> Duration {
        if self.min == self.max {
            return self.min;
        }
        env.with_rng(|rng| rng.gen_range(self.min..=self.max))
    }

    pub async fn pause<E: Environment>(&self, env: &E) {
        env.sleep(self.sample(env)).await;
    }
}
