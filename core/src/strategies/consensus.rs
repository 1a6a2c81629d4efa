// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::rc::Rc;

use counterbench_api::ConsensusRegister;
use counterbench_api::CounterResult;
use counterbench_api::Environment;
use counterbench_api::OperationId;
use tracing::warn;

use crate::counter::Counter;
use crate::counter::CounterStats;
use crate::retry::RetryPolicy;

#[derive(Debug, Clone, Copy)]
enum RegisterCall {
    Increment(OperationId),
    Get,
    Set(i64),
}

/// Counter kept in a consensus-replicated register.
///
/// Every increment gets an `OperationId` from this client's session, and each
/// retry resubmits that same id. The register answers a resubmitted id from its
/// session table, so an increment whose first response was lost during failover
/// is still applied exactly once.
///
/// `Unavailable` and `NotLeader` are retried with backoff while the register
/// handle re-routes; they are counted as transient errors.
pub struct ConsensusCounter<R: ConsensusRegister, E: Environment> {
    register: R,
    retry: RetryPolicy,
    env: Rc<E>,
    sequence: u64,
    stats: CounterStats,
}

impl<R: ConsensusRegister, E: Environment> ConsensusCounter<R, E> {
    pub fn new(register: R, retry: RetryPolicy, env: Rc<E>) -> Self {
        Self {
            register,
            retry,
            env,
            sequence: 0,
            stats: CounterStats::default(),
        }
    }

    fn next_operation(&mut self) -> OperationId {
        self.sequence += 1;
        OperationId {
            session: self.register.session(),
            sequence: self.sequence,
        }
    }

    async fn invoke(&mut self, call: RegisterCall) -> CounterResult<i64> {
        let mut retrier = self.retry.retrier(self.env.clone());
        loop {
            let result = match call {
                RegisterCall::Increment(op) => self.register.increment_and_get(op).await,
                RegisterCall::Get => self.register.get().await,
                RegisterCall::Set(value) => self.register.set(value).await.map(|()| value),
            };
            match result {
                Err(err) if err.is_unavailable() => {
                    self.stats.transient_errors += 1;
                    warn!(
                        session = self.register.session(),
                        ?call,
                        error = %err,
                        "consensus call failed, retrying"
                    );
                    retrier.backoff(err).await?;
                    self.stats.retries += 1;
                }
                other => return other,
            }
        }
    }
}

impl<R: ConsensusRegister, E: Environment> Counter for ConsensusCounter<R, E> {
    async fn increment(&mut self) -> CounterResult<i64> {
        let op = self.next_operation();
        self.invoke(RegisterCall::Increment(op)).await
    }

    async fn get(&mut self) -> CounterResult<i64> {
        self.invoke(RegisterCall::Get).await
    }

    async fn reset(&mut self) -> CounterResult<()> {
        self.invoke(RegisterCall::Set(0)).await.map(|_| ())
    }

    fn stats(&self) -> CounterStats {
        self.stats
    }
}
