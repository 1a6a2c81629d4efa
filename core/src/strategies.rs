// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! The six update disciplines and the factories that bind them to a backend.

mod consensus;
mod in_place;
mod optimistic;
mod pessimistic;
mod serializable;
mod unsynchronized;

use std::rc::Rc;

use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::CounterStore;
use counterbench_api::Environment;
use counterbench_api::RegisterConnector;
use counterbench_api::StoreConnector;
use counterbench_api::validate_counter_id;

pub use self::consensus::ConsensusCounter;
pub use self::in_place::InPlaceCounter;
pub use self::optimistic::OptimisticCounter;
pub use self::pessimistic::PessimisticCounter;
pub use self::serializable::SerializableCounter;
pub use self::unsynchronized::UnsynchronizedCounter;
use crate::config::StrategyKind;
use crate::config::StrategySettings;
use crate::counter::Counter;
use crate::counter::CounterFactory;
use crate::counter::CounterStats;

fn next_value(counter_id: &str, value: i64) -> CounterResult<i64> {
    value
        .checked_add(1)
        .ok_or_else(|| CounterError::PermanentFailure(format!("counter {counter_id} overflow")))
}

/// Any store-backed strategy, picked at configuration time.
pub enum StoreCounter<S: CounterStore, E: Environment> {
    Unsynchronized(UnsynchronizedCounter<S>),
    InPlace(InPlaceCounter<S>),
    Pessimistic(PessimisticCounter<S>),
    Optimistic(OptimisticCounter<S, E>),
    Serializable(SerializableCounter<S, E>),
}

impl<S: CounterStore, E: Environment> StoreCounter<S, E> {
    pub fn new(
        kind: StrategyKind,
        store: S,
        settings: &StrategySettings,
        env: Rc<E>,
    ) -> CounterResult<Self> {
        let counter_id = settings.counter_id.clone();
        let retry = settings.conflict_retry.clone();
        Ok(match kind {
            StrategyKind::Unsynchronized => {
                StoreCounter::Unsynchronized(UnsynchronizedCounter::new(store, counter_id))
            }
            StrategyKind::InPlaceAtomic => StoreCounter::InPlace(InPlaceCounter::new(store, counter_id)),
            StrategyKind::PessimisticLock => {
                StoreCounter::Pessimistic(PessimisticCounter::new(store, counter_id))
            }
            StrategyKind::OptimisticCas => {
                StoreCounter::Optimistic(OptimisticCounter::new(store, counter_id, retry, env))
            }
            StrategyKind::SerializableRetry => {
                StoreCounter::Serializable(SerializableCounter::new(store, counter_id, retry, env))
            }
            StrategyKind::DistributedConsensus => {
                return Err(CounterError::PermanentFailure(
                    "distributed-consensus runs against a consensus register, not a counter store"
                        .to_string(),
                ));
            }
        })
    }
}

impl<S: CounterStore, E: Environment> Counter for StoreCounter<S, E> {
    async fn increment(&mut self) -> CounterResult<i64> {
        match self {
            StoreCounter::Unsynchronized(counter) => counter.increment().await,
            StoreCounter::InPlace(counter) => counter.increment().await,
            StoreCounter::Pessimistic(counter) => counter.increment().await,
            StoreCounter::Optimistic(counter) => counter.increment().await,
            StoreCounter::Serializable(counter) => counter.increment().await,
        }
    }

    async fn get(&mut self) -> CounterResult<i64> {
        match self {
            StoreCounter::Unsynchronized(counter) => counter.get().await,
            StoreCounter::InPlace(counter) => counter.get().await,
            StoreCounter::Pessimistic(counter) => counter.get().await,
            StoreCounter::Optimistic(counter) => counter.get().await,
            StoreCounter::Serializable(counter) => counter.get().await,
        }
    }

    async fn reset(&mut self) -> CounterResult<()> {
        match self {
            StoreCounter::Unsynchronized(counter) => counter.reset().await,
            StoreCounter::InPlace(counter) => counter.reset().await,
            StoreCounter::Pessimistic(counter) => counter.reset().await,
            StoreCounter::Optimistic(counter) => counter.reset().await,
            StoreCounter::Serializable(counter) => counter.reset().await,
        }
    }

    fn stats(&self) -> CounterStats {
        match self {
            StoreCounter::Unsynchronized(counter) => counter.stats(),
            StoreCounter::InPlace(counter) => counter.stats(),
            StoreCounter::Pessimistic(counter) => counter.stats(),
            StoreCounter::Optimistic(counter) => counter.stats(),
            StoreCounter::Serializable(counter) => counter.stats(),
        }
    }
}

/// Opens one store connection per counter client.
pub struct StoreCounterFactory<C: StoreConnector, E: Environment> {
    connector: C,
    kind: StrategyKind,
    settings: StrategySettings,
    env: Rc<E>,
}

impl<C: StoreConnector, E: Environment> StoreCounterFactory<C, E> {
    pub fn new(
        connector: C,
        kind: StrategyKind,
        settings: StrategySettings,
        env: Rc<E>,
    ) -> CounterResult<Self> {
        if !kind.uses_store() {
            return Err(CounterError::PermanentFailure(format!(
                "{kind} cannot run against a counter store"
            )));
        }
        validate_counter_id(&settings.counter_id)?;
        Ok(Self {
            connector,
            kind,
            settings,
            env,
        })
    }
}

impl<C: StoreConnector, E: Environment> CounterFactory for StoreCounterFactory<C, E> {
    type Counter = StoreCounter<C::Store, E>;

    fn strategy(&self) -> StrategyKind {
        self.kind
    }

    async fn create_counter(&self) -> CounterResult<Self::Counter> {
        let store = self.connector.connect().await?;
        StoreCounter::new(self.kind, store, &self.settings, self.env.clone())
    }
}

/// Opens one register session per counter client.
pub struct ConsensusCounterFactory<R: RegisterConnector, E: Environment> {
    connector: R,
    settings: StrategySettings,
    env: Rc<E>,
}

impl<R: RegisterConnector, E: Environment> ConsensusCounterFactory<R, E> {
    pub fn new(connector: R, settings: StrategySettings, env: Rc<E>) -> Self {
        Self {
            connector,
            settings,
            env,
        }
    }
}

impl<R: RegisterConnector, E: Environment> CounterFactory for ConsensusCounterFactory<R, E> {
    type Counter = ConsensusCounter<R::Register, E>;

    fn strategy(&self) -> StrategyKind {
        StrategyKind::DistributedConsensus
    }

    async fn create_counter(&self) -> CounterResult<Self::Counter> {
        let register = self.connector.connect().await?;
        Ok(ConsensusCounter::new(
            register,
            self.settings.consensus_retry.clone(),
            self.env.clone(),
        ))
    }
}
