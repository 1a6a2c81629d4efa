// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! In-memory stand-in for a consensus-replicated counter.
//!
//! The cluster models exactly what the distributed strategy can observe from a
//! real consensus product: a leader per term, replicas that die and come back,
//! elections that take time, a majority quorum, and client sessions used to
//! deduplicate retried increments. It does not implement a log or a protocol.
//!
//! Failure behaviour:
//! - a request to a dead replica fails fast with `Unavailable`
//! - a request to a live follower fails with `NotLeader` and a leader hint
//! - while no leader is elected, or without a quorum, requests fail with
//!   `Unavailable`
//! - if the leader dies while an increment is being replicated, the entry
//!   commits or not at random and the client gets `Unavailable` either way

use std::cell::RefCell;
use std::collections::HashMap;
use std::rc::Rc;
use std::time::Duration;
use std::time::Instant;

use counterbench_api::ConsensusRegister;
use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::Environment;
use counterbench_api::FaultInjector;
use counterbench_api::FaultKind;
use counterbench_api::FaultRecord;
use counterbench_api::OperationId;
use counterbench_api::RegisterConnector;
use counterbench_api::ReplicaId;
use rand::Rng;
use tracing::debug;
use tracing::info;
use tracing::warn;

use crate::latency::LatencyModel;

#[derive(Debug, Clone)]
pub struct ClusterConfig {
    pub replicas: usize,
    /// Time between losing a leader and electing the next one.
    pub election_timeout: Duration,
    /// Client to replica round trip.
    pub latency: LatencyModel,
    /// Leader to quorum round trip.
    pub replication_latency: LatencyModel,
    /// Chance that an increment in flight when its leader dies still commits.
    pub commit_on_leader_loss: f64,
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            replicas: 3,
            election_timeout: Duration::from_millis(300),
            latency: LatencyModel::ZERO,
            replication_latency: LatencyModel::fixed(Duration::from_millis(1)),
            commit_on_leader_loss: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy)]
struct AppliedOperation {
    sequence: u64,
    result: i64,
}

struct ClusterState {
    alive: Vec<bool>,
    leader: Option<ReplicaId>,
    term: u64,
    election_deadline: Option<Instant>,
    election_timeout: Duration,
    value: i64,
    /// Last applied increment per client session.
    applied: HashMap<u64, AppliedOperation>,
    next_session: u64,
}

impl ClusterState {
    fn new(replicas: usize, election_timeout: Duration) -> Self {
        Self {
            alive: vec![true; replicas],
            leader: Some(0),
            term: 1,
            election_deadline: None,
            election_timeout,
            value: 0,
            applied: HashMap::new(),
            next_session: 0,
        }
    }

    fn has_quorum(&self) -> bool {
        let alive = self.alive.iter().filter(|alive| **alive).count();
        alive * 2 > self.alive.len()
    }

    /// Completes a pending election once its timeout has passed and a majority is
    /// up. The lowest-numbered live replica wins.
    fn refresh(&mut self, now: Instant) {
        if self.leader.is_some() {
            return;
        }
        let Some(deadline) = self.election_deadline else {
            return;
        };
        if now < deadline || !self.has_quorum() {
            return;
        }
        let Some(winner) = self.alive.iter().position(|alive| *alive) else {
            return;
        };
        self.term += 1;
        self.leader = Some(winner);
        self.election_deadline = None;
        info!(leader = winner, term = self.term, "leader elected");
    }

    /// Checks that `target` can serve a request right now and returns the term it
    /// would be served in.
    fn route(&mut self, target: ReplicaId, now: Instant) -> CounterResult<u64> {
        self.refresh(now);
        if !self.alive.get(target).copied().unwrap_or(false) {
            return Err(CounterError::Unavailable(format!("replica {target} is down")));
        }
        match self.leader {
            None => Err(CounterError::Unavailable(
                "leader election in progress".to_string(),
            )),
            Some(leader) if leader != target => Err(CounterError::NotLeader {
                replica: target,
                leader_hint: Some(leader),
            }),
            Some(_) if !self.has_quorum() => {
                Err(CounterError::Unavailable("quorum lost".to_string()))
            }
            Some(_) => Ok(self.term),
        }
    }

    fn leads(&self, target: ReplicaId, term: u64) -> bool {
        self.leader == Some(target) && self.term == term
    }

    /// Result of `op` if it already committed.
    fn completed(&self, op: OperationId) -> CounterResult<Option<i64>> {
        match self.applied.get(&op.session) {
            Some(applied) if applied.sequence == op.sequence => Ok(Some(applied.result)),
            Some(applied) if applied.sequence > op.sequence => {
                Err(CounterError::PermanentFailure(format!(
                    "operation {op} is older than the last applied sequence {}",
                    applied.sequence
                )))
            }
            _ => Ok(None),
        }
    }

    fn apply_increment(&mut self, op: OperationId) -> CounterResult<i64> {
        if let Some(result) = self.completed(op)? {
            return Ok(result);
        }
        self.value = self
            .value
            .checked_add(1)
            .ok_or_else(|| CounterError::PermanentFailure("counter overflow".to_string()))?;
        self.applied.insert(
            op.session,
            AppliedOperation {
                sequence: op.sequence,
                result: self.value,
            },
        );
        Ok(self.value)
    }

    fn kill(&mut self, replica: ReplicaId, now: Instant) {
        if let Some(alive) = self.alive.get_mut(replica) {
            *alive = false;
        }
        if self.leader == Some(replica) {
            self.leader = None;
            self.election_deadline = Some(now + self.election_timeout);
        }
    }

    fn restart(&mut self, replica: ReplicaId, now: Instant) {
        if let Some(alive) = self.alive.get_mut(replica) {
            *alive = true;
        }
        if self.leader.is_none() && self.election_deadline.is_none() {
            self.election_deadline = Some(now + self.election_timeout);
        }
    }
}

/// Shared handle to the whole cluster. Clones refer to the same cluster.
pub struct InMemoryCluster<E: Environment> {
    state: Rc<RefCell<ClusterState>>,
    env: Rc<E>,
    config: Rc<ClusterConfig>,
}

impl<E: Environment> Clone for InMemoryCluster<E> {
    fn clone(&self) -> Self {
        Self {
            state: self.state.clone(),
            env: self.env.clone(),
            config: self.config.clone(),
        }
    }
}

impl<E: Environment> InMemoryCluster<E> {
    pub fn new(env: Rc<E>, config: ClusterConfig) -> CounterResult<Self> {
        if config.replicas == 0 {
            return Err(CounterError::PermanentFailure(
                "a cluster needs at least one replica".to_string(),
            ));
        }
        Ok(Self {
            state: Rc::new(RefCell::new(ClusterState::new(
                config.replicas,
                config.election_timeout,
            ))),
            env,
            config: Rc::new(config),
        })
    }

    /// A client with a fresh session, initially routed to the current leader.
    pub fn client(&self) -> ClusterClient<E> {
        let mut state = self.state.borrow_mut();
        state.refresh(self.env.now());
        state.next_session += 1;
        ClusterClient {
            cluster: self.clone(),
            target: state.leader.unwrap_or(0),
            session: state.next_session,
        }
    }

    pub fn leader(&self) -> Option<ReplicaId> {
        let mut state = self.state.borrow_mut();
        state.refresh(self.env.now());
        state.leader
    }

    pub fn term(&self) -> u64 {
        self.state.borrow().term
    }

    pub fn replicas(&self) -> usize {
        self.config.replicas
    }

    pub fn is_alive(&self, replica: ReplicaId) -> bool {
        self.state.borrow().alive.get(replica).copied().unwrap_or(false)
    }

    /// Committed value, bypassing routing.
    pub fn committed_value(&self) -> i64 {
        self.state.borrow().value
    }

    pub fn kill(&self, replica: ReplicaId) {
        warn!(replica, "killing replica");
        self.state.borrow_mut().kill(replica, self.env.now());
    }

    pub fn restart(&self, replica: ReplicaId) {
        info!(replica, "restarting replica");
        self.state.borrow_mut().restart(replica, self.env.now());
    }

    async fn increment(&self, target: ReplicaId, op: OperationId) -> CounterResult<i64> {
        self.config.latency.pause(&*self.env).await;
        let term = self.state.borrow_mut().route(target, self.env.now())?;
        if let Some(result) = self.state.borrow().completed(op)? {
            debug!(%op, result, "duplicate increment answered from session table");
            return Ok(result);
        }

        self.config.replication_latency.pause(&*self.env).await;

        let mut state = self.state.borrow_mut();
        if state.leads(target, term) {
            if !state.has_quorum() {
                return Err(CounterError::Unavailable(format!(
                    "quorum lost while replicating {op}"
                )));
            }
            return state.apply_increment(op);
        }
        let p = self.config.commit_on_leader_loss.clamp(0.0, 1.0);
        let committed = self.env.with_rng(|rng| rng.gen_bool(p));
        if committed {
            state.apply_increment(op)?;
        }
        warn!(%op, replica = target, committed, "leader lost while replicating");
        Err(CounterError::Unavailable(format!(
            "replica {target} lost leadership while replicating {op}"
        )))
    }

    async fn get(&self, target: ReplicaId) -> CounterResult<i64> {
        self.config.latency.pause(&*self.env).await;
        self.state.borrow_mut().route(target, self.env.now())?;
        Ok(self.state.borrow().value)
    }

    async fn set(&self, target: ReplicaId, value: i64) -> CounterResult<()> {
        self.config.latency.pause(&*self.env).await;
        let term = self.state.borrow_mut().route(target, self.env.now())?;
        self.config.replication_latency.pause(&*self.env).await;
        let mut state = self.state.borrow_mut();
        if !state.leads(target, term) || !state.has_quorum() {
            return Err(CounterError::Unavailable(format!(
                "replica {target} lost leadership while replicating a write"
            )));
        }
        state.value = value;
        Ok(())
    }
}

impl<E: Environment> RegisterConnector for InMemoryCluster<E> {
    type Register = ClusterClient<E>;

    async fn connect(&self) -> CounterResult<Self::Register> {
        Ok(self.client())
    }
}

impl<E: Environment> FaultInjector for InMemoryCluster<E> {
    async fn inject(&self, kind: FaultKind) -> CounterResult<FaultRecord> {
        let victim = {
            let mut state = self.state.borrow_mut();
            state.refresh(self.env.now());
            match kind {
                FaultKind::KillLeader => state.leader,
                FaultKind::KillFollower => (0..state.alive.len())
                    .find(|replica| state.alive[*replica] && state.leader != Some(*replica)),
            }
        };
        let replica = victim.ok_or_else(|| {
            CounterError::Unavailable(format!("no replica available for {kind}"))
        })?;
        self.kill(replica);
        Ok(FaultRecord {
            kind,
            replica: Some(replica),
        })
    }
}

/// One client session against the cluster.
pub struct ClusterClient<E: Environment> {
    cluster: InMemoryCluster<E>,
    target: ReplicaId,
    session: u64,
}

impl<E: Environment> ClusterClient<E> {
    pub fn target(&self) -> ReplicaId {
        self.target
    }

    /// Follows leader hints and moves away from replicas that did not answer.
    fn reroute(&mut self, err: &CounterError) {
        let next = match err {
            CounterError::NotLeader {
                leader_hint: Some(leader),
                ..
            } => *leader,
            CounterError::Unavailable(_) => (self.target + 1) % self.cluster.replicas(),
            _ => return,
        };
        debug!(session = self.session, from = self.target, to = next, "rerouting");
        self.target = next;
    }

    fn observe<T>(&mut self, result: CounterResult<T>) -> CounterResult<T> {
        if let Err(err) = &result {
            self.reroute(err);
        }
        result
    }
}

impl<E: Environment> ConsensusRegister for ClusterClient<E> {
    fn session(&self) -> u64 {
        self.session
    }

    async fn increment_and_get(&mut self, op: OperationId) -> CounterResult<i64> {
        let result = self.cluster.increment(self.target, op).await;
        self.observe(result)
    }

    async fn get(&mut self) -> CounterResult<i64> {
        let result = self.cluster.get(self.target).await;
        self.observe(result)
    }

    async fn set(&mut self, value: i64) -> CounterResult<()> {
        let result = self.cluster.set(self.target, value).await;
        self.observe(result)
    }
}
