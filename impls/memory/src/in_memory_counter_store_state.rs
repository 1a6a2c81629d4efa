// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use std::collections::HashMap;
use std::time::Duration;
use std::time::Instant;

use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::CounterSnapshot;
use counterbench_api::LockToken;

pub type SessionId = u64;

#[derive(Debug, Default, Clone, Copy)]
struct CounterRow {
    value: i64,
    version: u64,
}

impl CounterRow {
    fn snapshot(&self) -> CounterSnapshot {
        CounterSnapshot {
            value: self.value,
            version: self.version,
        }
    }

    fn store(&mut self, value: i64) -> CounterResult<()> {
        self.version = self
            .version
            .checked_add(1)
            .ok_or_else(|| CounterError::PermanentFailure("version overflow".to_string()))?;
        self.value = value;
        Ok(())
    }
}

#[derive(Debug)]
struct LockGrant {
    owner: SessionId,
    fencing: u64,
    expires_at: Instant,
}

/// Read set and buffered writes of one open serializable transaction.
#[derive(Debug, Default)]
struct Transaction {
    observed_versions: HashMap<String, u64>,
    pending_writes: HashMap<String, i64>,
}

/// Shared state behind every in-memory store handle.
///
/// Plain synchronous data: handles wrap it in `Rc<RefCell<>>` (or own it behind a
/// channel) and decide where operations yield. Transactions are validated
/// first-committer-wins: a commit fails with `TransientConflict` if any counter it
/// read has been written since.
#[derive(Default)]
pub struct InMemoryCounterStoreState {
    rows: HashMap<String, CounterRow>,
    locks: HashMap<String, LockGrant>,
    transactions: HashMap<SessionId, Transaction>,
    next_session: SessionId,
    next_fencing: u64,
}

impl InMemoryCounterStoreState {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn open_session(&mut self) -> SessionId {
        self.next_session += 1;
        self.next_session
    }

    /// Drops the session's open transaction. Locks it holds stay granted until
    /// their lease runs out, like those of a crashed client.
    pub fn close_session(&mut self, session: SessionId) {
        self.transactions.remove(&session);
    }

    pub fn read(&mut self, session: SessionId, counter_id: &str) -> CounterSnapshot {
        let committed = self.committed(counter_id);
        let Some(tx) = self.transactions.get_mut(&session) else {
            return committed;
        };
        let observed = *tx
            .observed_versions
            .entry(counter_id.to_string())
            .or_insert(committed.version);
        match tx.pending_writes.get(counter_id) {
            Some(value) => CounterSnapshot {
                value: *value,
                version: observed,
            },
            None => committed,
        }
    }

    pub fn write(&mut self, session: SessionId, counter_id: &str, value: i64) -> CounterResult<()> {
        if let Some(tx) = self.transactions.get_mut(&session) {
            tx.pending_writes.insert(counter_id.to_string(), value);
            return Ok(());
        }
        self.rows.entry(counter_id.to_string()).or_default().store(value)
    }

    pub fn write_if_version_matches(
        &mut self,
        counter_id: &str,
        value: i64,
        expected_version: u64,
    ) -> CounterResult<bool> {
        let row = self.rows.entry(counter_id.to_string()).or_default();
        if row.version != expected_version {
            return Ok(false);
        }
        row.store(value)?;
        Ok(true)
    }

    pub fn increment(&mut self, counter_id: &str) -> CounterResult<i64> {
        let row = self.rows.entry(counter_id.to_string()).or_default();
        let next = row
            .value
            .checked_add(1)
            .ok_or_else(|| CounterError::PermanentFailure(format!("counter {counter_id} overflow")))?;
        row.store(next)?;
        Ok(next)
    }

    pub fn reset(&mut self, counter_id: &str) -> CounterResult<()> {
        self.rows.entry(counter_id.to_string()).or_default().store(0)
    }

    /// Grants the lock if it is free or its previous grant has expired.
    pub fn try_lock(
        &mut self,
        session: SessionId,
        counter_id: &str,
        now: Instant,
        lease: Duration,
    ) -> Option<LockToken> {
        if let Some(grant) = self.locks.get(counter_id) {
            if grant.expires_at > now {
                return None;
            }
            tracing::warn!(
                counter_id,
                previous_owner = grant.owner,
                "reclaiming expired lock lease"
            );
        }
        self.next_fencing += 1;
        self.locks.insert(
            counter_id.to_string(),
            LockGrant {
                owner: session,
                fencing: self.next_fencing,
                expires_at: now + lease,
            },
        );
        Some(LockToken {
            counter_id: counter_id.to_string(),
            owner: session,
            fencing: self.next_fencing,
        })
    }

    /// Writes through a lock grant. The write is refused once the grant was
    /// released or reclaimed, whatever its lease says.
    pub fn write_locked(&mut self, token: &LockToken, value: i64) -> CounterResult<()> {
        if !self.holds(token) {
            return Err(CounterError::LockLost {
                counter_id: token.counter_id.clone(),
                fencing: token.fencing,
            });
        }
        self.rows
            .entry(token.counter_id.clone())
            .or_default()
            .store(value)
    }

    fn holds(&self, token: &LockToken) -> bool {
        self.locks
            .get(&token.counter_id)
            .is_some_and(|grant| grant.fencing == token.fencing && grant.owner == token.owner)
    }

    /// Releases the lock. Returns `false` if the token no longer holds it.
    pub fn unlock(&mut self, token: &LockToken) -> bool {
        if !self.holds(token) {
            return false;
        }
        self.locks.remove(&token.counter_id);
        true
    }

    pub fn begin(&mut self, session: SessionId) -> CounterResult<()> {
        if self.transactions.contains_key(&session) {
            return Err(CounterError::PermanentFailure(format!(
                "session {session} already has an open transaction"
            )));
        }
        self.transactions.insert(session, Transaction::default());
        Ok(())
    }

    pub fn commit(&mut self, session: SessionId) -> CounterResult<()> {
        let tx = self.transactions.remove(&session).ok_or_else(|| {
            CounterError::PermanentFailure(format!("session {session} has no open transaction"))
        })?;
        for (counter_id, observed) in &tx.observed_versions {
            if self.committed(counter_id).version != *observed {
                return Err(CounterError::TransientConflict(format!(
                    "could not serialize access to {counter_id} due to concurrent update"
                )));
            }
        }
        for (counter_id, value) in tx.pending_writes {
            self.rows.entry(counter_id).or_default().store(value)?;
        }
        Ok(())
    }

    pub fn rollback(&mut self, session: SessionId) {
        self.transactions.remove(&session);
    }

    fn committed(&self, counter_id: &str) -> CounterSnapshot {
        self.rows
            .get(counter_id)
            .map(CounterRow::snapshot)
            .unwrap_or_default()
    }
}
