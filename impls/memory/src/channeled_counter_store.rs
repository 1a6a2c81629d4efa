// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

//! ChanneledCounterStore: store handles that reach a single backend task over
//! channels.
//!
//! The backend owns the counter state and processes one request at a time, so it
//! behaves like a remote database server: requests from different handles
//! interleave at message boundaries. Shutting the backend down turns every
//! outstanding and future request into `Unavailable`.

use std::cell::Cell;
use std::rc::Rc;

use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::CounterSnapshot;
use counterbench_api::CounterStore;
use counterbench_api::Environment;
use counterbench_api::LockConfig;
use counterbench_api::LockToken;
use counterbench_api::StoreConnector;
use futures::channel::mpsc::UnboundedReceiver;
use futures::channel::mpsc::UnboundedSender;
use futures::channel::mpsc::unbounded;
use futures::channel::oneshot;
use futures::stream::StreamExt;

use crate::in_memory_counter_store::InMemoryStoreConfig;
use crate::in_memory_counter_store_state::InMemoryCounterStoreState;
use crate::in_memory_counter_store_state::SessionId;
use crate::latency::LatencyModel;

type Reply<T> = oneshot::Sender<CounterResult<T>>;

enum Request {
    Read {
        session: SessionId,
        counter_id: String,
        reply: Reply<CounterSnapshot>,
    },
    Write {
        session: SessionId,
        counter_id: String,
        value: i64,
        reply: Reply<()>,
    },
    WriteIfVersionMatches {
        counter_id: String,
        value: i64,
        expected_version: u64,
        reply: Reply<bool>,
    },
    Increment {
        counter_id: String,
        reply: Reply<i64>,
    },
    TryLock {
        session: SessionId,
        counter_id: String,
        reply: Reply<Option<LockToken>>,
    },
    WriteLocked {
        token: LockToken,
        value: i64,
        reply: Reply<()>,
    },
    Unlock {
        token: LockToken,
        reply: Reply<bool>,
    },
    Begin {
        session: SessionId,
        reply: Reply<()>,
    },
    Commit {
        session: SessionId,
        reply: Reply<()>,
    },
    Rollback {
        session: SessionId,
        reply: Reply<()>,
    },
    Reset {
        counter_id: String,
        reply: Reply<()>,
    },
    CloseSession {
        session: SessionId,
    },
    Shutdown,
}

fn backend_gone() -> CounterError {
    CounterError::Unavailable("counter store backend is not running".to_string())
}

/// Frontend handle. Each handle is an independent session.
pub struct ChanneledCounterStore<E: Environment> {
    tx: UnboundedSender<Request>,
    session: SessionId,
    sessions: Rc<Cell<SessionId>>,
    env: Rc<E>,
    lock: Rc<LockConfig>,
}

/// Owns the counter state. Must be spawned (`backend.run()`) for handles to make
/// progress.
pub struct ChanneledCounterStoreBackend<E: Environment> {
    rx: UnboundedReceiver<Request>,
    state: InMemoryCounterStoreState,
    env: Rc<E>,
    lock: Rc<LockConfig>,
    latency: LatencyModel,
}

impl<E: Environment> ChanneledCounterStore<E> {
    pub fn new(env: Rc<E>, config: InMemoryStoreConfig) -> (Self, ChanneledCounterStoreBackend<E>) {
        let (tx, rx) = unbounded();
        let lock = Rc::new(config.lock);
        let frontend = Self {
            tx,
            session: 1,
            sessions: Rc::new(Cell::new(1)),
            env: env.clone(),
            lock: lock.clone(),
        };
        let backend = ChanneledCounterStoreBackend {
            rx,
            state: InMemoryCounterStoreState::new(),
            env,
            lock,
            latency: config.latency,
        };
        (frontend, backend)
    }

    pub fn handle(&self) -> Self {
        let session = self.sessions.get() + 1;
        self.sessions.set(session);
        Self {
            tx: self.tx.clone(),
            session,
            sessions: self.sessions.clone(),
            env: self.env.clone(),
            lock: self.lock.clone(),
        }
    }

    /// Stops the backend after the requests already queued ahead of this one.
    pub fn shutdown(&self) {
        let _ = self.tx.unbounded_send(Request::Shutdown);
    }

    async fn call<T>(&self, request: impl FnOnce(Reply<T>) -> Request) -> CounterResult<T> {
        let (reply, response) = oneshot::channel();
        self.tx
            .unbounded_send(request(reply))
            .map_err(|_| backend_gone())?;
        response.await.unwrap_or_else(|_| Err(backend_gone()))
    }
}

impl<E: Environment> Drop for ChanneledCounterStore<E> {
    fn drop(&mut self) {
        let _ = self.tx.unbounded_send(Request::CloseSession {
            session: self.session,
        });
    }
}

impl<E: Environment> CounterStore for ChanneledCounterStore<E> {
    async fn read(&mut self, counter_id: &str) -> CounterResult<CounterSnapshot> {
        let session = self.session;
        self.call(|reply| Request::Read {
            session,
            counter_id: counter_id.to_string(),
            reply,
        })
        .await
    }

    async fn write_unconditional(&mut self, counter_id: &str, value: i64) -> CounterResult<()> {
        let session = self.session;
        self.call(|reply| Request::Write {
            session,
            counter_id: counter_id.to_string(),
            value,
            reply,
        })
        .await
    }

    async fn write_if_version_matches(
        &mut self,
        counter_id: &str,
        value: i64,
        expected_version: u64,
    ) -> CounterResult<bool> {
        self.call(|reply| Request::WriteIfVersionMatches {
            counter_id: counter_id.to_string(),
            value,
            expected_version,
            reply,
        })
        .await
    }

    async fn increment_in_place(&mut self, counter_id: &str) -> CounterResult<i64> {
        self.call(|reply| Request::Increment {
            counter_id: counter_id.to_string(),
            reply,
        })
        .await
    }

    async fn lock(&mut self, counter_id: &str) -> CounterResult<LockToken> {
        self.lock.validate()?;
        let deadline = self.env.now() + self.lock.acquire_timeout;
        let session = self.session;
        loop {
            let granted = self
                .call(|reply| Request::TryLock {
                    session,
                    counter_id: counter_id.to_string(),
                    reply,
                })
                .await?;
            if let Some(token) = granted {
                return Ok(token);
            }
            if self.env.now() >= deadline {
                return Err(CounterError::LockTimeout {
                    counter_id: counter_id.to_string(),
                    timeout: self.lock.acquire_timeout,
                });
            }
            self.env.sleep(self.lock.retry_interval).await;
        }
    }

    async fn write_locked(&mut self, token: &LockToken, value: i64) -> CounterResult<()> {
        let token = token.clone();
        self.call(|reply| Request::WriteLocked {
            token,
            value,
            reply,
        })
        .await
    }

    async fn unlock(&mut self, token: LockToken) -> CounterResult<()> {
        let counter_id = token.counter_id.clone();
        let released = self.call(|reply| Request::Unlock { token, reply }).await?;
        if !released {
            tracing::warn!(
                session = self.session,
                counter_id = %counter_id,
                "lock lease expired before release"
            );
        }
        Ok(())
    }

    async fn begin_serializable(&mut self) -> CounterResult<()> {
        let session = self.session;
        self.call(|reply| Request::Begin { session, reply }).await
    }

    async fn commit(&mut self) -> CounterResult<()> {
        let session = self.session;
        self.call(|reply| Request::Commit { session, reply }).await
    }

    async fn rollback(&mut self) -> CounterResult<()> {
        let session = self.session;
        self.call(|reply| Request::Rollback { session, reply }).await
    }

    async fn reset(&mut self, counter_id: &str) -> CounterResult<()> {
        self.call(|reply| Request::Reset {
            counter_id: counter_id.to_string(),
            reply,
        })
        .await
    }
}

impl<E: Environment> StoreConnector for ChanneledCounterStore<E> {
    type Store = ChanneledCounterStore<E>;

    async fn connect(&self) -> CounterResult<Self::Store> {
        Ok(self.handle())
    }
}

impl<E: Environment> ChanneledCounterStoreBackend<E> {
    /// Serves requests until every frontend is dropped or one of them calls
    /// `shutdown`.
    pub async fn run(mut self) {
        while let Some(request) = self.rx.next().await {
            if matches!(request, Request::Shutdown) {
                tracing::info!("ChanneledCounterStoreBackend: shutdown requested");
                return;
            }
            self.latency.pause(&*self.env).await;
            self.handle(request);
        }
        tracing::debug!("ChanneledCounterStoreBackend: channel closed, shutting down");
    }

    fn handle(&mut self, request: Request) {
        let state = &mut self.state;
        match request {
            Request::Read {
                session,
                counter_id,
                reply,
            } => {
                let _ = reply.send(Ok(state.read(session, &counter_id)));
            }
            Request::Write {
                session,
                counter_id,
                value,
                reply,
            } => {
                let _ = reply.send(state.write(session, &counter_id, value));
            }
            Request::WriteIfVersionMatches {
                counter_id,
                value,
                expected_version,
                reply,
            } => {
                let _ = reply.send(state.write_if_version_matches(&counter_id, value, expected_version));
            }
            Request::Increment { counter_id, reply } => {
                let _ = reply.send(state.increment(&counter_id));
            }
            Request::TryLock {
                session,
                counter_id,
                reply,
            } => {
                let now = self.env.now();
                let _ = reply.send(Ok(state.try_lock(session, &counter_id, now, self.lock.lease)));
            }
            Request::WriteLocked {
                token,
                value,
                reply,
            } => {
                let _ = reply.send(state.write_locked(&token, value));
            }
            Request::Unlock { token, reply } => {
                let _ = reply.send(Ok(state.unlock(&token)));
            }
            Request::Begin { session, reply } => {
                let _ = reply.send(state.begin(session));
            }
            Request::Commit { session, reply } => {
                let _ = reply.send(state.commit(session));
            }
            Request::Rollback { session, reply } => {
                state.rollback(session);
                let _ = reply.send(Ok(()));
            }
            Request::Reset { counter_id, reply } => {
                let _ = reply.send(state.reset(&counter_id));
            }
            Request::CloseSession { session } => state.close_session(session),
            Request::Shutdown => {}
        }
    }
}
