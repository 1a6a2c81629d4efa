// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use counterbench_api::CounterError;
use counterbench_api::CounterResult;
use counterbench_api::CounterSnapshot;
use counterbench_api::CounterStore;
use counterbench_api::LockConfig;
use counterbench_api::LockToken;
use counterbench_api::StoreConnector;
use sqlx::Connection;
use sqlx::PgConnection;
use sqlx::Row;
use tracing::info;
use tracing::warn;

use crate::error::LOCK_NOT_AVAILABLE;
use crate::error::map_sqlx_error;
use crate::error::sqlstate;

const CREATE_TABLE: &str = "CREATE TABLE IF NOT EXISTS counters (
    counter_id TEXT PRIMARY KEY,
    value BIGINT NOT NULL DEFAULT 0,
    version BIGINT NOT NULL DEFAULT 0
)";

/// What the connection currently has open. Postgres row locks only live inside
/// a transaction, so holding a lock and a serializable transaction are
/// mutually exclusive on one connection.
#[derive(Debug, Clone, PartialEq, Eq)]
enum OpenTransaction {
    Lock(String),
    Serializable,
}

fn version_of(raw: i64) -> CounterResult<u64> {
    u64::try_from(raw)
        .map_err(|_| CounterError::PermanentFailure(format!("negative version {raw}")))
}

/// One Postgres connection.
///
/// Each handle owns its connection, so every worker gets its own session and
/// its own transaction state.
pub struct PostgresCounterStore {
    conn: PgConnection,
    lock: LockConfig,
    open: Option<OpenTransaction>,
}

impl PostgresCounterStore {
    pub async fn connect(url: &str, lock: LockConfig) -> CounterResult<Self> {
        let conn = PgConnection::connect(url).await.map_err(map_sqlx_error)?;
        Ok(Self {
            conn,
            lock,
            open: None,
        })
    }

    async fn execute_raw(&mut self, sql: &str) -> CounterResult<()> {
        sqlx::raw_sql(sql)
            .execute(&mut self.conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }

    /// Ends whatever is open after an error. A failure here is logged; the
    /// original error is what the caller sees.
    async fn abandon(&mut self) {
        self.open = None;
        if let Err(err) = self.execute_raw("ROLLBACK").await {
            warn!(error = %err, "rollback failed");
        }
    }

    async fn try_lock(&mut self, counter_id: &str) -> Result<LockToken, sqlx::Error> {
        sqlx::raw_sql("BEGIN").execute(&mut self.conn).await?;
        self.open = Some(OpenTransaction::Lock(counter_id.to_string()));
        let set_timeout = format!(
            "SET LOCAL lock_timeout = '{}ms'",
            self.lock.acquire_timeout.as_millis().max(1)
        );
        sqlx::raw_sql(&set_timeout).execute(&mut self.conn).await?;
        let row = sqlx::query(
            "SELECT pg_backend_pid()::BIGINT AS owner, txid_current() AS fencing
             FROM counters WHERE counter_id = $1 FOR UPDATE",
        )
        .bind(counter_id)
        .fetch_one(&mut self.conn)
        .await?;
        let owner: i64 = row.try_get("owner")?;
        let fencing: i64 = row.try_get("fencing")?;
        Ok(LockToken {
            counter_id: counter_id.to_string(),
            owner: owner as u64,
            fencing: fencing as u64,
        })
    }

    /// Rows must exist before `FOR UPDATE` can lock them.
    async fn ensure_row(&mut self, counter_id: &str) -> CounterResult<()> {
        sqlx::query("INSERT INTO counters (counter_id) VALUES ($1) ON CONFLICT (counter_id) DO NOTHING")
            .bind(counter_id)
            .execute(&mut self.conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(())
    }
}

impl CounterStore for PostgresCounterStore {
    async fn read(&mut self, counter_id: &str) -> CounterResult<CounterSnapshot> {
        let row = sqlx::query("SELECT value, version FROM counters WHERE counter_id = $1")
            .bind(counter_id)
            .fetch_optional(&mut self.conn)
            .await
            .map_err(map_sqlx_error)?;
        let Some(row) = row else {
            return Ok(CounterSnapshot::default());
        };
        Ok(CounterSnapshot {
            value: row.try_get("value").map_err(map_sqlx_error)?,
            version: version_of(row.try_get("version").map_err(map_sqlx_error)?)?,
        })
    }

    async fn write_unconditional(&mut self, counter_id: &str, value: i64) -> CounterResult<()> {
        sqlx::query(
            "INSERT INTO counters (counter_id, value, version) VALUES ($1, $2, 1)
             ON CONFLICT (counter_id)
             DO UPDATE SET value = EXCLUDED.value, version = counters.version + 1",
        )
        .bind(counter_id)
        .bind(value)
        .execute(&mut self.conn)
        .await
        .map_err(map_sqlx_error)?;
        Ok(())
    }

    async fn write_if_version_matches(
        &mut self,
        counter_id: &str,
        value: i64,
        expected_version: u64,
    ) -> CounterResult<bool> {
        let expected = i64::try_from(expected_version).map_err(|_| {
            CounterError::PermanentFailure(format!("version {expected_version} out of range"))
        })?;
        // A missing row is version 0, so only that expectation may insert.
        let query = if expected == 0 {
            sqlx::query(
                "INSERT INTO counters (counter_id, value, version) VALUES ($1, $2, 1)
                 ON CONFLICT (counter_id)
                 DO UPDATE SET value = EXCLUDED.value, version = counters.version + 1
                 WHERE counters.version = $3",
            )
        } else {
            sqlx::query(
                "UPDATE counters SET value = $2, version = version + 1
                 WHERE counter_id = $1 AND version = $3",
            )
        };
        let result = query
            .bind(counter_id)
            .bind(value)
            .bind(expected)
            .execute(&mut self.conn)
            .await
            .map_err(map_sqlx_error)?;
        Ok(result.rows_affected() == 1)
    }

    async fn increment_in_place(&mut self, counter_id: &str) -> CounterResult<i64> {
        let row = sqlx::query(
            "INSERT INTO counters (counter_id, value, version) VALUES ($1, 1, 1)
             ON CONFLICT (counter_id)
             DO UPDATE SET value = counters.value + 1, version = counters.version + 1
             RETURNING value",
        )
        .bind(counter_id)
        .fetch_one(&mut self.conn)
        .await
        .map_err(map_sqlx_error)?;
        row.try_get("value").map_err(map_sqlx_error)
    }

    async fn lock(&mut self, counter_id: &str) -> CounterResult<LockToken> {
        self.lock.validate()?;
        if self.open.is_some() {
            return Err(CounterError::PermanentFailure(
                "connection already has an open transaction".to_string(),
            ));
        }
        self.ensure_row(counter_id).await?;
        match self.try_lock(counter_id).await {
            Ok(token) => Ok(token),
            Err(err) => {
                let lock_timed_out = sqlstate(&err).as_deref() == Some(LOCK_NOT_AVAILABLE);
                let mapped = map_sqlx_error(err);
                self.abandon().await;
                if lock_timed_out {
                    Err(CounterError::LockTimeout {
                        counter_id: counter_id.to_string(),
                        timeout: self.lock.acquire_timeout,
                    })
                } else {
                    Err(mapped)
                }
            }
        }
    }

    /// The row lock lives as long as the lock transaction, so the token holds
    /// exactly while that transaction is open on this connection.
    async fn write_locked(&mut self, token: &LockToken, value: i64) -> CounterResult<()> {
        if self.open != Some(OpenTransaction::Lock(token.counter_id.clone())) {
            return Err(CounterError::LockLost {
                counter_id: token.counter_id.clone(),
                fencing: token.fencing,
            });
        }
        let result = sqlx::query(
            "UPDATE counters SET value = $2, version = version + 1 WHERE counter_id = $1",
        )
        .bind(&token.counter_id)
        .bind(value)
        .execute(&mut self.conn)
        .await;
        match result {
            Ok(_) => Ok(()),
            Err(err) => {
                let mapped = map_sqlx_error(err);
                self.abandon().await;
                Err(mapped)
            }
        }
    }

    async fn unlock(&mut self, token: LockToken) -> CounterResult<()> {
        if self.open != Some(OpenTransaction::Lock(token.counter_id.clone())) {
            return Err(CounterError::PermanentFailure(format!(
                "lock on {} is not held by this connection",
                token.counter_id
            )));
        }
        match self.execute_raw("COMMIT").await {
            Ok(()) => {
                self.open = None;
                Ok(())
            }
            Err(err) => {
                self.abandon().await;
                Err(err)
            }
        }
    }

    async fn begin_serializable(&mut self) -> CounterResult<()> {
        if self.open.is_some() {
            return Err(CounterError::PermanentFailure(
                "transaction already open".to_string(),
            ));
        }
        self.execute_raw("BEGIN ISOLATION LEVEL SERIALIZABLE").await?;
        self.open = Some(OpenTransaction::Serializable);
        Ok(())
    }

    async fn commit(&mut self) -> CounterResult<()> {
        if self.open != Some(OpenTransaction::Serializable) {
            return Err(CounterError::PermanentFailure(
                "no open transaction".to_string(),
            ));
        }
        // A failed COMMIT ends the transaction on the server.
        self.open = None;
        self.execute_raw("COMMIT").await
    }

    async fn rollback(&mut self) -> CounterResult<()> {
        if self.open.take().is_none() {
            return Ok(());
        }
        self.execute_raw("ROLLBACK").await
    }

    async fn reset(&mut self, counter_id: &str) -> CounterResult<()> {
        self.write_unconditional(counter_id, 0).await
    }
}

/// Opens one connection per handle against `url`.
#[derive(Debug, Clone)]
pub struct PostgresConnector {
    url: String,
    lock: LockConfig,
}

impl PostgresConnector {
    /// Creates the `counters` table if it does not exist yet.
    pub async fn new(url: String, lock: LockConfig) -> CounterResult<Self> {
        let mut conn = PgConnection::connect(&url).await.map_err(map_sqlx_error)?;
        sqlx::raw_sql(CREATE_TABLE)
            .execute(&mut conn)
            .await
            .map_err(map_sqlx_error)?;
        if let Err(err) = conn.close().await {
            warn!(error = %err, "closing schema connection failed");
        }
        info!("postgres counter schema ready");
        Ok(Self { url, lock })
    }
}

impl StoreConnector for PostgresConnector {
    type Store = PostgresCounterStore;

    async fn connect(&self) -> CounterResult<Self::Store> {
        PostgresCounterStore::connect(&self.url, self.lock.clone()).await
    }
}
