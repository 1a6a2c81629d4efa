// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use counterbench_api::CounterError;

const SERIALIZATION_FAILURE: &str = "40001";
const DEADLOCK_DETECTED: &str = "40P01";
pub(crate) const LOCK_NOT_AVAILABLE: &str = "55P03";
const ADMIN_SHUTDOWN: &str = "57P01";
const CANNOT_CONNECT_NOW: &str = "57P03";

/// Maps a Postgres SQLSTATE to the counter error taxonomy.
///
/// `55P03` is only meaningful with the counter id and timeout in hand, so the
/// lock path checks for it before calling this.
pub fn classify_sqlstate(code: Option<&str>, message: &str) -> CounterError {
    let message = message.to_string();
    match code {
        Some(SERIALIZATION_FAILURE) | Some(DEADLOCK_DETECTED) => {
            CounterError::TransientConflict(message)
        }
        Some(ADMIN_SHUTDOWN) | Some(CANNOT_CONNECT_NOW) => CounterError::Unavailable(message),
        // Class 08: connection exception.
        Some(code) if code.starts_with("08") => CounterError::Unavailable(message),
        _ => CounterError::PermanentFailure(message),
    }
}

pub(crate) fn sqlstate(err: &sqlx::Error) -> Option<String> {
    match err {
        sqlx::Error::Database(db) => db.code().map(|code| code.into_owned()),
        _ => None,
    }
}

pub(crate) fn map_sqlx_error(err: sqlx::Error) -> CounterError {
    match &err {
        sqlx::Error::Database(db) => classify_sqlstate(db.code().as_deref(), db.message()),
        sqlx::Error::Io(_)
        | sqlx::Error::Tls(_)
        | sqlx::Error::PoolTimedOut
        | sqlx::Error::PoolClosed
        | sqlx::Error::WorkerCrashed => CounterError::Unavailable(err.to_string()),
        _ => CounterError::PermanentFailure(err.to_string()),
    }
}
