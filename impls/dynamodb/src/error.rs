// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use aws_sdk_dynamodb::error::DisplayErrorContext;
use aws_sdk_dynamodb::error::ProvideErrorMetadata;
use aws_sdk_dynamodb::error::SdkError;
use aws_sdk_dynamodb::types::error::TransactionCanceledException;
use counterbench_api::CounterError;

const THROTTLED: &[&str] = &[
    "ThrottlingException",
    "ProvisionedThroughputExceededException",
    "RequestLimitExceeded",
    "LimitExceededException",
];
const SERVER_SIDE: &[&str] = &[
    "InternalServerError",
    "ServiceUnavailable",
    "TransactionInProgressException",
];
const CONFLICTS: &[&str] = &[
    "TransactionConflictException",
    "ConditionalCheckFailedException",
];

/// Per-item cancellation codes that mean "someone else got there first".
const CONFLICT_REASONS: &[&str] = &["ConditionalCheckFailed", "TransactionConflict"];
const THROTTLED_REASONS: &[&str] = &["ThrottlingError", "ProvisionedThroughputExceeded"];
/// Code DynamoDB reports for items that did not cause the cancellation.
const NO_REASON: &str = "None";

/// Maps a DynamoDB error code to the counter error taxonomy.
///
/// Throttling and server-side errors are `Unavailable`. Missing tables,
/// validation and access errors are `PermanentFailure`, so workers abort
/// instead of retrying a misconfiguration.
pub fn classify_service_error(code: Option<&str>, message: &str) -> CounterError {
    let message = message.to_string();
    match code {
        Some(code) if THROTTLED.contains(&code) || SERVER_SIDE.contains(&code) => {
            CounterError::Unavailable(message)
        }
        Some(code) if CONFLICTS.contains(&code) => CounterError::TransientConflict(message),
        Some(_) => CounterError::PermanentFailure(message),
        // The service answered without saying what went wrong.
        None => CounterError::Unavailable(message),
    }
}

pub(crate) fn map_sdk_error<E>(err: SdkError<E>) -> CounterError
where
    E: ProvideErrorMetadata + std::error::Error + 'static,
{
    if let Some(service_err) = err.as_service_error() {
        return classify_service_error(service_err.code(), &service_err.to_string());
    }
    let message = DisplayErrorContext(&err).to_string();
    match err {
        SdkError::ConstructionFailure(_) => CounterError::PermanentFailure(message),
        // Timeouts, dispatch and response failures: the service was not reached
        // or did not answer.
        _ => CounterError::Unavailable(message),
    }
}

fn cancellation_codes(cancelled: &TransactionCanceledException) -> Vec<&str> {
    cancelled
        .cancellation_reasons()
        .iter()
        .filter_map(|reason| reason.code())
        .filter(|code| *code != NO_REASON)
        .collect()
}

/// A cancelled transaction is a conflict only when every item that caused the
/// cancellation failed its condition or collided with another transaction.
pub(crate) fn classify_cancellation(cancelled: &TransactionCanceledException) -> CounterError {
    let message = cancelled.to_string();
    let codes = cancellation_codes(cancelled);
    if codes.is_empty() {
        return CounterError::Unavailable(message);
    }
    if codes.iter().all(|code| CONFLICT_REASONS.contains(code)) {
        return CounterError::TransientConflict(message);
    }
    if codes
        .iter()
        .all(|code| CONFLICT_REASONS.contains(code) || THROTTLED_REASONS.contains(code))
    {
        return CounterError::Unavailable(message);
    }
    CounterError::PermanentFailure(message)
}

/// Whether the item at `index` of a cancelled transaction failed its condition.
pub(crate) fn condition_failed_at(cancelled: &TransactionCanceledException, index: usize) -> bool {
    cancelled
        .cancellation_reasons()
        .get(index)
        .and_then(|reason| reason.code())
        == Some("ConditionalCheckFailed")
}
