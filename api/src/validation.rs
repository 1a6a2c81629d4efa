// (c) Meta Platforms, Inc. and affiliates. Confidential and proprietary.

use crate::error::CounterError;
use crate::error::CounterResult;

pub const MIN_COUNTER_ID_LEN: usize = 1;

/// Bounded by the smallest key size among the supported stores.
pub const MAX_COUNTER_ID_LEN: usize = 255;

/// Counter ids end up as SQL parameters and DynamoDB partition keys; keep them to
/// a conservative character set.
pub fn is_valid_counter_id_char(c: char) -> bool {
    c.is_ascii_alphanumeric() || c == '-' || c == '_' || c == '.'
}

pub fn validate_counter_id(counter_id: &str) -> CounterResult<()> {
    let len = counter_id.len();
    if !(MIN_COUNTER_ID_LEN..=MAX_COUNTER_ID_LEN).contains(&len) {
        return Err(CounterError::PermanentFailure(format!(
            "counter id length must be between {} and {} characters, got {}",
            MIN_COUNTER_ID_LEN, MAX_COUNTER_ID_LEN, len
        )));
    }

    if !counter_id.chars().all(is_valid_counter_id_char) {
        return Err(CounterError::PermanentFailure(format!(
            "counter id {counter_id:?} may only contain ASCII alphanumerics, hyphens, underscores and dots"
        )));
    }

    Ok(())
}
