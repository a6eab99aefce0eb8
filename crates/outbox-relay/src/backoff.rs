//! Exponential backoff for failed publishes.

use chrono::{DateTime, Utc};
use outbox_database::max_timestamp;
use std::time::Duration;

/// Delay before the next publish attempt: `base * 2^(attempts - 1)`.
///
/// `attempts` is the count after the failure being scheduled, so the first
/// retry waits `base`. Zero attempts means no delay.
pub fn backoff_delay(base: Duration, attempts: u32) -> Duration {
    if attempts == 0 {
        return Duration::ZERO;
    }
    let shift = attempts.saturating_sub(1);
    let multiplier = 1u32.checked_shl(shift).unwrap_or(u32::MAX);
    base.saturating_mul(multiplier)
}

/// When a row that has now failed `attempts` times becomes eligible again.
///
/// Saturates at the latest storable timestamp.
pub fn next_attempt_at(now: DateTime<Utc>, base: Duration, attempts: u32) -> DateTime<Utc> {
    let delay = backoff_delay(base, attempts);
    chrono::Duration::from_std(delay)
        .ok()
        .and_then(|delay| now.checked_add_signed(delay))
        .map_or_else(max_timestamp, |at| at.min(max_timestamp()))
}
