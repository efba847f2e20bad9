//! Retry schedule

use std::time::Duration;

/// Delay after the first failure (seconds)
pub const RETRY_BASE_SECS: u64 = 60;
/// Longest delay between attempts (seconds)
pub const MAX_RETRY_DELAY_SECS: u64 = 3600;

/// Delay before the next attempt of a clip that already failed `retry_count` times
pub fn retry_delay(retry_count: u32) -> Duration {
    let secs = 1u64
        .checked_shl(retry_count)
        .and_then(|factor| RETRY_BASE_SECS.checked_mul(factor))
        .map_or(MAX_RETRY_DELAY_SECS, |secs| secs.min(MAX_RETRY_DELAY_SECS));
    Duration::from_secs(secs)
}
