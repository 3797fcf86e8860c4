//! Exponential backoff schedules for retry operations.

use crate::constants::{MAX_BACKOFF_DELAY_MS, STARTING_BACKOFF_DELAY_MS};
use std::time::Duration;
use tokio_retry::strategy::ExponentialBackoff;

/// Delays between download attempts: `base`, `2 * base`, `4 * base`, ...
/// capped at [`MAX_BACKOFF_DELAY_MS`], yielding at most `retries` delays.
///
/// `ExponentialBackoff` raises its base to the attempt number, so a base of 2
/// with `factor = base / 2` gives a plain doubling sequence.
///
/// ```rust
/// use relkeep::utils::backoff::retry_delays;
/// use std::time::Duration;
///
/// let delays: Vec<_> = retry_delays(Duration::from_millis(100), 3).collect();
/// assert_eq!(
///     delays,
///     vec![Duration::from_millis(100), Duration::from_millis(200), Duration::from_millis(400)]
/// );
/// ```
pub fn retry_delays(base: Duration, retries: u32) -> impl Iterator<Item = Duration> {
    let factor = (base.as_millis() as u64 / 2).max(1);
    ExponentialBackoff::from_millis(2)
        .factor(factor)
        .max_delay(Duration::from_millis(MAX_BACKOFF_DELAY_MS))
        .take(retries as usize)
}

/// Default first retry delay.
pub const fn default_backoff_base() -> Duration {
    Duration::from_millis(STARTING_BACKOFF_DELAY_MS)
}
