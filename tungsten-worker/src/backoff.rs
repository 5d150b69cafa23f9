//! Reconnect backoff.

use std::time::Duration;

/// Fixed backoff schedule in seconds, saturating at the last value.
pub const RECONNECT_SCHEDULE_SECS: [u64; 9] = [1, 2, 5, 10, 20, 30, 60, 120, 300];

/// How far past the scheduled delay a retry may land, as a fraction of
/// the delay.
const JITTER_FACTOR: f64 = 0.25;

/// Delay before reconnect attempt `attempt` (0-indexed).
pub fn reconnect_delay(attempt: u32) -> Duration {
    let idx = (attempt as usize).min(RECONNECT_SCHEDULE_SECS.len() - 1);
    Duration::from_secs(RECONNECT_SCHEDULE_SECS[idx])
}

/// Scheduled delay for `attempt`, stretched by a random factor up to
/// [`JITTER_FACTOR`] so a fleet of workers does not retry in lockstep.
pub fn jittered_delay(attempt: u32) -> Duration {
    let stretch = 1.0 + rand::random::<f64>() * JITTER_FACTOR;
    reconnect_delay(attempt).mul_f64(stretch)
}
