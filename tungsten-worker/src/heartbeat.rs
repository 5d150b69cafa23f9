//! Heartbeat bookkeeping.
//!
//! The worker probes with `WORKER_HEARTBEAT` and the gateway replies with
//! `GATEWAY_HEARTBEAT`. The tracker counts unreplied probes; two pending
//! before the next send means the connection is declared broken.

use parking_lot::RwLock;
use std::sync::atomic::{AtomicU32, AtomicU64, Ordering};
use std::time::{Duration, Instant};

/// How many unreplied worker heartbeats mark a connection as broken.
pub const MAX_PENDING_HEARTBEATS: u32 = 2;

/// Tracks heartbeat liveness for one connection.
#[derive(Debug)]
pub struct HeartbeatTracker {
    interval_ms: AtomicU64,
    pending: AtomicU32,
    last_gateway_beat: RwLock<Option<Instant>>,
}

impl HeartbeatTracker {
    pub fn new(interval: Duration) -> Self {
        Self {
            interval_ms: AtomicU64::new(interval.as_millis() as u64),
            pending: AtomicU32::new(0),
            last_gateway_beat: RwLock::new(None),
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::from_millis(self.interval_ms.load(Ordering::Acquire))
    }

    pub fn set_interval(&self, interval: Duration) {
        self.interval_ms
            .store(interval.as_millis() as u64, Ordering::Release);
    }

    /// A `GATEWAY_HEARTBEAT` arrived; all outstanding probes are answered.
    pub fn record_gateway_beat(&self) {
        self.pending.store(0, Ordering::SeqCst);
        *self.last_gateway_beat.write() = Some(Instant::now());
    }

    /// Count one outgoing `WORKER_HEARTBEAT`.
    pub fn mark_sent(&self) {
        self.pending.fetch_add(1, Ordering::SeqCst);
    }

    /// Number of unreplied worker heartbeats.
    pub fn pending(&self) -> u32 {
        self.pending.load(Ordering::SeqCst)
    }

    /// Whether the connection must be declared broken instead of sending
    /// another probe.
    pub fn is_stale(&self) -> bool {
        self.pending() >= MAX_PENDING_HEARTBEATS
    }

    /// When the gateway last replied, if it ever has on this connection.
    pub fn last_gateway_beat(&self) -> Option<Instant> {
        *self.last_gateway_beat.read()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_gateway_beat_resets_pending() {
        let tracker = HeartbeatTracker::new(Duration::from_secs(10));
        tracker.mark_sent();
        tracker.mark_sent();
        assert_eq!(tracker.pending(), 2);
        assert!(tracker.is_stale());

        tracker.record_gateway_beat();
        assert_eq!(tracker.pending(), 0);
        assert!(!tracker.is_stale());
        assert!(tracker.last_gateway_beat().is_some());
    }

    #[test]
    fn test_stale_after_two_unreplied() {
        let tracker = HeartbeatTracker::new(Duration::from_secs(10));
        assert!(!tracker.is_stale());
        tracker.mark_sent();
        assert!(!tracker.is_stale());
        tracker.mark_sent();
        assert!(tracker.is_stale());
    }

    #[test]
    fn test_interval_update() {
        let tracker = HeartbeatTracker::new(Duration::from_secs(10));
        tracker.set_interval(Duration::from_secs(3));
        assert_eq!(tracker.interval(), Duration::from_secs(3));
    }
}
