//! Worker metrics collection.
//!
//! Observable counters for monitoring connection stability, request
//! throughput, and delivery outcomes.

use std::sync::atomic::{AtomicU64, Ordering};

/// Counters for one worker.
#[derive(Debug, Default)]
pub struct WorkerMetrics {
    /// Executor requests accepted (acked).
    pub requests_received: AtomicU64,
    /// Executions that produced a reply.
    pub requests_completed: AtomicU64,
    /// Buffered replies removed by `WORKER_REPLY_ACK`.
    pub replies_acked: AtomicU64,
    /// Buffered replies delivered over the HTTP flush fallback.
    pub replies_flushed: AtomicU64,
    /// Worker heartbeats sent.
    pub heartbeats_sent: AtomicU64,
    /// Gateway heartbeats observed.
    pub gateway_heartbeats: AtomicU64,
    /// Reconnections after a broken connection.
    pub reconnections: AtomicU64,
    /// Gateway-initiated drains.
    pub drains: AtomicU64,
    /// Lease extensions sent.
    pub leases_extended: AtomicU64,
}

impl WorkerMetrics {
    /// Create new worker metrics.
    pub fn new() -> Self {
        Self::default()
    }

    pub fn inc_requests_received(&self) {
        self.requests_received.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_requests_completed(&self) {
        self.requests_completed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replies_acked(&self) {
        self.replies_acked.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_replies_flushed(&self) {
        self.replies_flushed.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_heartbeats_sent(&self) {
        self.heartbeats_sent.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_gateway_heartbeats(&self) {
        self.gateway_heartbeats.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_reconnections(&self) {
        self.reconnections.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_drains(&self) {
        self.drains.fetch_add(1, Ordering::Relaxed);
    }

    pub fn inc_leases_extended(&self) {
        self.leases_extended.fetch_add(1, Ordering::Relaxed);
    }

    /// Get a snapshot of all counters.
    pub fn snapshot(&self) -> MetricsSnapshot {
        MetricsSnapshot {
            requests_received: self.requests_received.load(Ordering::Relaxed),
            requests_completed: self.requests_completed.load(Ordering::Relaxed),
            replies_acked: self.replies_acked.load(Ordering::Relaxed),
            replies_flushed: self.replies_flushed.load(Ordering::Relaxed),
            heartbeats_sent: self.heartbeats_sent.load(Ordering::Relaxed),
            gateway_heartbeats: self.gateway_heartbeats.load(Ordering::Relaxed),
            reconnections: self.reconnections.load(Ordering::Relaxed),
            drains: self.drains.load(Ordering::Relaxed),
            leases_extended: self.leases_extended.load(Ordering::Relaxed),
        }
    }
}

/// A snapshot of worker metrics.
#[derive(Debug, Clone)]
pub struct MetricsSnapshot {
    pub requests_received: u64,
    pub requests_completed: u64,
    pub replies_acked: u64,
    pub replies_flushed: u64,
    pub heartbeats_sent: u64,
    pub gateway_heartbeats: u64,
    pub reconnections: u64,
    pub drains: u64,
    pub leases_extended: u64,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_snapshot() {
        let metrics = WorkerMetrics::new();
        metrics.inc_requests_received();
        metrics.inc_requests_received();
        metrics.inc_replies_acked();

        let snapshot = metrics.snapshot();
        assert_eq!(snapshot.requests_received, 2);
        assert_eq!(snapshot.replies_acked, 1);
        assert_eq!(snapshot.reconnections, 0);
    }
}
