//! Observability event stream.
//!
//! Lifecycle and per-request notifications, fanned out on a broadcast
//! channel. Lagging or absent subscribers never block the worker.

use crate::state::WorkerState;
use std::time::{Duration, SystemTime};
use tokio::sync::broadcast;

/// Notifications emitted by the worker.
#[derive(Debug, Clone)]
pub enum WorkerEvent {
    /// The worker state changed.
    StateChanged {
        state: WorkerState,
        at: SystemTime,
    },

    /// A connection completed its handshake.
    ConnectionReady {
        connection_id: String,
    },

    /// An executor request was accepted.
    RequestStarted {
        request_id: String,
    },

    /// An execution finished and its reply was routed.
    RequestCompleted {
        request_id: String,
        duration: Duration,
        outcome: RequestOutcome,
    },
}

/// Outcome of one execution.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RequestOutcome {
    /// The function returned a non-error status.
    Success,
    /// The function failed; the reply carries a 500-shaped status.
    Error,
}

/// Broadcast fan-out for [`WorkerEvent`]s.
#[derive(Debug, Clone)]
pub struct EventBus {
    tx: broadcast::Sender<WorkerEvent>,
}

impl EventBus {
    pub fn new() -> Self {
        let (tx, _) = broadcast::channel(64);
        Self { tx }
    }

    /// Subscribe to worker events.
    pub fn subscribe(&self) -> broadcast::Receiver<WorkerEvent> {
        self.tx.subscribe()
    }

    /// Emit an event; a send with no subscribers is not an error.
    pub fn emit(&self, event: WorkerEvent) {
        let _ = self.tx.send(event);
    }
}

impl Default for EventBus {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_events_fan_out() {
        let bus = EventBus::new();
        let mut rx = bus.subscribe();

        bus.emit(WorkerEvent::RequestStarted {
            request_id: "r1".to_string(),
        });

        match rx.recv().await.unwrap() {
            WorkerEvent::RequestStarted { request_id } => assert_eq!(request_id, "r1"),
            other => panic!("unexpected event: {other:?}"),
        }
    }

    #[test]
    fn test_emit_without_subscribers_is_ok() {
        let bus = EventBus::new();
        bus.emit(WorkerEvent::ConnectionReady {
            connection_id: "c1".to_string(),
        });
    }
}
