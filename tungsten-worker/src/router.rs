//! Reply routing.
//!
//! A response may outlive the connection that accepted its request. The
//! router owns that decision: write on the owning socket while it lives,
//! hand over to the successor after a graceful drain, and otherwise leave
//! the buffered entry for the HTTP flush. A reply is never written over a
//! WebSocket that did not exist when its connection broke: the new socket
//! is authenticated with a different session, and the gateway keys
//! acknowledgement off request id, not connection id.

use crate::buffer::ResponseBuffer;
use parking_lot::RwLock;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tracing::debug;

/// Events posted to a connection core's inbox. Timers and the execution
/// path never touch the socket; only the core task writes it.
#[derive(Debug)]
pub enum ConnEvent {
    /// Write an encoded `WORKER_REPLY` frame and retire the in-flight
    /// entry.
    Reply { request_id: String, bytes: Vec<u8> },

    /// Retire an in-flight entry without writing (closing mode; the
    /// shutdown flush owns delivery).
    Retire { request_id: String },

    /// A lease timer fired; send `WORKER_REQUEST_EXTEND_LEASE`.
    ExtendLease { request_id: String },

    /// Drain hand-off complete; send `WORKER_PAUSE` and finish serving.
    Pause,

    /// Tear the connection down.
    Stop,
}

/// Handle onto one connection, held by its execution tasks.
#[derive(Debug, Clone)]
pub struct ConnectionTicket {
    /// The connection's inbox.
    pub events: flume::Sender<ConnEvent>,

    /// Set once the connection has closed as part of a graceful drain,
    /// which entitles its replies to ride the successor's socket.
    pub drained: Arc<AtomicBool>,
}

/// Routes completed executions to the buffer and, when permitted, to a
/// live socket.
pub struct ReplyRouter {
    buffer: Arc<ResponseBuffer>,
    active: RwLock<Option<flume::Sender<ConnEvent>>>,
    closing: AtomicBool,
    ack_deadline: Duration,
}

impl ReplyRouter {
    pub fn new(buffer: Arc<ResponseBuffer>, ack_deadline: Duration) -> Arc<Self> {
        Arc::new(Self {
            buffer,
            active: RwLock::new(None),
            closing: AtomicBool::new(false),
            ack_deadline,
        })
    }

    /// Point the router at the current active connection's inbox, or
    /// clear it during an outage.
    pub fn set_active(&self, sender: Option<flume::Sender<ConnEvent>>) {
        *self.active.write() = sender;
    }

    /// Enter closing mode: replies are appended straight to the buffer as
    /// unsent and the shutdown flush owns their delivery.
    pub fn mark_closing(&self) {
        self.closing.store(true, Ordering::SeqCst);
    }

    /// Post an event to the active connection's inbox, if one exists.
    /// Used by a draining connection to hand work to its successor.
    pub fn forward_to_active(&self, event: ConnEvent) -> bool {
        match self.active.read().as_ref() {
            Some(active) => active.send(event).is_ok(),
            None => false,
        }
    }

    /// Route one completed execution.
    ///
    /// The buffer insertion happens first in every path, so the entry
    /// exists before any socket write and before the in-flight wait-group
    /// observes completion.
    pub fn deliver(&self, ticket: &ConnectionTicket, request_id: &str, bytes: Vec<u8>) {
        if self.closing.load(Ordering::SeqCst) {
            self.buffer.append(request_id, bytes);
            let _ = ticket.events.send(ConnEvent::Retire {
                request_id: request_id.to_string(),
            });
            return;
        }

        self.buffer
            .add_pending(request_id, bytes.clone(), self.ack_deadline);

        let event = ConnEvent::Reply {
            request_id: request_id.to_string(),
            bytes,
        };

        // Owning connection still alive: it writes the frame.
        let event = match ticket.events.send(event) {
            Ok(()) => return,
            Err(flume::SendError(event)) => event,
        };

        // Graceful drain: the successor carries the reply.
        if ticket.drained.load(Ordering::SeqCst) {
            if let Some(active) = self.active.read().as_ref() {
                let _ = active.send(event);
                return;
            }
        }

        // Broken connection: the entry stays buffered and promotes to
        // unsent; the HTTP flush owns the final attempt.
        debug!(request_id, "Reply produced after connection loss, held for flush");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::buffer::EntryState;
    use crate::metrics::WorkerMetrics;

    fn setup() -> (Arc<ReplyRouter>, Arc<ResponseBuffer>) {
        let buffer = ResponseBuffer::new(Arc::new(WorkerMetrics::new()));
        let router = ReplyRouter::new(Arc::clone(&buffer), Duration::from_secs(5));
        (router, buffer)
    }

    fn ticket() -> (ConnectionTicket, flume::Receiver<ConnEvent>) {
        let (tx, rx) = flume::unbounded();
        (
            ConnectionTicket {
                events: tx,
                drained: Arc::new(AtomicBool::new(false)),
            },
            rx,
        )
    }

    #[tokio::test]
    async fn test_live_connection_receives_reply() {
        let (router, buffer) = setup();
        let (ticket, rx) = ticket();

        router.deliver(&ticket, "r1", b"frame".to_vec());
        assert_eq!(buffer.state_of("r1"), Some(EntryState::PendingAck));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ConnEvent::Reply { request_id, .. } if request_id == "r1"
        ));
    }

    #[tokio::test]
    async fn test_broken_connection_buffers_only() {
        let (router, buffer) = setup();
        let (ticket, rx) = ticket();
        drop(rx);

        // A live successor exists, but a broken connection's replies must
        // never ride it.
        let (active_tx, active_rx) = flume::unbounded();
        router.set_active(Some(active_tx));

        router.deliver(&ticket, "r1", b"frame".to_vec());
        assert_eq!(buffer.state_of("r1"), Some(EntryState::PendingAck));
        assert!(active_rx.try_recv().is_err());
    }

    #[tokio::test]
    async fn test_drained_connection_hands_off_to_successor() {
        let (router, buffer) = setup();
        let (ticket, rx) = ticket();
        ticket.drained.store(true, Ordering::SeqCst);
        drop(rx);

        let (active_tx, active_rx) = flume::unbounded();
        router.set_active(Some(active_tx));

        router.deliver(&ticket, "r2", b"frame".to_vec());
        assert_eq!(buffer.state_of("r2"), Some(EntryState::PendingAck));
        assert!(matches!(
            active_rx.try_recv().unwrap(),
            ConnEvent::Reply { request_id, .. } if request_id == "r2"
        ));
    }

    #[tokio::test]
    async fn test_closing_mode_appends_unsent() {
        let (router, buffer) = setup();
        let (ticket, rx) = ticket();
        router.mark_closing();

        router.deliver(&ticket, "r1", b"frame".to_vec());
        assert_eq!(buffer.state_of("r1"), Some(EntryState::Unsent));
        assert!(matches!(
            rx.try_recv().unwrap(),
            ConnEvent::Retire { request_id } if request_id == "r1"
        ));
    }
}
