//! The outbound response buffer.
//!
//! Every reply produced by user code lands here before transmission and
//! leaves only via `WORKER_REPLY_ACK`, a successful HTTP flush, or
//! teardown after the shutdown flush. Entries are *pending-ack* while an
//! acknowledgement is still expected on a socket and *unsent* once they
//! are scheduled for the HTTP fallback.

use crate::backoff::reconnect_delay;
use crate::metrics::WorkerMetrics;
use dashmap::DashMap;
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tokio::time::sleep;
use tracing::{debug, error, warn};
use tungsten_http::{ApiError, ConnectApiClient};

/// Sweeps one flush call makes over the unsent entries before giving up.
pub const MAX_FLUSH_SWEEPS: usize = 5;

/// State of one buffered reply.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryState {
    /// Awaiting `WORKER_REPLY_ACK` on a socket.
    PendingAck,
    /// Scheduled for HTTP flush.
    Unsent,
}

#[derive(Debug)]
struct ResponseEntry {
    bytes: Vec<u8>,
    state: EntryState,
    /// Promotion timer; armed only while `PendingAck`.
    timer: Option<JoinHandle<()>>,
}

/// Signing keys available to a flush.
#[derive(Debug, Clone, Copy)]
pub struct FlushKeys<'a> {
    /// Key currently active in the supervisor.
    pub primary: &'a str,
    /// Fallback, tried once on auth failure.
    pub fallback: Option<&'a str>,
}

/// Per-request-id buffer of encoded `WORKER_REPLY` frames.
#[derive(Debug)]
pub struct ResponseBuffer {
    entries: DashMap<String, ResponseEntry>,
    metrics: Arc<WorkerMetrics>,
}

impl ResponseBuffer {
    pub fn new(metrics: Arc<WorkerMetrics>) -> Arc<Self> {
        Arc::new(Self {
            entries: DashMap::new(),
            metrics,
        })
    }

    /// Insert a reply as *pending-ack* and arm its promotion timer.
    pub fn add_pending(self: &Arc<Self>, request_id: &str, bytes: Vec<u8>, deadline: Duration) {
        let timer = {
            let buffer = Arc::clone(self);
            let request_id = request_id.to_string();
            tokio::spawn(async move {
                sleep(deadline).await;
                buffer.promote(&request_id);
            })
        };

        if let Some(old) = self.entries.insert(
            request_id.to_string(),
            ResponseEntry {
                bytes,
                state: EntryState::PendingAck,
                timer: Some(timer),
            },
        ) {
            // Request ids are unique; a survivor here is a stale timer.
            if let Some(t) = old.timer {
                t.abort();
            }
        }
    }

    /// Insert a reply directly as *unsent* (no active connection at reply
    /// time, or the worker is closing).
    pub fn append(&self, request_id: &str, bytes: Vec<u8>) {
        if let Some(old) = self.entries.insert(
            request_id.to_string(),
            ResponseEntry {
                bytes,
                state: EntryState::Unsent,
                timer: None,
            },
        ) {
            if let Some(t) = old.timer {
                t.abort();
            }
        }
    }

    /// `WORKER_REPLY_ACK` arrived: drop the entry and its timer.
    pub fn ack(&self, request_id: &str) -> bool {
        match self.entries.remove(request_id) {
            Some((_, entry)) => {
                if let Some(t) = entry.timer {
                    t.abort();
                }
                self.metrics.inc_replies_acked();
                debug!(request_id, "Reply acknowledged");
                true
            }
            None => false,
        }
    }

    fn promote(&self, request_id: &str) {
        if let Some(mut entry) = self.entries.get_mut(request_id) {
            if entry.state == EntryState::PendingAck {
                entry.state = EntryState::Unsent;
                entry.timer = None;
                warn!(request_id, "Reply unacknowledged, scheduling HTTP flush");
            }
        }
    }

    /// Promote every *pending-ack* entry; the shutdown coordinator owns
    /// the final delivery attempt.
    pub fn promote_all(&self) {
        for mut entry in self.entries.iter_mut() {
            if entry.state == EntryState::PendingAck {
                entry.state = EntryState::Unsent;
                if let Some(t) = entry.timer.take() {
                    t.abort();
                }
            }
        }
    }

    /// State of one entry, if buffered.
    pub fn state_of(&self, request_id: &str) -> Option<EntryState> {
        self.entries.get(request_id).map(|e| e.state)
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Whether any entry is scheduled for HTTP flush.
    pub fn has_unsent(&self) -> bool {
        self.entries
            .iter()
            .any(|e| e.state == EntryState::Unsent)
    }

    fn unsent(&self) -> Vec<(String, Vec<u8>)> {
        self.entries
            .iter()
            .filter(|e| e.state == EntryState::Unsent)
            .map(|e| (e.key().clone(), e.bytes.clone()))
            .collect()
    }

    /// POST every unsent entry to the flush endpoint, up to
    /// [`MAX_FLUSH_SWEEPS`] sweeps with backoff-schedule sleeps between
    /// them. On auth failure the fallback key is swapped in once.
    /// Exhaustion is silent apart from an error log; entries survive for
    /// the next flush.
    pub async fn flush(&self, api: &ConnectApiClient, keys: FlushKeys<'_>) {
        let mut active = keys.primary;
        let mut fallback = keys.fallback;

        for sweep in 0..MAX_FLUSH_SWEEPS {
            let unsent = self.unsent();
            if unsent.is_empty() {
                return;
            }
            if sweep > 0 {
                sleep(reconnect_delay(sweep as u32 - 1)).await;
            }
            debug!(sweep, entries = unsent.len(), "Flushing buffered replies");

            for (request_id, bytes) in unsent {
                match api.flush_reply(active, &bytes).await {
                    Ok(()) => {
                        self.entries.remove(&request_id);
                        self.metrics.inc_replies_flushed();
                        debug!(request_id, "Reply flushed over HTTP");
                    }
                    Err(ApiError::Unauthorized) => {
                        if let Some(key) = fallback.take() {
                            warn!("Flush rejected with primary key, retrying with fallback");
                            active = key;
                            if api.flush_reply(active, &bytes).await.is_ok() {
                                self.entries.remove(&request_id);
                                self.metrics.inc_replies_flushed();
                            }
                        } else {
                            error!(request_id, "Flush rejected: signing key unauthorized");
                        }
                    }
                    Err(e) => {
                        warn!(request_id, error = %e, "Flush attempt failed");
                    }
                }
            }
        }

        let remaining = self.unsent().len();
        if remaining > 0 {
            error!(remaining, "Giving up flushing buffered replies for now");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn buffer() -> Arc<ResponseBuffer> {
        ResponseBuffer::new(Arc::new(WorkerMetrics::new()))
    }

    #[tokio::test(start_paused = true)]
    async fn test_pending_promotes_after_deadline() {
        let buf = buffer();
        buf.add_pending("r1", b"bytes".to_vec(), Duration::from_secs(5));
        assert_eq!(buf.state_of("r1"), Some(EntryState::PendingAck));

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert_eq!(buf.state_of("r1"), Some(EntryState::Unsent));
        assert!(buf.has_unsent());
    }

    #[tokio::test(start_paused = true)]
    async fn test_ack_cancels_promotion() {
        let buf = buffer();
        buf.add_pending("r1", b"bytes".to_vec(), Duration::from_secs(5));
        assert!(buf.ack("r1"));
        assert!(buf.is_empty());

        tokio::time::sleep(Duration::from_secs(6)).await;
        assert!(buf.is_empty());
    }

    #[tokio::test]
    async fn test_ack_unknown_id() {
        let buf = buffer();
        assert!(!buf.ack("nope"));
    }

    #[tokio::test]
    async fn test_append_is_immediately_unsent() {
        let buf = buffer();
        buf.append("r1", b"bytes".to_vec());
        assert_eq!(buf.state_of("r1"), Some(EntryState::Unsent));
    }

    #[tokio::test(start_paused = true)]
    async fn test_promote_all() {
        let buf = buffer();
        buf.add_pending("r1", b"a".to_vec(), Duration::from_secs(60));
        buf.add_pending("r2", b"b".to_vec(), Duration::from_secs(60));
        buf.append("r3", b"c".to_vec());

        buf.promote_all();
        assert_eq!(buf.state_of("r1"), Some(EntryState::Unsent));
        assert_eq!(buf.state_of("r2"), Some(EntryState::Unsent));
        assert_eq!(buf.state_of("r3"), Some(EntryState::Unsent));
    }
}
