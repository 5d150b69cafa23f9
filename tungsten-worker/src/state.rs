//! Externally visible worker state.

use tokio::sync::watch;

/// Lifecycle state of the worker.
///
/// `Connecting → Active → {Reconnecting ⇄ Active} → Closing → Closed`.
/// The `Active → Reconnecting` edge fires both on a broken socket and on
/// a gateway draining notice.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkerState {
    /// First connection attempt in progress.
    Connecting,
    /// Connected and accepting executor requests.
    Active,
    /// Connection lost or draining; the supervisor is re-establishing.
    Reconnecting,
    /// Shutdown in progress.
    Closing,
    /// Terminal state; the `closed` awaitable has resolved.
    Closed,
}

impl std::fmt::Display for WorkerState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let name = match self {
            WorkerState::Connecting => "CONNECTING",
            WorkerState::Active => "ACTIVE",
            WorkerState::Reconnecting => "RECONNECTING",
            WorkerState::Closing => "CLOSING",
            WorkerState::Closed => "CLOSED",
        };
        f.write_str(name)
    }
}

/// Create the state channel. The supervisor holds the sender; the facade
/// and any observer clone the receiver.
pub fn state_channel() -> (watch::Sender<WorkerState>, watch::Receiver<WorkerState>) {
    watch::channel(WorkerState::Connecting)
}

/// Resolve once the worker reaches [`WorkerState::Closed`].
///
/// Also resolves if the supervisor is gone, which only happens at
/// teardown.
pub async fn closed(mut rx: watch::Receiver<WorkerState>) {
    let _ = rx.wait_for(|state| *state == WorkerState::Closed).await;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_closed_resolves_on_terminal_state() {
        let (tx, rx) = state_channel();
        assert_eq!(*rx.borrow(), WorkerState::Connecting);

        let waiter = tokio::spawn(closed(rx));
        tx.send(WorkerState::Active).unwrap();
        tx.send(WorkerState::Closing).unwrap();
        assert!(!waiter.is_finished());

        tx.send(WorkerState::Closed).unwrap();
        waiter.await.unwrap();
    }
}
