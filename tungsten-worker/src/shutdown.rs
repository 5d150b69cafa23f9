//! Shutdown plumbing: the in-flight wait-group and the OS-signal
//! listener.

use crate::config::ShutdownSignal;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::sync::{watch, Notify};
use tokio::task::JoinHandle;
use tracing::info;

/// Counts in-flight executions so the shutdown coordinator can wait for
/// user code to return. The wait is unbounded: running user code is the
/// one suspension the close signal does not cancel.
#[derive(Debug, Clone, Default)]
pub struct WaitGroup {
    inner: Arc<WgInner>,
}

#[derive(Debug, Default)]
struct WgInner {
    count: AtomicUsize,
    notify: Notify,
}

impl WaitGroup {
    pub fn new() -> Self {
        Self::default()
    }

    /// Track one unit of work until the guard drops.
    pub fn guard(&self) -> WgGuard {
        self.inner.count.fetch_add(1, Ordering::AcqRel);
        WgGuard {
            inner: Arc::clone(&self.inner),
        }
    }

    /// Number of live guards.
    pub fn count(&self) -> usize {
        self.inner.count.load(Ordering::Acquire)
    }

    /// Resolve once every guard has dropped.
    pub async fn wait(&self) {
        loop {
            let notified = self.inner.notify.notified();
            tokio::pin!(notified);
            notified.as_mut().enable();
            if self.inner.count.load(Ordering::Acquire) == 0 {
                return;
            }
            notified.await;
        }
    }
}

/// Guard for one unit of in-flight work.
#[derive(Debug)]
pub struct WgGuard {
    inner: Arc<WgInner>,
}

impl Drop for WgGuard {
    fn drop(&mut self) {
        if self.inner.count.fetch_sub(1, Ordering::AcqRel) == 1 {
            self.inner.notify.notify_waiters();
        }
    }
}

/// Spawn the OS-signal listener, if any signals are configured.
///
/// The first configured signal observed triggers the close channel; the
/// facade aborts this task as the first shutdown step, deregistering the
/// handlers.
pub fn spawn_signal_listener(
    signals: &[ShutdownSignal],
    close_tx: Arc<watch::Sender<bool>>,
) -> Option<JoinHandle<()>> {
    if signals.is_empty() {
        return None;
    }
    let want_interrupt = signals.contains(&ShutdownSignal::Interrupt);
    let want_terminate = signals.contains(&ShutdownSignal::Terminate);

    Some(tokio::spawn(async move {
        let name = wait_for_signal(want_interrupt, want_terminate).await;
        info!(signal = name, "Shutdown signal received");
        let _ = close_tx.send(true);
    }))
}

#[cfg(unix)]
async fn wait_for_signal(want_interrupt: bool, want_terminate: bool) -> &'static str {
    use tokio::signal::unix::{signal, SignalKind};

    let mut interrupt = if want_interrupt {
        signal(SignalKind::interrupt()).ok()
    } else {
        None
    };
    let mut terminate = if want_terminate {
        signal(SignalKind::terminate()).ok()
    } else {
        None
    };

    loop {
        tokio::select! {
            Some(()) = recv_opt(&mut interrupt) => return "SIGINT",
            Some(()) = recv_opt(&mut terminate) => return "SIGTERM",
            else => {
                // No stream could be installed; park forever rather than
                // busy-loop.
                std::future::pending::<()>().await;
            }
        }
    }
}

#[cfg(unix)]
async fn recv_opt(stream: &mut Option<tokio::signal::unix::Signal>) -> Option<()> {
    match stream {
        Some(s) => s.recv().await,
        None => None,
    }
}

#[cfg(not(unix))]
async fn wait_for_signal(_want_interrupt: bool, _want_terminate: bool) -> &'static str {
    // Only ctrl-c is portable off unix.
    let _ = tokio::signal::ctrl_c().await;
    "ctrl-c"
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::time::Duration;

    #[tokio::test]
    async fn test_wait_returns_immediately_when_idle() {
        let wg = WaitGroup::new();
        wg.wait().await;
    }

    #[tokio::test]
    async fn test_wait_blocks_until_guards_drop() {
        let wg = WaitGroup::new();
        let guard = wg.guard();
        assert_eq!(wg.count(), 1);

        let waiter = {
            let wg = wg.clone();
            tokio::spawn(async move { wg.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(guard);
        waiter.await.unwrap();
        assert_eq!(wg.count(), 0);
    }

    #[tokio::test]
    async fn test_multiple_guards() {
        let wg = WaitGroup::new();
        let g1 = wg.guard();
        let g2 = wg.guard();
        drop(g1);

        let waiter = {
            let wg = wg.clone();
            tokio::spawn(async move { wg.wait().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(!waiter.is_finished());

        drop(g2);
        waiter.await.unwrap();
    }
}
