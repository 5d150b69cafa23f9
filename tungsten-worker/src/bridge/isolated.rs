//! The isolated execution bridge.
//!
//! Runs user code in a dedicated execution context (its own OS thread)
//! so that blocking or CPU-bound functions cannot interfere with the
//! connection core. The two contexts exchange messages over flume
//! channels: requests and observability notices flow in, replies flow
//! back out and are matched to their waiters by request id.

use super::{BridgeNotice, ExecutionBridge, ExecutionOutcome, run_user_function};
use crate::registry::{FunctionInput, FunctionRegistry};
use async_trait::async_trait;
use dashmap::DashMap;
use std::sync::Arc;
use tokio::sync::{oneshot, Semaphore};
use tokio::task::JoinHandle;
use tracing::{debug, trace, warn};

/// Connection-context to execution-context messages.
#[derive(Debug)]
pub enum ExecutionMessage {
    /// Run a function.
    Request(FunctionInput),
    /// Observability notice for the execution context.
    Notice(BridgeNotice),
}

/// Execution-context to connection-context messages.
#[derive(Debug)]
pub enum ExecutionReply {
    /// A function finished.
    Response {
        request_id: String,
        outcome: ExecutionOutcome,
    },
    /// The execution context itself failed to run the function.
    Error {
        request_id: String,
        message: String,
    },
}

/// Bridge that marshals executions across a worker-thread boundary.
pub struct IsolatedBridge {
    to_exec: flume::Sender<ExecutionMessage>,
    pending: Arc<DashMap<String, oneshot::Sender<ExecutionOutcome>>>,
    limiter: Option<Arc<Semaphore>>,
    _pump: JoinHandle<()>,
}

impl IsolatedBridge {
    /// Spawn the execution context and the reply pump.
    pub fn new(
        registry: Arc<FunctionRegistry>,
        max_concurrency: Option<usize>,
    ) -> std::io::Result<Self> {
        let (to_exec, exec_rx) = flume::unbounded::<ExecutionMessage>();
        let (reply_tx, reply_rx) = flume::unbounded::<ExecutionReply>();

        std::thread::Builder::new()
            .name("tungsten-exec".to_string())
            .spawn(move || execution_context(registry, exec_rx, reply_tx))?;

        let pending: Arc<DashMap<String, oneshot::Sender<ExecutionOutcome>>> =
            Arc::new(DashMap::new());
        let pump = {
            let pending = Arc::clone(&pending);
            tokio::spawn(async move {
                while let Ok(reply) = reply_rx.recv_async().await {
                    let (request_id, outcome) = match reply {
                        ExecutionReply::Response {
                            request_id,
                            outcome,
                        } => (request_id, outcome),
                        ExecutionReply::Error {
                            request_id,
                            message,
                        } => {
                            warn!(request_id = %request_id, message = %message, "Execution context error");
                            let outcome = ExecutionOutcome::internal_error(&message);
                            (request_id, outcome)
                        }
                    };
                    if let Some((_, waiter)) = pending.remove(&request_id) {
                        let _ = waiter.send(outcome);
                    }
                }
                debug!("Execution context terminated, reply pump exiting");
            })
        };

        Ok(Self {
            to_exec,
            pending,
            limiter: max_concurrency.map(|n| Arc::new(Semaphore::new(n))),
            _pump: pump,
        })
    }
}

#[async_trait]
impl ExecutionBridge for IsolatedBridge {
    async fn execute(&self, input: FunctionInput) -> ExecutionOutcome {
        let _permit = match &self.limiter {
            Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
            None => None,
        };

        let request_id = input.request_id.clone();
        let (tx, rx) = oneshot::channel();
        self.pending.insert(request_id.clone(), tx);

        if self
            .to_exec
            .send(ExecutionMessage::Request(input))
            .is_err()
        {
            self.pending.remove(&request_id);
            return ExecutionOutcome::internal_error("execution context terminated");
        }

        match rx.await {
            Ok(outcome) => outcome,
            Err(_) => {
                self.pending.remove(&request_id);
                ExecutionOutcome::internal_error("execution context terminated")
            }
        }
    }

    fn notify(&self, notice: BridgeNotice) {
        let _ = self.to_exec.send(ExecutionMessage::Notice(notice));
    }
}

/// Body of the dedicated execution thread.
///
/// Each request runs on its own named thread so one long-running function
/// cannot head-of-line block the next. The thread exits when the bridge
/// drops its sender or a `Closed` notice arrives.
fn execution_context(
    registry: Arc<FunctionRegistry>,
    rx: flume::Receiver<ExecutionMessage>,
    reply: flume::Sender<ExecutionReply>,
) {
    while let Ok(message) = rx.recv() {
        match message {
            ExecutionMessage::Request(input) => {
                let request_id = input.request_id.clone();
                let registry = Arc::clone(&registry);
                let thread_reply = reply.clone();
                let spawned = std::thread::Builder::new()
                    .name(format!("tungsten-fn-{request_id}"))
                    .spawn(move || {
                        let request_id = input.request_id.clone();
                        let outcome = run_user_function(&registry, input);
                        let _ = thread_reply.send(ExecutionReply::Response {
                            request_id,
                            outcome,
                        });
                    });
                if let Err(e) = spawned {
                    let _ = reply.send(ExecutionReply::Error {
                        request_id,
                        message: format!("failed to spawn function thread: {e}"),
                    });
                }
            }
            ExecutionMessage::Notice(BridgeNotice::Closed) => {
                trace!("Execution context received Closed notice");
                break;
            }
            ExecutionMessage::Notice(notice) => {
                trace!(notice = ?notice, "Execution context notice");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FunctionError, FunctionInput, FunctionOutput};
    use std::time::Duration;

    fn registry() -> Arc<FunctionRegistry> {
        let registry = FunctionRegistry::new();
        registry.register_app("app", None, Vec::new()).unwrap();
        registry
            .register_function(
                "app",
                "echo",
                Arc::new(|input: FunctionInput| -> Result<FunctionOutput, FunctionError> {
                    Ok(FunctionOutput::ok(input.body))
                }),
            )
            .unwrap();
        registry
            .register_function(
                "app",
                "slow",
                Arc::new(|input: FunctionInput| -> Result<FunctionOutput, FunctionError> {
                    std::thread::sleep(Duration::from_millis(100));
                    Ok(FunctionOutput::ok(input.body))
                }),
            )
            .unwrap();
        Arc::new(registry)
    }

    fn input(id: &str, slug: &str) -> FunctionInput {
        FunctionInput {
            request_id: id.to_string(),
            app_id: "app".to_string(),
            function_slug: slug.to_string(),
            body: format!("body-{id}").into_bytes(),
        }
    }

    #[tokio::test]
    async fn test_round_trip() {
        let bridge = IsolatedBridge::new(registry(), None).unwrap();
        let outcome = bridge.execute(input("r1", "echo")).await;
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.body, b"body-r1");
    }

    #[tokio::test]
    async fn test_concurrent_executions_interleave() {
        let bridge = Arc::new(IsolatedBridge::new(registry(), None).unwrap());

        let slow = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.execute(input("r1", "slow")).await })
        };
        // The fast request must not wait for the slow one.
        let fast = tokio::time::timeout(
            Duration::from_millis(80),
            bridge.execute(input("r2", "echo")),
        )
        .await
        .expect("fast request starved by slow one");
        assert_eq!(fast.body, b"body-r2");

        let slow = slow.await.unwrap();
        assert_eq!(slow.body, b"body-r1");
    }

    #[tokio::test]
    async fn test_notices_do_not_block() {
        let bridge = IsolatedBridge::new(registry(), None).unwrap();
        bridge.notify(BridgeNotice::Log {
            message: "hello".to_string(),
        });
        let outcome = bridge.execute(input("r1", "echo")).await;
        assert_eq!(outcome.status, 200);
    }
}
