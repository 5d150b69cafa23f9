//! The execution bridge: the seam between connection plumbing and user
//! code.
//!
//! Two interchangeable implementations satisfy [`ExecutionBridge`]: the
//! in-process bridge runs functions on the blocking pool, the isolated
//! bridge marshals them to a dedicated OS thread. The supervisor is
//! oblivious to which is in use. Either way, user code never runs on the
//! connection-core task and so can never starve the heartbeat or
//! lease-extension timers.

mod isolated;

pub use isolated::{ExecutionMessage, ExecutionReply, IsolatedBridge};

use crate::registry::{FunctionInput, FunctionRegistry};
use crate::state::WorkerState;
use async_trait::async_trait;
use std::panic::{catch_unwind, AssertUnwindSafe};
use std::sync::Arc;
use tokio::sync::Semaphore;
use tracing::{error, warn};

/// Result of one execution, already shaped for a `WORKER_REPLY`.
///
/// User errors never escape the bridge; they arrive here as 500-shaped
/// outcomes with `no_retry = false`.
#[derive(Debug, Clone)]
pub struct ExecutionOutcome {
    /// HTTP-shaped status.
    pub status: u16,

    /// Opaque response body.
    pub body: Vec<u8>,

    /// Whether the scheduler should skip retrying.
    pub no_retry: bool,
}

impl ExecutionOutcome {
    /// A 500-shaped outcome for an execution failure.
    pub fn internal_error(message: &str) -> Self {
        Self {
            status: 500,
            body: serde_json::json!({ "error": message }).to_string().into_bytes(),
            no_retry: false,
        }
    }

    /// Whether the function produced a non-error status.
    pub fn is_success(&self) -> bool {
        self.status < 400
    }
}

/// Observability notices crossing the bridge boundary.
///
/// Only the isolated bridge forwards them; the in-process bridge shares
/// the connection context and has nowhere to send them.
#[derive(Debug, Clone)]
pub enum BridgeNotice {
    /// The worker state changed.
    StateChange(WorkerState),
    /// A connection completed its handshake.
    ConnectionReady { connection_id: String },
    /// The worker reached its terminal state.
    Closed,
    /// A connection-fatal error occurred.
    Error { message: String },
    /// Free-form log line.
    Log { message: String },
}

/// Routes `execute` calls to user code.
#[async_trait]
pub trait ExecutionBridge: Send + Sync {
    /// Run the function named by `input` and shape the result.
    ///
    /// Never fails: lookup misses, user errors, and panics all come back
    /// as 500-shaped outcomes.
    async fn execute(&self, input: FunctionInput) -> ExecutionOutcome;

    /// Forward an observability notice across the bridge boundary.
    fn notify(&self, _notice: BridgeNotice) {}
}

/// Invoke a user function synchronously, containing errors and panics.
pub(crate) fn run_user_function(
    registry: &FunctionRegistry,
    input: FunctionInput,
) -> ExecutionOutcome {
    let Some(function) = registry.lookup(&input.app_id, &input.function_slug) else {
        warn!(
            app_id = %input.app_id,
            function_slug = %input.function_slug,
            "No function registered for slug"
        );
        return ExecutionOutcome::internal_error("function not found");
    };

    match catch_unwind(AssertUnwindSafe(|| function.invoke(input))) {
        Ok(Ok(output)) => ExecutionOutcome {
            status: output.status,
            body: output.body,
            no_retry: false,
        },
        Ok(Err(err)) => {
            warn!(error = %err, "User function returned an error");
            ExecutionOutcome::internal_error(&err.to_string())
        }
        Err(_) => {
            error!("User function panicked");
            ExecutionOutcome::internal_error("function panicked")
        }
    }
}

/// Bridge that invokes user functions in the connection's own process
/// context, on the blocking pool.
pub struct InProcessBridge {
    registry: Arc<FunctionRegistry>,
    limiter: Option<Arc<Semaphore>>,
}

impl InProcessBridge {
    pub fn new(registry: Arc<FunctionRegistry>, max_concurrency: Option<usize>) -> Self {
        Self {
            registry,
            limiter: max_concurrency.map(|n| Arc::new(Semaphore::new(n))),
        }
    }
}

#[async_trait]
impl ExecutionBridge for InProcessBridge {
    async fn execute(&self, input: FunctionInput) -> ExecutionOutcome {
        let _permit = match &self.limiter {
            Some(limiter) => Arc::clone(limiter).acquire_owned().await.ok(),
            None => None,
        };

        let registry = Arc::clone(&self.registry);
        match tokio::task::spawn_blocking(move || run_user_function(&registry, input)).await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!(error = %e, "Execution task failed");
                ExecutionOutcome::internal_error("execution task failed")
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::registry::{FunctionError, FunctionOutput};

    fn registry_with(
        slug: &str,
        f: impl Fn(FunctionInput) -> Result<FunctionOutput, FunctionError>
            + Send
            + Sync
            + 'static,
    ) -> Arc<FunctionRegistry> {
        let registry = FunctionRegistry::new();
        registry.register_app("app", None, Vec::new()).unwrap();
        registry
            .register_function("app", slug, Arc::new(f))
            .unwrap();
        Arc::new(registry)
    }

    fn input(slug: &str) -> FunctionInput {
        FunctionInput {
            request_id: "r1".to_string(),
            app_id: "app".to_string(),
            function_slug: slug.to_string(),
            body: b"{}".to_vec(),
        }
    }

    #[tokio::test]
    async fn test_in_process_success() {
        let bridge = InProcessBridge::new(
            registry_with("ok", |_| Ok(FunctionOutput::ok(br#"{"ok":true}"#.to_vec()))),
            None,
        );
        let outcome = bridge.execute(input("ok")).await;
        assert_eq!(outcome.status, 200);
        assert_eq!(outcome.body, br#"{"ok":true}"#);
        assert!(outcome.is_success());
        assert!(!outcome.no_retry);
    }

    #[tokio::test]
    async fn test_user_error_is_shaped_to_500() {
        let bridge = InProcessBridge::new(registry_with("boom", |_| Err("exploded".into())), None);
        let outcome = bridge.execute(input("boom")).await;
        assert_eq!(outcome.status, 500);
        assert!(!outcome.no_retry);
        assert!(String::from_utf8(outcome.body).unwrap().contains("exploded"));
    }

    #[tokio::test]
    async fn test_panic_is_contained() {
        let bridge = InProcessBridge::new(
            registry_with("panic", |_| panic!("kaboom")),
            None,
        );
        let outcome = bridge.execute(input("panic")).await;
        assert_eq!(outcome.status, 500);
    }

    #[tokio::test]
    async fn test_missing_slug_is_500() {
        let bridge = InProcessBridge::new(
            registry_with("other", |_| Ok(FunctionOutput::ok(Vec::new()))),
            None,
        );
        let outcome = bridge.execute(input("missing")).await;
        assert_eq!(outcome.status, 500);
    }

    #[tokio::test]
    async fn test_concurrency_bound_respected() {
        let bridge = Arc::new(InProcessBridge::new(
            registry_with("slow", |_| {
                std::thread::sleep(std::time::Duration::from_millis(50));
                Ok(FunctionOutput::ok(Vec::new()))
            }),
            Some(1),
        ));

        let started = std::time::Instant::now();
        let a = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.execute(input("slow")).await })
        };
        let b = {
            let bridge = Arc::clone(&bridge);
            tokio::spawn(async move { bridge.execute(input("slow")).await })
        };
        a.await.unwrap();
        b.await.unwrap();
        // With one permit the two executions serialize.
        assert!(started.elapsed() >= std::time::Duration::from_millis(100));
    }
}
