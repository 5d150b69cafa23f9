//! The public worker facade.
//!
//! [`WorkerBuilder`] collects configuration, apps, and functions;
//! [`Worker`] exposes the running worker: its state, connection id, the
//! `closed` awaitable, and an idempotent `close()`.
//!
//! # Example
//!
//! ```no_run
//! use tungsten::prelude::*;
//!
//! #[tokio::main]
//! async fn main() -> Result<(), TungstenError> {
//!     let worker = Worker::builder()
//!         .signing_key(std::env::var("SIGNING_KEY").unwrap_or_default())
//!         .app("billing", None, Vec::new())
//!         .function(
//!             "billing",
//!             "charge",
//!             |input: FunctionInput| -> Result<FunctionOutput, FunctionError> {
//!                 Ok(FunctionOutput::ok(input.body))
//!             },
//!         )
//!         .connect()
//!         .await?;
//!
//!     worker.closed().await;
//!     Ok(())
//! }
//! ```

use crate::error::TungstenError;
use parking_lot::{Mutex, RwLock};
use std::sync::Arc;
use tokio::sync::{broadcast, watch};
use tokio::task::JoinHandle;
use tungsten_worker::shutdown::spawn_signal_listener;
use tungsten_worker::{
    state, EventBus, FunctionRegistry, InProcessBridge, IsolatedBridge, MetricsSnapshot,
    ShutdownSignal, Supervisor, UserFunction, WorkerConfig, WorkerEvent, WorkerMetrics,
    WorkerState,
};
use url::Url;

struct AppSpec {
    app_id: String,
    version: Option<String>,
    metadata: Vec<u8>,
}

struct FunctionSpec {
    app_id: String,
    slug: String,
    handler: Arc<dyn UserFunction>,
}

/// Builder for a [`Worker`].
pub struct WorkerBuilder {
    config: WorkerConfig,
    apps: Vec<AppSpec>,
    functions: Vec<FunctionSpec>,
}

impl WorkerBuilder {
    pub fn new() -> Self {
        Self {
            config: WorkerConfig::new(),
            apps: Vec::new(),
            functions: Vec::new(),
        }
    }

    /// Set the primary signing key.
    pub fn signing_key(mut self, key: impl Into<String>) -> Self {
        self.config = self.config.with_signing_key(key);
        self
    }

    /// Set the fallback signing key.
    pub fn signing_key_fallback(mut self, key: impl Into<String>) -> Self {
        self.config = self.config.with_signing_key_fallback(key);
        self
    }

    /// Set the environment tag.
    pub fn environment(mut self, env: impl Into<String>) -> Self {
        self.config = self.config.with_environment(env);
        self
    }

    /// Set the worker instance id (defaults to the hostname).
    pub fn instance_id(mut self, id: impl Into<String>) -> Self {
        self.config = self.config.with_instance_id(id);
        self
    }

    /// Bound concurrent executions.
    pub fn max_concurrency(mut self, limit: usize) -> Self {
        self.config = self.config.with_max_concurrency(limit);
        self
    }

    /// Replace the handled shutdown signals.
    pub fn shutdown_signals(mut self, signals: Vec<ShutdownSignal>) -> Self {
        self.config = self.config.with_shutdown_signals(signals);
        self
    }

    /// Override the gateway URL (testing / proxying).
    pub fn gateway_url_override(mut self, url: Url) -> Self {
        self.config = self.config.with_gateway_url_override(url);
        self
    }

    /// Set the Connect API base URL.
    pub fn api_base_url(mut self, url: Url) -> Self {
        self.config = self.config.with_api_base_url(url);
        self
    }

    /// Enable dev mode (relaxes the signing-key requirement).
    pub fn dev(mut self, dev: bool) -> Self {
        self.config = self.config.with_dev(dev);
        self
    }

    /// Choose between the isolated (default) and in-process execution
    /// bridge.
    pub fn isolate_execution(mut self, isolate: bool) -> Self {
        self.config = self.config.with_isolate_execution(isolate);
        self
    }

    /// Register an app with its opaque function-metadata blob.
    pub fn app(
        mut self,
        app_id: impl Into<String>,
        version: Option<String>,
        metadata: Vec<u8>,
    ) -> Self {
        self.apps.push(AppSpec {
            app_id: app_id.into(),
            version,
            metadata,
        });
        self
    }

    /// Register a function under a previously added app.
    pub fn function(
        mut self,
        app_id: impl Into<String>,
        slug: impl Into<String>,
        handler: impl UserFunction + 'static,
    ) -> Self {
        self.functions.push(FunctionSpec {
            app_id: app_id.into(),
            slug: slug.into(),
            handler: Arc::new(handler),
        });
        self
    }

    /// Validate the configuration, spawn the supervisor, and start
    /// connecting.
    pub async fn connect(self) -> Result<Worker, TungstenError> {
        let registry = Arc::new(FunctionRegistry::new());
        for app in self.apps {
            registry.register_app(app.app_id, app.version, app.metadata)?;
        }
        for function in self.functions {
            registry.register_function(&function.app_id, function.slug, function.handler)?;
        }

        let max_concurrency = self.config.resolved_max_concurrency();
        let bridge: Arc<dyn tungsten_worker::ExecutionBridge> = if self.config.isolate_execution {
            Arc::new(
                IsolatedBridge::new(Arc::clone(&registry), max_concurrency)
                    .map_err(tungsten_worker::ConfigError::Io)?,
            )
        } else {
            Arc::new(InProcessBridge::new(Arc::clone(&registry), max_concurrency))
        };

        let signals = self.config.handle_shutdown_signals.clone();
        let (supervisor, handles) = Supervisor::new(self.config, registry, bridge)?;
        tokio::spawn(supervisor.run());

        let signal_task = spawn_signal_listener(&signals, Arc::clone(&handles.close_tx));

        Ok(Worker {
            state_rx: handles.state_rx,
            close_tx: handles.close_tx,
            connection_id: handles.connection_id,
            events: handles.events,
            metrics: handles.metrics,
            signal_task: Mutex::new(signal_task),
        })
    }
}

impl Default for WorkerBuilder {
    fn default() -> Self {
        Self::new()
    }
}

/// A running Connect worker.
pub struct Worker {
    state_rx: watch::Receiver<WorkerState>,
    close_tx: Arc<watch::Sender<bool>>,
    connection_id: Arc<RwLock<Option<String>>>,
    events: EventBus,
    metrics: Arc<WorkerMetrics>,
    signal_task: Mutex<Option<JoinHandle<()>>>,
}

impl Worker {
    /// Create a new worker builder.
    #[inline]
    pub fn builder() -> WorkerBuilder {
        WorkerBuilder::new()
    }

    /// Current worker state.
    pub fn state(&self) -> WorkerState {
        *self.state_rx.borrow()
    }

    /// Gateway-assigned id of the active connection, if any.
    pub fn connection_id(&self) -> Option<String> {
        self.connection_id.read().clone()
    }

    /// Subscribe to lifecycle and per-request notifications.
    pub fn events(&self) -> broadcast::Receiver<WorkerEvent> {
        self.events.subscribe()
    }

    /// Snapshot of the worker's counters.
    pub fn metrics(&self) -> MetricsSnapshot {
        self.metrics.snapshot()
    }

    /// Resolve once the worker reaches [`WorkerState::Closed`].
    pub async fn closed(&self) {
        state::closed(self.state_rx.clone()).await;
    }

    /// Graceful shutdown: deregister signal handlers, wait for in-flight
    /// user code, flush the response buffer, close the connection.
    ///
    /// Idempotent; concurrent callers all resolve when the worker is
    /// closed.
    pub async fn close(&self) {
        if let Some(task) = self.signal_task.lock().take() {
            task.abort();
        }
        tracing::debug!("Close requested by embedder");
        let _ = self.close_tx.send(true);
        self.closed().await;
    }
}
