//! The reconnect supervisor.
//!
//! Owns the outer connection loop: start handshake, connection
//! establishment, backoff with the fixed schedule, gateway exclusion,
//! signing-key fallback, drain hand-off, and the shutdown sequence. The
//! supervisor is the only mutator of the worker state and the reconnect
//! bookkeeping.

use crate::backoff::jittered_delay;
use crate::bridge::{BridgeNotice, ExecutionBridge};
use crate::buffer::{FlushKeys, ResponseBuffer};
use crate::config::WorkerConfig;
use crate::connection::{ConnExit, Connection, ConnectionDeps};
use crate::error::{ConfigError, ConnectError};
use crate::events::{EventBus, WorkerEvent};
use crate::metrics::WorkerMetrics;
use crate::registry::FunctionRegistry;
use crate::router::{ConnEvent, ReplyRouter};
use crate::shutdown::WaitGroup;
use crate::state::{state_channel, WorkerState};
use crate::{PLATFORM, REPLY_ACK_DEADLINE, SDK_VERSION};

use parking_lot::RwLock;
use std::collections::HashSet;
use std::sync::Arc;
use std::time::{SystemTime, UNIX_EPOCH};
use tokio::sync::watch;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};
use tungsten_http::ConnectApiClient;
use tungsten_proto::{StartRequest, WorkerConnect, WorkerIdentity};

/// Which signing key the supervisor is currently presenting.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum KeySlot {
    Primary,
    Fallback,
}

/// Supervisor-owned reconnect bookkeeping.
struct ReconnectState {
    /// Consecutive failed attempts; reset on every successful handshake.
    attempt: u32,
    /// Gateway groups currently avoided after handshake failures.
    excluded: HashSet<String>,
    active_key: KeySlot,
    /// The key swap happens at most once per outage.
    swapped_this_outage: bool,
}

/// Handles the facade keeps after spawning the supervisor.
pub struct SupervisorHandles {
    pub state_rx: watch::Receiver<WorkerState>,
    pub close_tx: Arc<watch::Sender<bool>>,
    pub connection_id: Arc<RwLock<Option<String>>>,
    pub events: EventBus,
    pub metrics: Arc<WorkerMetrics>,
}

/// Owns the connection lifecycle from first start call to `Closed`.
pub struct Supervisor {
    config: WorkerConfig,
    api: Arc<ConnectApiClient>,
    deps: Arc<ConnectionDeps>,
    state_tx: watch::Sender<WorkerState>,
    close_rx: watch::Receiver<bool>,
    connection_id: Arc<RwLock<Option<String>>>,
    identity: WorkerIdentity,
    capabilities: serde_json::Value,
    reconnect: ReconnectState,
    ever_active: bool,
}

impl Supervisor {
    /// Validate the configuration and assemble the worker internals.
    pub fn new(
        config: WorkerConfig,
        registry: Arc<FunctionRegistry>,
        bridge: Arc<dyn ExecutionBridge>,
    ) -> Result<(Self, SupervisorHandles), ConfigError> {
        config.validate(&registry)?;

        let api = Arc::new(ConnectApiClient::new(
            config.api_base_url.clone(),
            config.environment.as_deref(),
            PLATFORM,
            SDK_VERSION,
        )?);

        let metrics = Arc::new(WorkerMetrics::new());
        let buffer = ResponseBuffer::new(Arc::clone(&metrics));
        let router = ReplyRouter::new(Arc::clone(&buffer), REPLY_ACK_DEADLINE);
        let events = EventBus::new();

        let deps = Arc::new(ConnectionDeps {
            registry,
            bridge,
            buffer,
            router,
            metrics: Arc::clone(&metrics),
            events: events.clone(),
            in_flight: WaitGroup::new(),
        });

        let identity = WorkerIdentity {
            sdk_version: SDK_VERSION.to_string(),
            platform: PLATFORM.to_string(),
            instance_id: config.resolved_instance_id(),
            max_concurrency: config.resolved_max_concurrency().map(|n| n as u32),
            started_at: SystemTime::now()
                .duration_since(UNIX_EPOCH)
                .unwrap_or_default()
                .as_millis() as u64,
        };

        let (state_tx, state_rx) = state_channel();
        let (close_tx, close_rx) = watch::channel(false);
        let close_tx = Arc::new(close_tx);
        let connection_id = Arc::new(RwLock::new(None));

        let handles = SupervisorHandles {
            state_rx,
            close_tx,
            connection_id: Arc::clone(&connection_id),
            events,
            metrics,
        };

        let supervisor = Self {
            config,
            api,
            deps,
            state_tx,
            close_rx,
            connection_id,
            identity,
            capabilities: serde_json::json!({
                "durable_replies": "v1",
                "lease_extension": "v1",
            }),
            reconnect: ReconnectState {
                attempt: 0,
                excluded: HashSet::new(),
                active_key: KeySlot::Primary,
                swapped_this_outage: false,
            },
            ever_active: false,
        };

        Ok((supervisor, handles))
    }

    /// Run until `Closed`.
    pub async fn run(mut self) {
        let mut pending: Option<Connection> = None;

        loop {
            if *self.close_rx.borrow() {
                if let Some(conn) = pending.take() {
                    conn.teardown().await;
                }
                self.shutdown(None).await;
                return;
            }

            // A drain hand-off arrives here already established.
            let conn = match pending.take() {
                Some(conn) => conn,
                None => match self.establish_with_retries().await {
                    Some(conn) => conn,
                    None => {
                        self.shutdown(None).await;
                        return;
                    }
                },
            };

            self.activate(&conn);
            let mut conn = conn;
            let mut close_rx = self.close_rx.clone();

            match conn.run(&mut close_rx).await {
                ConnExit::ShutdownRequested => {
                    self.shutdown(Some(conn)).await;
                    return;
                }

                ConnExit::Draining => {
                    self.set_state(WorkerState::Reconnecting);
                    self.deps.router.set_active(None);
                    *self.connection_id.write() = None;

                    // Reentrant establishment: the old connection keeps
                    // serving its accepted requests until the successor
                    // is active.
                    let mut close = self.close_rx.clone();
                    let result = tokio::select! {
                        result = self.establish_once() => Some(result),
                        _ = close.wait_for(|requested| *requested) => None,
                    };
                    let Some(result) = result else {
                        conn.teardown().await;
                        self.shutdown(None).await;
                        return;
                    };
                    match result {
                        Ok(new_conn) => {
                            tokio::spawn(conn.run_drain());
                            pending = Some(new_conn);
                        }
                        Err(e) => {
                            warn!(error = %e, "Drain hand-off failed, tearing down old connection");
                            conn.teardown().await;
                            self.note_failure(&e);
                            self.reconnect.attempt += 1;
                            if !self.backoff_sleep().await {
                                self.shutdown(None).await;
                                return;
                            }
                        }
                    }
                }

                ConnExit::Broken(e) => {
                    warn!(connection_id = %conn.id(), error = %e, "Connection lost, reconnecting");
                    self.set_state(WorkerState::Reconnecting);
                    self.deps.router.set_active(None);
                    *self.connection_id.write() = None;
                    self.deps.metrics.inc_reconnections();
                    conn.teardown().await;
                }
            }
        }
    }

    /// Mark a freshly established connection active.
    fn activate(&mut self, conn: &Connection) {
        self.reconnect.attempt = 0;
        self.reconnect.swapped_this_outage = false;
        // A rejecting gateway is only avoided until some handshake
        // succeeds; after that it may recover and be re-used.
        self.reconnect.excluded.clear();
        *self.connection_id.write() = Some(conn.id().to_string());
        self.deps.router.set_active(Some(conn.sender()));
        self.ever_active = true;
        self.set_state(WorkerState::Active);

        self.deps.bridge.notify(BridgeNotice::ConnectionReady {
            connection_id: conn.id().to_string(),
        });
        self.deps.events.emit(WorkerEvent::ConnectionReady {
            connection_id: conn.id().to_string(),
        });

        // Replies orphaned by the previous outage ride HTTP, never the
        // new socket.
        if self.deps.buffer.has_unsent() {
            let buffer = Arc::clone(&self.deps.buffer);
            let api = Arc::clone(&self.api);
            let primary = self.active_key().to_string();
            let fallback = self.inactive_key();
            tokio::spawn(async move {
                buffer
                    .flush(
                        &api,
                        FlushKeys {
                            primary: &primary,
                            fallback: fallback.as_deref(),
                        },
                    )
                    .await;
            });
        }
    }

    /// Keep attempting until a connection is established or the close
    /// signal fires (`None`).
    async fn establish_with_retries(&mut self) -> Option<Connection> {
        loop {
            if *self.close_rx.borrow() {
                return None;
            }
            self.set_state(if self.ever_active {
                WorkerState::Reconnecting
            } else {
                WorkerState::Connecting
            });

            let mut close = self.close_rx.clone();
            let result = tokio::select! {
                result = self.establish_once() => result,
                _ = close.wait_for(|requested| *requested) => return None,
            };
            match result {
                Ok(conn) => return Some(conn),
                Err(e) => {
                    self.note_failure(&e);
                    self.reconnect.attempt += 1;
                    if !self.backoff_sleep().await {
                        return None;
                    }
                }
            }
        }
    }

    /// One start call plus one WebSocket handshake.
    async fn establish_once(&mut self) -> Result<Connection, ConnectError> {
        let key = self.active_key().to_string();

        let mut excluded_gateways: Vec<String> =
            self.reconnect.excluded.iter().cloned().collect();
        excluded_gateways.sort();

        let request = StartRequest {
            excluded_gateways,
            worker: self.identity.clone(),
        };
        let start = self.api.start(&key, &request).await?;
        debug!(
            connection_id = %start.connection_id,
            gateway_group = %start.gateway_group,
            "Start handshake complete"
        );

        let connect = WorkerConnect {
            session_token: start.session_token.clone(),
            sync_token: start.sync_token.clone(),
            capabilities: self.capabilities.clone(),
            apps: self.deps.registry.manifests(),
            worker: self.identity.clone(),
        };

        match Connection::establish(
            &start,
            connect,
            self.config.gateway_url_override.as_ref(),
            Arc::clone(&self.deps),
        )
        .await
        {
            Ok(conn) => Ok(conn),
            Err(e) => {
                warn!(
                    gateway_group = %start.gateway_group,
                    error = %e,
                    "Gateway handshake failed, excluding group"
                );
                self.reconnect
                    .excluded
                    .insert(start.gateway_group.clone());
                Err(e)
            }
        }
    }

    /// Classify a failed attempt: swap keys on auth rejection, shout
    /// about connection limits, stay quiet otherwise.
    fn note_failure(&mut self, err: &ConnectError) {
        if err.is_auth() {
            error!(
                attempt = self.reconnect.attempt,
                "Start handshake rejected: unauthorized"
            );
            if self.reconnect.active_key == KeySlot::Primary
                && self.config.signing_key_fallback.is_some()
                && !self.reconnect.swapped_this_outage
            {
                warn!("Swapping to the fallback signing key");
                self.reconnect.active_key = KeySlot::Fallback;
                self.reconnect.swapped_this_outage = true;
            }
        } else if err.is_connection_limited() {
            error!(
                attempt = self.reconnect.attempt,
                "Connection limit reached; retrying until capacity returns"
            );
        } else {
            warn!(attempt = self.reconnect.attempt, error = %err, "Connection attempt failed");
        }
    }

    /// Sleep out the backoff; `false` means the close signal fired.
    async fn backoff_sleep(&mut self) -> bool {
        let delay = jittered_delay(self.reconnect.attempt.saturating_sub(1));
        info!(
            attempt = self.reconnect.attempt,
            backoff_ms = delay.as_millis() as u64,
            "Waiting before reconnect"
        );
        tokio::select! {
            _ = sleep(delay) => true,
            _ = self.close_rx.wait_for(|requested| *requested) => false,
        }
    }

    fn active_key(&self) -> &str {
        match self.reconnect.active_key {
            KeySlot::Fallback => self
                .config
                .signing_key_fallback
                .as_deref()
                .or(self.config.signing_key.as_deref())
                .unwrap_or(""),
            KeySlot::Primary => self.config.signing_key.as_deref().unwrap_or(""),
        }
    }

    fn inactive_key(&self) -> Option<String> {
        match self.reconnect.active_key {
            KeySlot::Primary => self.config.signing_key_fallback.clone(),
            KeySlot::Fallback => self.config.signing_key.clone(),
        }
    }

    /// The shutdown sequence. `active` is the connection that observed
    /// the close signal, if any.
    async fn shutdown(self, active: Option<Connection>) {
        info!("Shutting down worker");
        self.set_state(WorkerState::Closing);
        self.deps.router.mark_closing();

        let primary = self
            .config
            .signing_key
            .clone()
            .unwrap_or_default();
        let fallback = self.config.signing_key_fallback.clone();
        let keys = FlushKeys {
            primary: &primary,
            fallback: fallback.as_deref(),
        };

        match active {
            Some(conn) => {
                // The closing loop keeps reading (and dropping) frames
                // while user code finishes.
                let stopper = conn.sender();
                let closing = tokio::spawn(conn.run_closing());

                self.deps.in_flight.wait().await;
                self.deps.buffer.promote_all();
                self.deps.buffer.flush(&self.api, keys).await;

                let _ = stopper.send(ConnEvent::Stop);
                let _ = closing.await;
            }
            None => {
                self.deps.in_flight.wait().await;
                self.deps.buffer.promote_all();
                self.deps.buffer.flush(&self.api, keys).await;
            }
        }

        *self.connection_id.write() = None;
        self.deps.bridge.notify(BridgeNotice::Closed);
        self.set_state(WorkerState::Closed);
        info!("Worker closed");
    }

    fn set_state(&self, state: WorkerState) {
        let changed = self.state_tx.send_if_modified(|current| {
            if *current != state {
                *current = state;
                true
            } else {
                false
            }
        });
        if changed {
            info!(state = %state, "Worker state changed");
            self.deps.events.emit(WorkerEvent::StateChanged {
                state,
                at: SystemTime::now(),
            });
            self.deps
                .bridge
                .notify(BridgeNotice::StateChange(state));
        }
    }
}
