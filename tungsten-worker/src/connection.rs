//! One gateway connection: handshake state machine, steady-state frame
//! dispatch, drain and closing loops.
//!
//! The connection core is the single writer of its WebSocket. Everything
//! that wants a frame on the wire — lease timers, completed executions,
//! the supervisor — posts a [`ConnEvent`] to the inbox and the core does
//! the write.

use crate::bridge::ExecutionBridge;
use crate::buffer::ResponseBuffer;
use crate::error::ConnectError;
use crate::events::{EventBus, RequestOutcome, WorkerEvent};
use crate::heartbeat::HeartbeatTracker;
use crate::metrics::WorkerMetrics;
use crate::registry::{FunctionInput, FunctionRegistry};
use crate::router::{ConnEvent, ConnectionTicket, ReplyRouter};
use crate::shutdown::WaitGroup;
use crate::{DEFAULT_EXTEND_LEASE_INTERVAL, DEFAULT_HEARTBEAT_INTERVAL, HANDSHAKE_BUDGET};

use futures_util::stream::{SplitSink, SplitStream};
use futures_util::{SinkExt, StreamExt};
use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};
use tokio::net::TcpStream;
use tokio::sync::watch;
use tokio::time::{sleep, timeout};
use tokio_tungstenite::tungstenite::client::IntoClientRequest;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::protocol::CloseFrame;
use tokio_tungstenite::tungstenite::Message as WsMessage;
use tokio_tungstenite::{connect_async, MaybeTlsStream, WebSocketStream};
use tracing::{debug, error, info, trace, warn};
use tungsten_proto::{
    ConnectionReady, ExecutorRequest, ExtendLease, ExtendLeaseAck, Frame, FrameKind, ReplyAck,
    RequestAck, StartResponse, WorkerConnect, WorkerReply, parse_interval, CLOSE_NORMAL,
    CLOSE_UNEXPECTED, GATEWAY_SUBPROTOCOL, REASON_UNEXPECTED, REASON_WORKER_SHUTDOWN,
};
use url::Url;

/// Type alias for the WebSocket stream.
type WsStream = WebSocketStream<MaybeTlsStream<TcpStream>>;

/// Why the steady-state loop returned.
#[derive(Debug)]
pub enum ConnExit {
    /// Transport or protocol failure; the supervisor classifies it and
    /// reconnects.
    Broken(ConnectError),

    /// `GATEWAY_CLOSING` arrived; the supervisor establishes a successor
    /// while this connection keeps serving accepted requests.
    Draining,

    /// The close signal fired.
    ShutdownRequested,
}

enum Flow {
    Continue,
    Drain,
}

/// Shared collaborators every connection needs.
pub struct ConnectionDeps {
    pub registry: Arc<FunctionRegistry>,
    pub bridge: Arc<dyn ExecutionBridge>,
    pub buffer: Arc<ResponseBuffer>,
    pub router: Arc<ReplyRouter>,
    pub metrics: Arc<WorkerMetrics>,
    pub events: EventBus,
    pub in_flight: WaitGroup,
}

struct InFlight {
    /// Most recent lease id acknowledged by the gateway.
    lease_id: String,
    /// Cleared when the gateway stops granting renewals.
    extendable: bool,
    /// The request's lease-extension timer.
    timer: tokio::task::JoinHandle<()>,
}

/// One established gateway connection.
pub struct Connection {
    id: String,
    gateway_group: String,
    sink: SplitSink<WsStream, WsMessage>,
    stream: SplitStream<WsStream>,
    heartbeat: HeartbeatTracker,
    lease_interval: Duration,
    in_flight: HashMap<String, InFlight>,
    inbox_tx: flume::Sender<ConnEvent>,
    inbox_rx: flume::Receiver<ConnEvent>,
    drained: Arc<AtomicBool>,
    deps: Arc<ConnectionDeps>,
}

impl Connection {
    /// Open the socket and drive the three-step handshake, all under one
    /// wall-clock budget.
    pub async fn establish(
        start: &StartResponse,
        connect: WorkerConnect,
        gateway_url_override: Option<&Url>,
        deps: Arc<ConnectionDeps>,
    ) -> Result<Self, ConnectError> {
        let url = match gateway_url_override {
            Some(url) => url.clone(),
            None => Url::parse(&start.gateway_endpoint)?,
        };

        let mut request = url.as_str().into_client_request()?;
        request.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(GATEWAY_SUBPROTOCOL),
        );

        info!(connection_id = %start.connection_id, url = %url, "Connecting to gateway");

        match timeout(HANDSHAKE_BUDGET, Self::handshake(request, start, connect, deps)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(connection_id = %start.connection_id, "Handshake timed out");
                Err(ConnectError::HandshakeTimeout)
            }
        }
    }

    async fn handshake(
        request: tokio_tungstenite::tungstenite::handshake::client::Request,
        start: &StartResponse,
        connect: WorkerConnect,
        deps: Arc<ConnectionDeps>,
    ) -> Result<Self, ConnectError> {
        let (ws, _response) = connect_async(request).await?;
        let (mut sink, mut stream) = ws.split();

        // Step 1: the gateway speaks first.
        let hello = Self::expect_frame(&mut stream).await?;
        if hello.kind != FrameKind::GatewayHello {
            Self::abort_handshake(&mut sink).await;
            return Err(ConnectError::UnexpectedFrame {
                expected: FrameKind::GatewayHello,
                received: hello.kind,
            });
        }

        // Step 2: announce ourselves.
        let frame = Frame::new(FrameKind::WorkerConnect, &connect)?;
        sink.send(WsMessage::Binary(frame.encode()?.into())).await?;

        // Step 3: the gateway confirms and hands out the intervals.
        let ready_frame = Self::expect_frame(&mut stream).await?;
        if ready_frame.kind != FrameKind::GatewayConnectionReady {
            Self::abort_handshake(&mut sink).await;
            return Err(ConnectError::UnexpectedFrame {
                expected: FrameKind::GatewayConnectionReady,
                received: ready_frame.kind,
            });
        }
        let ready: ConnectionReady = ready_frame.parse()?;

        let heartbeat_interval =
            parse_interval(&ready.heartbeat_interval).unwrap_or(DEFAULT_HEARTBEAT_INTERVAL);
        let lease_interval =
            parse_interval(&ready.extend_lease_interval).unwrap_or(DEFAULT_EXTEND_LEASE_INTERVAL);

        info!(
            connection_id = %start.connection_id,
            gateway_group = %start.gateway_group,
            heartbeat_interval_ms = heartbeat_interval.as_millis() as u64,
            lease_interval_ms = lease_interval.as_millis() as u64,
            "Connection ready"
        );

        let (inbox_tx, inbox_rx) = flume::unbounded();

        Ok(Self {
            id: start.connection_id.clone(),
            gateway_group: start.gateway_group.clone(),
            sink,
            stream,
            heartbeat: HeartbeatTracker::new(heartbeat_interval),
            lease_interval,
            in_flight: HashMap::new(),
            inbox_tx,
            inbox_rx,
            drained: Arc::new(AtomicBool::new(false)),
            deps,
        })
    }

    async fn expect_frame(stream: &mut SplitStream<WsStream>) -> Result<Frame, ConnectError> {
        loop {
            match stream.next().await {
                Some(Ok(WsMessage::Binary(data))) => return Ok(Frame::decode(&data)?),
                Some(Ok(WsMessage::Text(text))) => {
                    return Ok(Frame::decode(text.as_str().as_bytes())?)
                }
                Some(Ok(WsMessage::Close(frame))) => {
                    let (code, reason) = frame
                        .map(|f: CloseFrame| (f.code.into(), f.reason.to_string()))
                        .unwrap_or((0, String::new()));
                    return Err(ConnectError::Closed { code, reason });
                }
                Some(Ok(_)) => continue,
                Some(Err(e)) => return Err(ConnectError::Socket(e)),
                None => {
                    return Err(ConnectError::Closed {
                        code: 0,
                        reason: "socket ended during handshake".to_string(),
                    })
                }
            }
        }
    }

    async fn abort_handshake(sink: &mut SplitSink<WsStream, WsMessage>) {
        let frame = CloseFrame {
            code: CLOSE_UNEXPECTED.into(),
            reason: REASON_UNEXPECTED.into(),
        };
        let _ = sink.send(WsMessage::Close(Some(frame))).await;
        let _ = sink.close().await;
    }

    /// Gateway-assigned connection id.
    pub fn id(&self) -> &str {
        &self.id
    }

    /// Group tag of the gateway this connection landed on.
    pub fn gateway_group(&self) -> &str {
        &self.gateway_group
    }

    /// Sender onto this connection's inbox.
    pub fn sender(&self) -> flume::Sender<ConnEvent> {
        self.inbox_tx.clone()
    }

    /// Handle for execution tasks spawned off this connection.
    pub fn ticket(&self) -> ConnectionTicket {
        ConnectionTicket {
            events: self.inbox_tx.clone(),
            drained: Arc::clone(&self.drained),
        }
    }

    /// Steady-state loop. Returns when the connection breaks, the gateway
    /// starts draining, or the close signal fires.
    pub async fn run(&mut self, close: &mut watch::Receiver<bool>) -> ConnExit {
        let mut next_heartbeat = Instant::now() + self.heartbeat.interval();

        loop {
            tokio::select! {
                message = self.stream.next() => {
                    match message {
                        Some(Ok(msg)) => match self.handle_message(msg, true).await {
                            Ok(Flow::Continue) => {}
                            Ok(Flow::Drain) => return ConnExit::Draining,
                            Err(e) => return ConnExit::Broken(e),
                        },
                        Some(Err(e)) => return ConnExit::Broken(ConnectError::Socket(e)),
                        None => {
                            return ConnExit::Broken(ConnectError::Closed {
                                code: 0,
                                reason: "WebSocket stream ended".to_string(),
                            })
                        }
                    }
                }

                _ = sleep(next_heartbeat.saturating_duration_since(Instant::now())) => {
                    if self.heartbeat.is_stale() {
                        error!(
                            connection_id = %self.id,
                            pending = self.heartbeat.pending(),
                            "Gateway stopped answering heartbeats, assuming broken connection"
                        );
                        return ConnExit::Broken(ConnectError::HeartbeatTimeout);
                    }
                    self.heartbeat.mark_sent();
                    if let Err(e) = self.send_frame(&Frame::kind_only(FrameKind::WorkerHeartbeat)).await {
                        return ConnExit::Broken(e);
                    }
                    self.deps.metrics.inc_heartbeats_sent();
                    next_heartbeat = Instant::now() + self.heartbeat.interval();
                }

                event = self.inbox_rx.recv_async() => {
                    match event {
                        Ok(event) => {
                            if let Err(e) = self.handle_event(event).await {
                                return ConnExit::Broken(e);
                            }
                        }
                        Err(_) => return ConnExit::Broken(ConnectError::ChannelClosed),
                    }
                }

                _ = async {
                    loop {
                        if *close.borrow() {
                            return;
                        }
                        if close.changed().await.is_err() {
                            return;
                        }
                    }
                } => {
                    info!(connection_id = %self.id, "Close requested");
                    return ConnExit::ShutdownRequested;
                }
            }
        }
    }

    /// Drain loop, spawned once the successor connection is active.
    ///
    /// Sends `WORKER_PAUSE`, keeps serving the requests this connection
    /// already accepted, and closes once none remain. Replies that arrive
    /// after the socket is gone are handed to the successor.
    pub async fn run_drain(mut self) {
        info!(connection_id = %self.id, in_flight = self.in_flight.len(), "Pausing drained connection");

        let mut alive = self
            .send_frame(&Frame::kind_only(FrameKind::WorkerPause))
            .await
            .is_ok();

        while !self.in_flight.is_empty() {
            tokio::select! {
                message = self.stream.next(), if alive => {
                    match message {
                        Some(Ok(msg)) => {
                            if let Err(e) = self.handle_message(msg, false).await {
                                debug!(connection_id = %self.id, error = %e, "Draining socket lost");
                                alive = false;
                            }
                        }
                        Some(Err(_)) | None => alive = false,
                    }
                }

                event = self.inbox_rx.recv_async() => {
                    let Ok(event) = event else { break };
                    match event {
                        ConnEvent::Reply { request_id, bytes } => {
                            let written = alive
                                && self
                                    .sink
                                    .send(WsMessage::Binary(bytes.clone().into()))
                                    .await
                                    .is_ok();
                            if !written {
                                alive = false;
                                // The successor carries what we no longer can.
                                self.deps.router.forward_to_active(ConnEvent::Reply {
                                    request_id: request_id.clone(),
                                    bytes,
                                });
                            }
                            self.retire(&request_id);
                        }
                        ConnEvent::Retire { request_id } => self.retire(&request_id),
                        ConnEvent::ExtendLease { request_id } => {
                            if alive {
                                if let Err(e) = self.extend_lease(&request_id).await {
                                    debug!(connection_id = %self.id, error = %e, "Draining socket lost");
                                    alive = false;
                                }
                            }
                        }
                        ConnEvent::Stop => break,
                        ConnEvent::Pause => {}
                    }
                }
            }
        }

        if alive {
            self.close_socket(CLOSE_NORMAL, REASON_WORKER_SHUTDOWN).await;
        }
        self.drained.store(true, Ordering::SeqCst);
        self.abort_lease_timers();
        info!(connection_id = %self.id, "Drained connection closed");
    }

    /// Closing loop, spawned by the shutdown coordinator. Reads and drops
    /// new executor requests, keeps heartbeating, and finishes on `Stop`
    /// with `WORKER_PAUSE` and a normal close.
    pub async fn run_closing(mut self) {
        let mut alive = true;
        let mut next_heartbeat = Instant::now() + self.heartbeat.interval();

        loop {
            tokio::select! {
                message = self.stream.next(), if alive => {
                    match message {
                        Some(Ok(msg)) => {
                            if self.handle_message(msg, false).await.is_err() {
                                alive = false;
                            }
                        }
                        Some(Err(_)) | None => alive = false,
                    }
                }

                _ = sleep(next_heartbeat.saturating_duration_since(Instant::now())), if alive => {
                    if !self.heartbeat.is_stale() {
                        self.heartbeat.mark_sent();
                        if self
                            .send_frame(&Frame::kind_only(FrameKind::WorkerHeartbeat))
                            .await
                            .is_err()
                        {
                            alive = false;
                        }
                    }
                    next_heartbeat = Instant::now() + self.heartbeat.interval();
                }

                event = self.inbox_rx.recv_async() => {
                    let Ok(event) = event else { break };
                    match event {
                        ConnEvent::Stop => break,
                        ConnEvent::Retire { request_id } => self.retire(&request_id),
                        ConnEvent::ExtendLease { request_id } => {
                            if alive && self.extend_lease(&request_id).await.is_err() {
                                alive = false;
                            }
                        }
                        // Replies are routed to the buffer while closing;
                        // the shutdown flush owns delivery.
                        ConnEvent::Reply { request_id, .. } => self.retire(&request_id),
                        ConnEvent::Pause => {}
                    }
                }
            }
        }

        if alive {
            let _ = self
                .send_frame(&Frame::kind_only(FrameKind::WorkerPause))
                .await;
            self.close_socket(CLOSE_NORMAL, REASON_WORKER_SHUTDOWN).await;
        }
        self.abort_lease_timers();
    }

    /// Tear the connection down without ceremony (broken socket or failed
    /// drain hand-off).
    pub async fn teardown(mut self) {
        self.abort_lease_timers();
        self.close_socket(CLOSE_NORMAL, REASON_WORKER_SHUTDOWN).await;
    }

    async fn handle_message(
        &mut self,
        message: WsMessage,
        accepting: bool,
    ) -> Result<Flow, ConnectError> {
        match message {
            WsMessage::Binary(data) => {
                let frame = Frame::decode(&data)?;
                self.handle_frame(frame, accepting).await
            }
            WsMessage::Text(text) => {
                let frame = Frame::decode(text.as_str().as_bytes())?;
                self.handle_frame(frame, accepting).await
            }
            WsMessage::Close(frame) => {
                let (code, reason) = frame
                    .map(|f: CloseFrame| (f.code.into(), f.reason.to_string()))
                    .unwrap_or((0, String::new()));
                Err(ConnectError::Closed { code, reason })
            }
            WsMessage::Ping(data) => {
                self.sink.send(WsMessage::Pong(data)).await?;
                Ok(Flow::Continue)
            }
            WsMessage::Pong(_) | WsMessage::Frame(_) => Ok(Flow::Continue),
        }
    }

    async fn handle_frame(&mut self, frame: Frame, accepting: bool) -> Result<Flow, ConnectError> {
        match frame.kind {
            FrameKind::GatewayHeartbeat => {
                trace!(connection_id = %self.id, "Gateway heartbeat");
                self.heartbeat.record_gateway_beat();
                self.deps.metrics.inc_gateway_heartbeats();
            }

            FrameKind::GatewayClosing => {
                if accepting {
                    info!(connection_id = %self.id, "Gateway is draining this connection");
                    self.deps.metrics.inc_drains();
                    return Ok(Flow::Drain);
                }
            }

            FrameKind::GatewayExecutorRequest => {
                let request: ExecutorRequest = frame.parse()?;
                if accepting {
                    self.accept_request(request).await?;
                } else {
                    debug!(
                        connection_id = %self.id,
                        request_id = %request.request_id,
                        "Dropping executor request: connection not accepting work"
                    );
                }
            }

            FrameKind::WorkerReplyAck => {
                let ack: ReplyAck = frame.parse()?;
                self.deps.buffer.ack(&ack.request_id);
            }

            FrameKind::WorkerRequestExtendLeaseAck => {
                let ack: ExtendLeaseAck = frame.parse()?;
                if let Some(entry) = self.in_flight.get_mut(&ack.request_id) {
                    match ack.new_lease_id {
                        Some(lease_id) => {
                            trace!(connection_id = %self.id, request_id = %ack.request_id, "Lease renewed");
                            entry.lease_id = lease_id;
                        }
                        None => {
                            warn!(
                                connection_id = %self.id,
                                request_id = %ack.request_id,
                                "Gateway stopped extending lease; request continues unextended"
                            );
                            entry.extendable = false;
                            entry.timer.abort();
                        }
                    }
                }
            }

            other => {
                debug!(connection_id = %self.id, kind = %other, "Ignoring frame");
            }
        }
        Ok(Flow::Continue)
    }

    /// Accept one executor request: ack, register, lease, hand off.
    async fn accept_request(&mut self, request: ExecutorRequest) -> Result<(), ConnectError> {
        if !self.deps.registry.has_app(&request.app_id) {
            warn!(
                connection_id = %self.id,
                request_id = %request.request_id,
                app_id = %request.app_id,
                "Dropping request for unknown app"
            );
            return Ok(());
        }

        let body = request
            .body()
            .map_err(|e| tungsten_proto::ProtoError::MalformedFrame(e.to_string()))?;

        let ack = RequestAck {
            request_id: request.request_id.clone(),
        };
        self.send_frame(&Frame::new(FrameKind::WorkerRequestAck, &ack)?)
            .await?;

        self.deps.metrics.inc_requests_received();
        self.deps.events.emit(WorkerEvent::RequestStarted {
            request_id: request.request_id.clone(),
        });

        // One lease timer per in-flight request; it posts to the inbox
        // and the core does the write.
        let timer = {
            let inbox = self.inbox_tx.clone();
            let interval = self.lease_interval;
            let request_id = request.request_id.clone();
            tokio::spawn(async move {
                loop {
                    sleep(interval).await;
                    if inbox
                        .send(ConnEvent::ExtendLease {
                            request_id: request_id.clone(),
                        })
                        .is_err()
                    {
                        break;
                    }
                }
            })
        };
        if let Some(old) = self.in_flight.insert(
            request.request_id.clone(),
            InFlight {
                lease_id: request.lease_id.clone(),
                extendable: true,
                timer,
            },
        ) {
            // Gateway redelivered an id we still track; drop the stale timer.
            old.timer.abort();
        }

        let input = FunctionInput {
            request_id: request.request_id.clone(),
            app_id: request.app_id,
            function_slug: request.function_slug,
            body,
        };
        let deps = Arc::clone(&self.deps);
        let ticket = self.ticket();
        let guard = self.deps.in_flight.guard();
        tokio::spawn(async move {
            let started = Instant::now();
            let request_id = input.request_id.clone();
            let outcome = deps.bridge.execute(input).await;
            let outcome_kind = if outcome.is_success() {
                RequestOutcome::Success
            } else {
                RequestOutcome::Error
            };

            let reply =
                WorkerReply::new(&request_id, outcome.status, &outcome.body, outcome.no_retry);
            match Frame::new(FrameKind::WorkerReply, &reply).and_then(|f| f.encode()) {
                Ok(bytes) => deps.router.deliver(&ticket, &request_id, bytes),
                Err(e) => error!(request_id = %request_id, error = %e, "Failed to encode reply"),
            }

            deps.metrics.inc_requests_completed();
            deps.events.emit(WorkerEvent::RequestCompleted {
                request_id,
                duration: started.elapsed(),
                outcome: outcome_kind,
            });
            drop(guard);
        });

        Ok(())
    }

    async fn handle_event(&mut self, event: ConnEvent) -> Result<(), ConnectError> {
        match event {
            ConnEvent::Reply { request_id, bytes } => {
                self.sink.send(WsMessage::Binary(bytes.into())).await?;
                self.retire(&request_id);
            }
            ConnEvent::Retire { request_id } => self.retire(&request_id),
            ConnEvent::ExtendLease { request_id } => self.extend_lease(&request_id).await?,
            ConnEvent::Pause | ConnEvent::Stop => {
                debug!(connection_id = %self.id, "Ignoring drain command while active");
            }
        }
        Ok(())
    }

    async fn extend_lease(&mut self, request_id: &str) -> Result<(), ConnectError> {
        let Some(lease_id) = self
            .in_flight
            .get(request_id)
            .filter(|entry| entry.extendable)
            .map(|entry| entry.lease_id.clone())
        else {
            return Ok(());
        };

        let payload = ExtendLease {
            request_id: request_id.to_string(),
            lease_id,
        };
        self.send_frame(&Frame::new(FrameKind::WorkerRequestExtendLease, &payload)?)
            .await?;
        self.deps.metrics.inc_leases_extended();
        Ok(())
    }

    fn retire(&mut self, request_id: &str) {
        if let Some(entry) = self.in_flight.remove(request_id) {
            entry.timer.abort();
        }
    }

    fn abort_lease_timers(&mut self) {
        for (_, entry) in self.in_flight.drain() {
            entry.timer.abort();
        }
    }

    async fn send_frame(&mut self, frame: &Frame) -> Result<(), ConnectError> {
        let bytes = frame.encode()?;
        self.sink.send(WsMessage::Binary(bytes.into())).await?;
        Ok(())
    }

    async fn close_socket(&mut self, code: u16, reason: &str) {
        let frame = CloseFrame {
            code: code.into(),
            reason: reason.into(),
        };
        let _ = self.sink.send(WsMessage::Close(Some(frame))).await;
        let _ = self.sink.close().await;
    }
}
