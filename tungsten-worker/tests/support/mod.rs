//! Shared fixtures for the end-to-end scenario tests: a scriptable mock
//! Connect API (start + flush endpoints over a raw TcpListener) and a
//! mock gateway speaking the WebSocket protocol.

use parking_lot::Mutex;
use std::collections::VecDeque;
use std::net::SocketAddr;
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncReadExt, AsyncWriteExt};
use tokio::net::{TcpListener, TcpStream};
use tokio::sync::watch;
use tokio::time::timeout;
use tokio_tungstenite::tungstenite::http::HeaderValue;
use tokio_tungstenite::tungstenite::Message;
use tokio_tungstenite::{accept_hdr_async, WebSocketStream};
use futures_util::{SinkExt, StreamExt};
use tungsten_proto::{ConnectionReady, Frame, FrameKind, StartResponse, WorkerConnect};
use tungsten_worker::WorkerState;

pub const PRIMARY_KEY: &str = "signkey-test-00ff";
pub const FALLBACK_KEY: &str = "signkey-test-00aa";

pub type WsServer = WebSocketStream<TcpStream>;

/// One scripted reply from the start endpoint.
pub enum StartScript {
    Ok { gateway_group: &'static str },
    Unauthorized,
}

/// What the mock API observed.
#[derive(Default)]
pub struct ApiLog {
    /// Bearer token of each start POST, in order.
    pub start_bearers: Vec<String>,
    /// Body of each flush POST, in order.
    pub flush_bodies: Vec<Vec<u8>>,
}

pub struct MockApi {
    pub addr: SocketAddr,
    pub log: Arc<Mutex<ApiLog>>,
}

impl MockApi {
    pub fn base_url(&self) -> url::Url {
        url::Url::parse(&format!("http://{}", self.addr)).unwrap()
    }

    pub fn flush_count(&self) -> usize {
        self.log.lock().flush_bodies.len()
    }
}

/// Spawn the mock API. Start POSTs consume the script in order (500 once
/// it runs dry); flush POSTs always succeed and are recorded.
pub async fn spawn_api(gateway_url: String, script: Vec<StartScript>) -> MockApi {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let addr = listener.local_addr().unwrap();
    let log: Arc<Mutex<ApiLog>> = Arc::default();
    let script = Arc::new(Mutex::new(VecDeque::from(script)));

    let task_log = Arc::clone(&log);
    tokio::spawn(async move {
        let mut connection_seq = 0u32;
        loop {
            let Ok((mut sock, _)) = listener.accept().await else {
                return;
            };
            let (head, body) = read_request(&mut sock).await;

            if head.contains("/v0/connect/start") {
                task_log.lock().start_bearers.push(bearer_of(&head));
                let reply = script.lock().pop_front();
                match reply {
                    Some(StartScript::Ok { gateway_group }) => {
                        connection_seq += 1;
                        let response = StartResponse {
                            connection_id: format!("conn-{connection_seq}"),
                            session_token: format!("session-{connection_seq}"),
                            sync_token: format!("sync-{connection_seq}"),
                            gateway_endpoint: gateway_url.clone(),
                            gateway_group: gateway_group.to_string(),
                        };
                        respond(&mut sock, "200 OK", &serde_json::to_vec(&response).unwrap())
                            .await;
                    }
                    Some(StartScript::Unauthorized) => {
                        respond(&mut sock, "401 Unauthorized", b"{}").await;
                    }
                    None => {
                        respond(&mut sock, "500 Internal Server Error", b"{}").await;
                    }
                }
            } else if head.contains("/v0/connect/flush") {
                task_log.lock().flush_bodies.push(body);
                respond(&mut sock, "200 OK", b"{}").await;
            } else {
                respond(&mut sock, "404 Not Found", b"{}").await;
            }
        }
    });

    MockApi { addr, log }
}

async fn read_request(sock: &mut TcpStream) -> (String, Vec<u8>) {
    let mut buf = Vec::new();
    let mut tmp = [0u8; 4096];
    loop {
        let Ok(n) = sock.read(&mut tmp).await else {
            return (String::new(), Vec::new());
        };
        if n == 0 {
            return (String::from_utf8_lossy(&buf).to_string(), Vec::new());
        }
        buf.extend_from_slice(&tmp[..n]);

        if let Some(split) = find(&buf, b"\r\n\r\n") {
            let head = String::from_utf8_lossy(&buf[..split]).to_string();
            let content_length = head
                .lines()
                .find_map(|line| {
                    let (name, value) = line.split_once(':')?;
                    name.eq_ignore_ascii_case("content-length")
                        .then(|| value.trim().parse::<usize>().ok())?
                })
                .unwrap_or(0);

            let mut body = buf[split + 4..].to_vec();
            while body.len() < content_length {
                let Ok(n) = sock.read(&mut tmp).await else { break };
                if n == 0 {
                    break;
                }
                body.extend_from_slice(&tmp[..n]);
            }
            return (head, body);
        }
    }
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack
        .windows(needle.len())
        .position(|window| window == needle)
}

fn bearer_of(head: &str) -> String {
    head.lines()
        .find_map(|line| {
            let (name, value) = line.split_once(':')?;
            name.eq_ignore_ascii_case("authorization")
                .then(|| value.trim().trim_start_matches("Bearer ").to_string())
        })
        .unwrap_or_default()
}

async fn respond(sock: &mut TcpStream, status: &str, body: &[u8]) {
    let head = format!(
        "HTTP/1.1 {status}\r\ncontent-type: application/json\r\ncontent-length: {}\r\nconnection: close\r\n\r\n",
        body.len()
    );
    let _ = sock.write_all(head.as_bytes()).await;
    let _ = sock.write_all(body).await;
    let _ = sock.shutdown().await;
}

/// Bind the mock gateway listener.
pub async fn gateway_listener() -> (TcpListener, String) {
    let listener = TcpListener::bind("127.0.0.1:0").await.unwrap();
    let url = format!("ws://{}", listener.local_addr().unwrap());
    (listener, url)
}

/// Accept one worker connection, echoing the sub-protocol.
pub async fn gateway_accept(listener: &TcpListener) -> WsServer {
    let (stream, _) = timeout(Duration::from_secs(10), listener.accept())
        .await
        .expect("no worker connection")
        .unwrap();
    accept_hdr_async(stream, |_request: &_, mut response: tokio_tungstenite::tungstenite::handshake::server::Response| {
        response.headers_mut().insert(
            "Sec-WebSocket-Protocol",
            HeaderValue::from_static(tungsten_proto::GATEWAY_SUBPROTOCOL),
        );
        Ok(response)
    })
    .await
    .unwrap()
}

pub async fn send_frame(ws: &mut WsServer, frame: Frame) {
    ws.send(Message::Binary(frame.encode().unwrap().into()))
        .await
        .unwrap();
}

/// Read frames until one of the wanted kind arrives, skipping heartbeats
/// and anything else along the way.
pub async fn expect_frame(ws: &mut WsServer, kind: FrameKind) -> Frame {
    loop {
        let message = timeout(Duration::from_secs(10), ws.next())
            .await
            .unwrap_or_else(|_| panic!("timed out waiting for {kind}"))
            .unwrap_or_else(|| panic!("stream ended waiting for {kind}"))
            .unwrap();
        match message {
            Message::Binary(data) => {
                let frame = Frame::decode(&data).unwrap();
                if frame.kind == kind {
                    return frame;
                }
            }
            Message::Close(_) => panic!("connection closed waiting for {kind}"),
            _ => {}
        }
    }
}

/// Drive the gateway side of the three-step handshake.
pub async fn gateway_handshake(ws: &mut WsServer, heartbeat: &str, lease: &str) -> WorkerConnect {
    send_frame(ws, Frame::kind_only(FrameKind::GatewayHello)).await;

    let connect = expect_frame(ws, FrameKind::WorkerConnect).await;
    let payload: WorkerConnect = connect.parse().unwrap();

    send_frame(
        ws,
        Frame::new(
            FrameKind::GatewayConnectionReady,
            &ConnectionReady {
                heartbeat_interval: heartbeat.to_string(),
                extend_lease_interval: lease.to_string(),
            },
        )
        .unwrap(),
    )
    .await;

    payload
}

pub async fn wait_for_state(rx: &mut watch::Receiver<WorkerState>, state: WorkerState) {
    timeout(Duration::from_secs(10), rx.wait_for(|s| *s == state))
        .await
        .unwrap_or_else(|_| panic!("timed out waiting for state {state}"))
        .unwrap();
}
