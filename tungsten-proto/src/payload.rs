//! Typed payloads for the gateway message union.
//!
//! Opaque byte blobs (function metadata, request and response bodies) are
//! carried base64-encoded; the worker never interprets them.

use base64::engine::general_purpose::STANDARD as BASE64;
use base64::Engine;
use serde::{Deserialize, Serialize};

// ============================================================================
// WORKER_CONNECT (second handshake step, worker -> gateway)
// ============================================================================

/// Payload of `WORKER_CONNECT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerConnect {
    /// Session token from the start handshake.
    pub session_token: String,

    /// Sync token from the start handshake.
    pub sync_token: String,

    /// Capability blob; forwarded verbatim.
    pub capabilities: serde_json::Value,

    /// Apps this worker serves.
    pub apps: Vec<AppManifest>,

    /// Static worker attributes.
    pub worker: WorkerIdentity,
}

/// One registered app as announced to the gateway.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppManifest {
    /// App client id; unique within one worker.
    pub app_id: String,

    /// Optional app version tag.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub app_version: Option<String>,

    /// Opaque function-metadata blob, base64-encoded.
    pub functions: String,
}

impl AppManifest {
    /// Build a manifest from the raw function-metadata bytes.
    pub fn new(app_id: impl Into<String>, version: Option<String>, functions: &[u8]) -> Self {
        Self {
            app_id: app_id.into(),
            app_version: version,
            functions: BASE64.encode(functions),
        }
    }
}

/// Static worker attributes sent with `WORKER_CONNECT`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerIdentity {
    /// SDK version string.
    pub sdk_version: String,

    /// Host platform identifier.
    pub platform: String,

    /// Worker instance id (defaults to the hostname).
    pub instance_id: String,

    /// Declared maximum concurrent executions, if bounded.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_concurrency: Option<u32>,

    /// Unix-epoch start timestamp, milliseconds.
    pub started_at: u64,
}

// ============================================================================
// GATEWAY_CONNECTION_READY (handshake completion, gateway -> worker)
// ============================================================================

/// Payload of `GATEWAY_CONNECTION_READY`.
///
/// The intervals arrive as free-form duration strings; parse defensively
/// and fall back to 10 s / 5 s rather than failing the handshake.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ConnectionReady {
    /// Heartbeat cadence, e.g. `"10s"`.
    pub heartbeat_interval: String,

    /// Lease-extension cadence, e.g. `"5s"`.
    pub extend_lease_interval: String,
}

// ============================================================================
// GATEWAY_EXECUTOR_REQUEST and its worker-side acknowledgements
// ============================================================================

/// Payload of `GATEWAY_EXECUTOR_REQUEST`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutorRequest {
    /// Request id; the key for acks, leases, and buffered replies.
    pub request_id: String,

    /// App the target function belongs to.
    pub app_id: String,

    /// Slug of the target function within the app.
    pub function_slug: String,

    /// Initial lease id granted by the gateway.
    pub lease_id: String,

    /// Opaque request body, base64-encoded.
    pub payload: String,
}

impl ExecutorRequest {
    /// Build a request from raw body bytes.
    pub fn new(
        request_id: impl Into<String>,
        app_id: impl Into<String>,
        function_slug: impl Into<String>,
        lease_id: impl Into<String>,
        body: &[u8],
    ) -> Self {
        Self {
            request_id: request_id.into(),
            app_id: app_id.into(),
            function_slug: function_slug.into(),
            lease_id: lease_id.into(),
            payload: BASE64.encode(body),
        }
    }

    /// Decode the opaque request body.
    pub fn body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.payload)
    }
}

/// Payload of `WORKER_REQUEST_ACK`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RequestAck {
    /// Acknowledged request id.
    pub request_id: String,
}

/// Payload of `WORKER_REPLY`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerReply {
    /// Request this reply answers.
    pub request_id: String,

    /// HTTP-shaped status of the execution.
    pub status: u16,

    /// Opaque response body, base64-encoded.
    pub body: String,

    /// Whether the scheduler should skip retrying this request.
    pub no_retry: bool,
}

impl WorkerReply {
    /// Build a reply from raw response-body bytes.
    pub fn new(request_id: impl Into<String>, status: u16, body: &[u8], no_retry: bool) -> Self {
        Self {
            request_id: request_id.into(),
            status,
            body: BASE64.encode(body),
            no_retry,
        }
    }

    /// Decode the opaque response body.
    pub fn body(&self) -> Result<Vec<u8>, base64::DecodeError> {
        BASE64.decode(&self.body)
    }
}

/// Payload of `WORKER_REPLY_ACK`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReplyAck {
    /// Acknowledged request id.
    pub request_id: String,
}

// ============================================================================
// Lease extension
// ============================================================================

/// Payload of `WORKER_REQUEST_EXTEND_LEASE`.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendLease {
    /// In-flight request id.
    pub request_id: String,

    /// Most recent lease id acknowledged by the gateway.
    pub lease_id: String,
}

/// Payload of `WORKER_REQUEST_EXTEND_LEASE_ACK`.
///
/// A missing `new_lease_id` means the gateway has given up on redelivery
/// tracking for this request; the worker stops extension traffic but the
/// request stays in flight.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExtendLeaseAck {
    /// In-flight request id.
    pub request_id: String,

    /// Renewed lease id, if the gateway granted one.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub new_lease_id: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_connection_ready() {
        let json = r#"{"heartbeat_interval":"10s","extend_lease_interval":"5s"}"#;
        let ready: ConnectionReady = serde_json::from_str(json).unwrap();
        assert_eq!(ready.heartbeat_interval, "10s");
        assert_eq!(ready.extend_lease_interval, "5s");
    }

    #[test]
    fn test_reply_body_round_trip() {
        let reply = WorkerReply::new("r1", 200, br#"{"ok":true}"#, false);
        assert_eq!(reply.body().unwrap(), br#"{"ok":true}"#);

        let json = serde_json::to_string(&reply).unwrap();
        let back: WorkerReply = serde_json::from_str(&json).unwrap();
        assert_eq!(back.request_id, "r1");
        assert_eq!(back.status, 200);
        assert!(!back.no_retry);
    }

    #[test]
    fn test_extend_lease_ack_without_new_lease() {
        let ack: ExtendLeaseAck = serde_json::from_str(r#"{"request_id":"r1"}"#).unwrap();
        assert!(ack.new_lease_id.is_none());

        let json = serde_json::to_string(&ack).unwrap();
        assert_eq!(json, r#"{"request_id":"r1"}"#);
    }

    #[test]
    fn test_manifest_encodes_functions() {
        let manifest = AppManifest::new("app-a", Some("1.0".to_string()), b"opaque");
        assert_eq!(manifest.functions, BASE64.encode(b"opaque"));
    }
}
