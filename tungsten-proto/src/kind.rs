//! Frame kinds for the gateway message union.
//!
//! Kinds are string tags on the wire, one per message in the union.

use serde::{Deserialize, Serialize};

/// Discriminant of a gateway frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum FrameKind {
    /// First frame on a fresh socket.
    /// Direction: Receive
    GatewayHello,

    /// Worker authentication and app announcement.
    /// Direction: Send
    WorkerConnect,

    /// Handshake completion; carries the heartbeat and lease intervals.
    /// Direction: Receive
    GatewayConnectionReady,

    /// Gateway liveness reply; resets the pending-heartbeat counter.
    /// Direction: Receive
    GatewayHeartbeat,

    /// Worker liveness probe.
    /// Direction: Send
    WorkerHeartbeat,

    /// Gateway is draining; the worker must migrate to a new connection.
    /// Direction: Receive
    GatewayClosing,

    /// Worker stops accepting work on this connection.
    /// Direction: Send
    WorkerPause,

    /// Function-execution request dispatched by the scheduler.
    /// Direction: Receive
    GatewayExecutorRequest,

    /// Worker accepted an executor request.
    /// Direction: Send
    WorkerRequestAck,

    /// Function response.
    /// Direction: Send
    WorkerReply,

    /// Gateway acknowledged a reply; the buffered entry can be dropped.
    /// Direction: Receive
    WorkerReplyAck,

    /// Lease renewal for an in-flight request.
    /// Direction: Send
    WorkerRequestExtendLease,

    /// Lease renewal outcome; may carry a new lease id.
    /// Direction: Receive
    WorkerRequestExtendLeaseAck,
}

impl FrameKind {
    /// Returns whether this frame kind is sent by the gateway.
    pub const fn is_gateway_sent(self) -> bool {
        matches!(
            self,
            FrameKind::GatewayHello
                | FrameKind::GatewayConnectionReady
                | FrameKind::GatewayHeartbeat
                | FrameKind::GatewayClosing
                | FrameKind::GatewayExecutorRequest
                | FrameKind::WorkerReplyAck
                | FrameKind::WorkerRequestExtendLeaseAck
        )
    }

    /// Returns whether this frame kind is sent by the worker.
    pub const fn is_worker_sent(self) -> bool {
        !self.is_gateway_sent()
    }

    /// Wire name of this kind.
    pub const fn as_str(self) -> &'static str {
        match self {
            FrameKind::GatewayHello => "GATEWAY_HELLO",
            FrameKind::WorkerConnect => "WORKER_CONNECT",
            FrameKind::GatewayConnectionReady => "GATEWAY_CONNECTION_READY",
            FrameKind::GatewayHeartbeat => "GATEWAY_HEARTBEAT",
            FrameKind::WorkerHeartbeat => "WORKER_HEARTBEAT",
            FrameKind::GatewayClosing => "GATEWAY_CLOSING",
            FrameKind::WorkerPause => "WORKER_PAUSE",
            FrameKind::GatewayExecutorRequest => "GATEWAY_EXECUTOR_REQUEST",
            FrameKind::WorkerRequestAck => "WORKER_REQUEST_ACK",
            FrameKind::WorkerReply => "WORKER_REPLY",
            FrameKind::WorkerReplyAck => "WORKER_REPLY_ACK",
            FrameKind::WorkerRequestExtendLease => "WORKER_REQUEST_EXTEND_LEASE",
            FrameKind::WorkerRequestExtendLeaseAck => "WORKER_REQUEST_EXTEND_LEASE_ACK",
        }
    }
}

impl std::fmt::Display for FrameKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_serialization() {
        let json = serde_json::to_string(&FrameKind::GatewayHello).unwrap();
        assert_eq!(json, "\"GATEWAY_HELLO\"");

        let kind: FrameKind = serde_json::from_str("\"WORKER_REPLY_ACK\"").unwrap();
        assert_eq!(kind, FrameKind::WorkerReplyAck);
    }

    #[test]
    fn test_kind_direction() {
        assert!(FrameKind::GatewayExecutorRequest.is_gateway_sent());
        assert!(FrameKind::WorkerReply.is_worker_sent());
        // The reply ack travels gateway-to-worker despite the WORKER_ prefix.
        assert!(FrameKind::WorkerReplyAck.is_gateway_sent());
        assert!(FrameKind::WorkerRequestExtendLeaseAck.is_gateway_sent());
    }

    #[test]
    fn test_wire_name_matches_serde() {
        for kind in [
            FrameKind::GatewayHello,
            FrameKind::WorkerConnect,
            FrameKind::GatewayConnectionReady,
            FrameKind::GatewayHeartbeat,
            FrameKind::WorkerHeartbeat,
            FrameKind::GatewayClosing,
            FrameKind::WorkerPause,
            FrameKind::GatewayExecutorRequest,
            FrameKind::WorkerRequestAck,
            FrameKind::WorkerReply,
            FrameKind::WorkerReplyAck,
            FrameKind::WorkerRequestExtendLease,
            FrameKind::WorkerRequestExtendLeaseAck,
        ] {
            let json = serde_json::to_string(&kind).unwrap();
            assert_eq!(json, format!("\"{}\"", kind.as_str()));
        }
    }
}
