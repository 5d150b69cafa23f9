//! Worker error types using thiserror.
//!
//! Only [`ConfigError`] is ever surfaced to the embedder. Everything in
//! [`ConnectError`] stays inside the supervisor, which classifies it and
//! keeps retrying.

use thiserror::Error;
use tungsten_http::ApiError;
use tungsten_proto::{FrameKind, ProtoError};

/// Errors that can occur on a connection or during (re)establishment.
#[derive(Debug, Error)]
pub enum ConnectError {
    /// The gateway socket failed while connecting, reading, or writing.
    #[error("gateway socket error: {0}")]
    Socket(#[from] tokio_tungstenite::tungstenite::Error),

    /// A frame or payload could not be decoded; fatal to the owning
    /// connection.
    #[error("frame codec error: {0}")]
    Frame(#[from] ProtoError),

    /// The start handshake or a flush call failed.
    #[error("connect API error: {0}")]
    Api(#[from] ApiError),

    /// The gateway endpoint handed out by the start handshake (or the
    /// configured override) is not a usable URL.
    #[error("invalid gateway endpoint: {0}")]
    UrlParse(#[from] url::ParseError),

    /// The three-step handshake did not complete within its budget.
    #[error("handshake timed out")]
    HandshakeTimeout,

    /// An out-of-order frame arrived during the handshake.
    #[error("expected {expected} during handshake, received {received}")]
    UnexpectedFrame {
        /// The frame the handshake step required.
        expected: FrameKind,
        /// The frame that actually arrived.
        received: FrameKind,
    },

    /// Two worker heartbeats went unanswered; the connection is assumed
    /// dead.
    #[error("no heartbeat reply from gateway")]
    HeartbeatTimeout,

    /// The gateway closed the socket (or it ended without a close
    /// frame).
    #[error("connection closed: code={code}, reason={reason}")]
    Closed {
        /// Code from the close frame; 0 when the stream just ended.
        code: u16,
        /// Whatever reason text the gateway attached, often empty.
        reason: String,
    },

    /// An internal channel was dropped.
    #[error("channel closed")]
    ChannelClosed,
}

impl ConnectError {
    /// Whether this failure is an authentication rejection, which makes
    /// the supervisor swap to the fallback signing key.
    pub fn is_auth(&self) -> bool {
        matches!(self, ConnectError::Api(ApiError::Unauthorized))
    }

    /// Whether the platform reported a connection limit (retryable, but
    /// logged at error level).
    pub fn is_connection_limited(&self) -> bool {
        matches!(self, ConnectError::Api(ApiError::ConnectionLimited))
    }
}

/// Fatal configuration errors, surfaced to the embedder at build time.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// No signing key was provided outside dev mode.
    #[error("a signing key is required outside dev mode")]
    MissingSigningKey,

    /// A branch-scoped signing key requires an environment tag.
    #[error("branch-scoped signing keys require an environment tag")]
    MissingEnvironment,

    /// The worker has no registered apps.
    #[error("at least one app must be registered")]
    NoApps,

    /// Two apps were registered under the same id.
    #[error("duplicate app id: {0}")]
    DuplicateApp(String),

    /// A function was registered for an app that does not exist.
    #[error("unknown app id: {0}")]
    UnknownApp(String),

    /// The HTTP client could not be constructed.
    #[error("API client error: {0}")]
    Api(#[from] ApiError),

    /// The isolated execution thread could not be spawned.
    #[error("failed to spawn execution thread: {0}")]
    Io(#[from] std::io::Error),
}
