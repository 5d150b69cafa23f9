//! Tungsten Proto - wire types for the Connect gateway protocol
#![deny(unsafe_code)]
//!
//! This crate defines the message union exchanged between a Connect worker
//! and its gateway: the frame envelope, the per-kind payload structures,
//! and the bodies of the out-of-band start/flush HTTP calls.
//!
//! Frames travel as JSON inside binary WebSocket messages. Payload parsing
//! is deferred via [`serde_json::value::RawValue`] so the connection core
//! only decodes the payloads it dispatches on.

mod duration;
mod error;
mod frame;
mod kind;
mod payload;
mod start;

pub use duration::parse_interval;
pub use error::ProtoError;
pub use frame::Frame;
pub use kind::FrameKind;
pub use payload::{
    AppManifest, ConnectionReady, ExecutorRequest, ExtendLease, ExtendLeaseAck, ReplyAck,
    RequestAck, WorkerConnect, WorkerIdentity, WorkerReply,
};
pub use start::{StartRequest, StartResponse};

/// WebSocket sub-protocol spoken on the gateway socket.
pub const GATEWAY_SUBPROTOCOL: &str = "v0.connect.inngest.com";

/// Close code for a normal shutdown.
pub const CLOSE_NORMAL: u16 = 1000;

/// Close code for an aborted handshake.
pub const CLOSE_UNEXPECTED: u16 = 4001;

/// Close reason accompanying [`CLOSE_NORMAL`] on graceful shutdown.
pub const REASON_WORKER_SHUTDOWN: &str = "WORKER_SHUTDOWN";

/// Close reason accompanying [`CLOSE_UNEXPECTED`].
pub const REASON_UNEXPECTED: &str = "UNEXPECTED";
