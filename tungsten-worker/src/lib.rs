//! Tungsten Worker - the Connect worker core.
#![deny(unsafe_code)]
//!
//! A long-lived worker that connects outbound to a gateway over one
//! WebSocket, receives function-execution requests, runs registered user
//! functions, and streams responses back. The worker owns the liveness
//! of the channel (heartbeats, lease extension), survives gateway
//! draining and transient failure by re-handshaking, and guarantees that
//! every accepted request has its response delivered at least once via a
//! buffered HTTP fallback.
//!
//! # Architecture
//!
//! - [`Supervisor`] owns the outer loop: start handshake, backoff,
//!   gateway exclusion, key fallback, drain hand-off, shutdown.
//! - [`connection::Connection`] owns one WebSocket: the handshake state
//!   machine, frame dispatch, heartbeat and lease timers.
//! - [`buffer::ResponseBuffer`] holds every reply until it is
//!   acknowledged or flushed over HTTP.
//! - [`bridge::ExecutionBridge`] is the seam in front of user code, with
//!   in-process and thread-isolated implementations.

pub mod backoff;
pub mod bridge;
pub mod buffer;
pub mod config;
pub mod connection;
pub mod error;
pub mod events;
pub mod heartbeat;
pub mod metrics;
pub mod registry;
pub mod router;
pub mod shutdown;
pub mod state;
pub mod supervisor;

// Public re-exports
pub use bridge::{BridgeNotice, ExecutionBridge, ExecutionOutcome, InProcessBridge, IsolatedBridge};
pub use buffer::{EntryState, FlushKeys, ResponseBuffer};
pub use config::{ShutdownSignal, WorkerConfig, MAX_CONCURRENCY_ENV};
pub use error::{ConfigError, ConnectError};
pub use events::{EventBus, RequestOutcome, WorkerEvent};
pub use metrics::{MetricsSnapshot, WorkerMetrics};
pub use registry::{FunctionError, FunctionInput, FunctionOutput, FunctionRegistry, UserFunction};
pub use state::WorkerState;
pub use supervisor::{Supervisor, SupervisorHandles};

use std::time::Duration;

/// SDK version announced to the gateway.
pub const SDK_VERSION: &str = env!("CARGO_PKG_VERSION");

/// Platform identifier announced to the gateway.
pub const PLATFORM: &str = std::env::consts::OS;

/// Wall-clock budget for the whole three-step handshake.
pub const HANDSHAKE_BUDGET: Duration = Duration::from_secs(10);

/// Heartbeat cadence when `GATEWAY_CONNECTION_READY` carries an
/// unparseable interval.
pub const DEFAULT_HEARTBEAT_INTERVAL: Duration = Duration::from_secs(10);

/// Lease-extension cadence fallback.
pub const DEFAULT_EXTEND_LEASE_INTERVAL: Duration = Duration::from_secs(5);

/// How long a buffered reply stays *pending-ack* before it is scheduled
/// for HTTP flush.
pub const REPLY_ACK_DEADLINE: Duration = Duration::from_secs(5);
