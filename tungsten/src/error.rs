//! Facade error type.
//!
//! The worker surfaces only fatal configuration errors to the embedder;
//! transport failures are retried and user errors are shaped into reply
//! frames internally.

use thiserror::Error;
use tungsten_worker::ConfigError;

/// Errors surfaced by the public API.
#[derive(Debug, Error)]
pub enum TungstenError {
    /// The worker configuration is invalid.
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),
}
