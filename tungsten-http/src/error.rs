//! HTTP error types.

use thiserror::Error;

/// Errors that can occur talking to the Connect API.
#[derive(Debug, Error)]
pub enum ApiError {
    /// Request failed at the transport level.
    #[error("request error: {0}")]
    Request(#[from] reqwest::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    /// Signing key rejected (HTTP 401); triggers the fallback-key swap.
    #[error("unauthorized: signing key rejected")]
    Unauthorized,

    /// The platform is at its connection limit (HTTP 429). Retryable; the
    /// worker re-homes when capacity returns.
    #[error("connection limit reached")]
    ConnectionLimited,

    /// Any other non-2xx response.
    #[error("connect API error {status}: {message}")]
    Api {
        /// HTTP status code.
        status: u16,
        /// Response body, as text.
        message: String,
    },

    /// Invalid header value (malformed environment tag or key).
    #[error("invalid header value: {0}")]
    InvalidHeaderValue(#[from] reqwest::header::InvalidHeaderValue),
}

impl ApiError {
    /// Whether this error is an authentication failure.
    pub fn is_auth(&self) -> bool {
        matches!(self, ApiError::Unauthorized)
    }
}
