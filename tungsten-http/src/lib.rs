//! Tungsten HTTP - out-of-band client for the Connect worker.
#![deny(unsafe_code)]
//!
//! Two endpoints live here: the start handshake (one POST per connection
//! attempt, exchanging credentials and gateway exclusions for a session
//! token and a gateway endpoint) and the reply flush fallback (one POST
//! per buffered `WORKER_REPLY` frame).

pub mod auth;
mod client;
mod error;
pub mod routes;

pub use auth::hashed_signing_key;
pub use client::ConnectApiClient;
pub use error::ApiError;
