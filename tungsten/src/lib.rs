//! Tungsten - a durable-execution Connect worker for Rust.
#![deny(unsafe_code)]
//!
//! Tungsten maintains a persistent outbound connection to a Connect
//! gateway, executes registered functions on request, and guarantees
//! at-least-once delivery of every response, surviving gateway drains,
//! broken sockets, and process shutdown along the way.
//!
//! Start with [`Worker::builder`].

pub mod error;
pub mod prelude;
mod worker;

pub use error::TungstenError;
pub use worker::{Worker, WorkerBuilder};

// Layered crates, re-exported for advanced embedders.
pub use tungsten_http;
pub use tungsten_proto;
pub use tungsten_worker;
