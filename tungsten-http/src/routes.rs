//! Fixed Connect API routes.

/// Default API base URL.
pub const DEFAULT_API_BASE: &str = "https://api.inngest.com";

/// Start-handshake endpoint: one POST per connection attempt.
pub const START_PATH: &str = "/v0/connect/start";

/// Reply-flush endpoint: one POST per buffered `WORKER_REPLY` frame.
pub const FLUSH_PATH: &str = "/v0/connect/flush";
