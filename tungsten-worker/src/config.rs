//! Worker configuration.

use crate::error::ConfigError;
use crate::registry::FunctionRegistry;
use tungsten_http::auth::is_branch_scoped;
use url::Url;

/// Environment variable accepted as a max-concurrency override.
pub const MAX_CONCURRENCY_ENV: &str = "TUNGSTEN_MAX_CONCURRENCY";

/// OS signals the worker can translate into a graceful `close()`.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ShutdownSignal {
    /// SIGINT.
    Interrupt,
    /// SIGTERM.
    Terminate,
}

/// Configuration for a Connect worker.
#[derive(Debug, Clone)]
pub struct WorkerConfig {
    /// Primary signing key. Required outside dev mode.
    pub signing_key: Option<String>,

    /// Fallback signing key, swapped in once per outage on auth failure.
    pub signing_key_fallback: Option<String>,

    /// Environment tag. Required when the signing key is branch-scoped.
    pub environment: Option<String>,

    /// Worker instance id; defaults to the hostname.
    pub instance_id: Option<String>,

    /// Maximum concurrent executions. `None` means unbounded; the
    /// `TUNGSTEN_MAX_CONCURRENCY` environment variable is also accepted.
    pub max_concurrency: Option<usize>,

    /// Signals that trigger a graceful shutdown. Empty disables signal
    /// handling entirely.
    pub handle_shutdown_signals: Vec<ShutdownSignal>,

    /// Gateway URL override for testing or proxying; replaces the
    /// endpoint returned by the start handshake.
    pub gateway_url_override: Option<Url>,

    /// Base URL of the Connect API.
    pub api_base_url: Url,

    /// Dev mode: relaxes the signing-key requirement.
    pub dev: bool,

    /// Run user code in a dedicated execution context so it can never
    /// starve the heartbeat and lease timers.
    pub isolate_execution: bool,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self::new()
    }
}

impl WorkerConfig {
    /// Create a configuration with defaults.
    pub fn new() -> Self {
        Self {
            signing_key: None,
            signing_key_fallback: None,
            environment: None,
            instance_id: None,
            max_concurrency: None,
            handle_shutdown_signals: vec![ShutdownSignal::Interrupt, ShutdownSignal::Terminate],
            gateway_url_override: None,
            api_base_url: Url::parse(tungsten_http::routes::DEFAULT_API_BASE)
                .expect("default API base URL is valid"),
            dev: false,
            isolate_execution: true,
        }
    }

    /// Set the primary signing key.
    pub fn with_signing_key(mut self, key: impl Into<String>) -> Self {
        self.signing_key = Some(key.into());
        self
    }

    /// Set the fallback signing key.
    pub fn with_signing_key_fallback(mut self, key: impl Into<String>) -> Self {
        self.signing_key_fallback = Some(key.into());
        self
    }

    /// Set the environment tag.
    pub fn with_environment(mut self, env: impl Into<String>) -> Self {
        self.environment = Some(env.into());
        self
    }

    /// Set the worker instance id.
    pub fn with_instance_id(mut self, id: impl Into<String>) -> Self {
        self.instance_id = Some(id.into());
        self
    }

    /// Bound concurrent executions.
    pub fn with_max_concurrency(mut self, limit: usize) -> Self {
        self.max_concurrency = Some(limit);
        self
    }

    /// Replace the handled shutdown signals. An empty list disables
    /// signal handling.
    pub fn with_shutdown_signals(mut self, signals: Vec<ShutdownSignal>) -> Self {
        self.handle_shutdown_signals = signals;
        self
    }

    /// Override the gateway URL (testing / proxying).
    pub fn with_gateway_url_override(mut self, url: Url) -> Self {
        self.gateway_url_override = Some(url);
        self
    }

    /// Set the Connect API base URL.
    pub fn with_api_base_url(mut self, url: Url) -> Self {
        self.api_base_url = url;
        self
    }

    /// Enable dev mode.
    pub fn with_dev(mut self, dev: bool) -> Self {
        self.dev = dev;
        self
    }

    /// Choose between the in-process and isolated execution bridge.
    pub fn with_isolate_execution(mut self, isolate: bool) -> Self {
        self.isolate_execution = isolate;
        self
    }

    /// Resolved instance id: configured value or the hostname.
    pub fn resolved_instance_id(&self) -> String {
        self.instance_id.clone().unwrap_or_else(|| {
            gethostname::gethostname().to_string_lossy().into_owned()
        })
    }

    /// Resolved concurrency bound: explicit configuration wins, then the
    /// environment variable; anything non-positive is ignored.
    pub fn resolved_max_concurrency(&self) -> Option<usize> {
        if self.max_concurrency.is_some() {
            return self.max_concurrency;
        }
        std::env::var(MAX_CONCURRENCY_ENV)
            .ok()
            .and_then(|v| v.trim().parse::<usize>().ok())
            .filter(|n| *n > 0)
    }

    /// Check the fatal configuration invariants.
    pub fn validate(&self, registry: &FunctionRegistry) -> Result<(), ConfigError> {
        match &self.signing_key {
            None if !self.dev => return Err(ConfigError::MissingSigningKey),
            Some(key) if is_branch_scoped(key) && self.environment.is_none() => {
                return Err(ConfigError::MissingEnvironment)
            }
            _ => {}
        }
        if registry.is_empty() {
            return Err(ConfigError::NoApps);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = WorkerConfig::new();
        assert!(config.isolate_execution);
        assert!(!config.dev);
        assert_eq!(
            config.handle_shutdown_signals,
            vec![ShutdownSignal::Interrupt, ShutdownSignal::Terminate]
        );
        assert_eq!(config.api_base_url.as_str(), "https://api.inngest.com/");
    }

    #[test]
    fn test_validate_requires_signing_key() {
        let registry = FunctionRegistry::new();
        registry.register_app("app", None, Vec::new()).unwrap();

        let config = WorkerConfig::new();
        assert!(matches!(
            config.validate(&registry),
            Err(ConfigError::MissingSigningKey)
        ));

        let config = config.with_dev(true);
        assert!(config.validate(&registry).is_ok());
    }

    #[test]
    fn test_validate_branch_key_needs_environment() {
        let registry = FunctionRegistry::new();
        registry.register_app("app", None, Vec::new()).unwrap();

        let config = WorkerConfig::new().with_signing_key("signkey-branch-00ff");
        assert!(matches!(
            config.validate(&registry),
            Err(ConfigError::MissingEnvironment)
        ));

        let config = config.with_environment("feature-x");
        assert!(config.validate(&registry).is_ok());
    }

    #[test]
    fn test_validate_rejects_empty_registry() {
        let registry = FunctionRegistry::new();
        let config = WorkerConfig::new().with_dev(true);
        assert!(matches!(
            config.validate(&registry),
            Err(ConfigError::NoApps)
        ));
    }

    #[test]
    fn test_instance_id_defaults_to_hostname() {
        let config = WorkerConfig::new();
        assert!(!config.resolved_instance_id().is_empty());

        let config = config.with_instance_id("worker-7");
        assert_eq!(config.resolved_instance_id(), "worker-7");
    }
}
