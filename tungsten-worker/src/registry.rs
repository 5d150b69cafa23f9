//! The user-function registry.
//!
//! Maps `(app id, function slug)` to a registered handler. The function
//! metadata blob attached to each app is opaque; it is announced to the
//! gateway verbatim and never interpreted here.

use crate::error::ConfigError;
use dashmap::DashMap;
use std::collections::HashMap;
use std::sync::Arc;
use tungsten_proto::AppManifest;

/// Decoded input handed to a user function.
#[derive(Debug, Clone)]
pub struct FunctionInput {
    /// Gateway-assigned request id.
    pub request_id: String,

    /// App the target function belongs to.
    pub app_id: String,

    /// Slug of the target function.
    pub function_slug: String,

    /// Opaque request body.
    pub body: Vec<u8>,
}

/// Result of a user function.
#[derive(Debug, Clone)]
pub struct FunctionOutput {
    /// HTTP-shaped status.
    pub status: u16,

    /// Opaque response body; never interpreted by the worker.
    pub body: Vec<u8>,
}

impl FunctionOutput {
    /// A 200 response with the given body.
    pub fn ok(body: impl Into<Vec<u8>>) -> Self {
        Self {
            status: 200,
            body: body.into(),
        }
    }
}

/// Error type user functions may return; shaped into a 500-style reply by
/// the execution bridge.
pub type FunctionError = Box<dyn std::error::Error + Send + Sync>;

/// A registered user function.
///
/// `invoke` may block: the execution bridge guarantees that running user
/// code never starves the connection's heartbeat or lease timers.
pub trait UserFunction: Send + Sync {
    /// Run the function.
    fn invoke(&self, input: FunctionInput) -> Result<FunctionOutput, FunctionError>;
}

impl<F> UserFunction for F
where
    F: Fn(FunctionInput) -> Result<FunctionOutput, FunctionError> + Send + Sync,
{
    fn invoke(&self, input: FunctionInput) -> Result<FunctionOutput, FunctionError> {
        self(input)
    }
}

struct AppEntry {
    version: Option<String>,
    /// Opaque function-metadata blob announced in `WORKER_CONNECT`.
    metadata: Vec<u8>,
    functions: HashMap<String, Arc<dyn UserFunction>>,
}

/// Registry of apps and their functions.
#[derive(Default)]
pub struct FunctionRegistry {
    apps: DashMap<String, AppEntry>,
}

impl FunctionRegistry {
    /// Create an empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Register an app with its opaque function-metadata blob.
    pub fn register_app(
        &self,
        app_id: impl Into<String>,
        version: Option<String>,
        metadata: Vec<u8>,
    ) -> Result<(), ConfigError> {
        let app_id = app_id.into();
        if self.apps.contains_key(&app_id) {
            return Err(ConfigError::DuplicateApp(app_id));
        }
        self.apps.insert(
            app_id,
            AppEntry {
                version,
                metadata,
                functions: HashMap::new(),
            },
        );
        Ok(())
    }

    /// Register a function under an existing app.
    pub fn register_function(
        &self,
        app_id: &str,
        slug: impl Into<String>,
        function: Arc<dyn UserFunction>,
    ) -> Result<(), ConfigError> {
        let mut entry = self
            .apps
            .get_mut(app_id)
            .ok_or_else(|| ConfigError::UnknownApp(app_id.to_string()))?;
        entry.functions.insert(slug.into(), function);
        Ok(())
    }

    /// Whether an app is registered.
    pub fn has_app(&self, app_id: &str) -> bool {
        self.apps.contains_key(app_id)
    }

    /// Look up a function by app and slug.
    pub fn lookup(&self, app_id: &str, slug: &str) -> Option<Arc<dyn UserFunction>> {
        self.apps
            .get(app_id)
            .and_then(|entry| entry.functions.get(slug).cloned())
    }

    /// Whether no apps are registered.
    pub fn is_empty(&self) -> bool {
        self.apps.is_empty()
    }

    /// Manifests for `WORKER_CONNECT`, sorted by app id for a stable
    /// announcement order.
    pub fn manifests(&self) -> Vec<AppManifest> {
        let mut manifests: Vec<AppManifest> = self
            .apps
            .iter()
            .map(|entry| {
                AppManifest::new(
                    entry.key().clone(),
                    entry.value().version.clone(),
                    &entry.value().metadata,
                )
            })
            .collect();
        manifests.sort_by(|a, b| a.app_id.cmp(&b.app_id));
        manifests
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn echo(input: FunctionInput) -> Result<FunctionOutput, FunctionError> {
        Ok(FunctionOutput::ok(input.body))
    }

    #[test]
    fn test_register_and_lookup() {
        let registry = FunctionRegistry::new();
        registry.register_app("app-a", None, b"meta".to_vec()).unwrap();
        registry
            .register_function("app-a", "echo", Arc::new(echo))
            .unwrap();

        assert!(registry.has_app("app-a"));
        assert!(registry.lookup("app-a", "echo").is_some());
        assert!(registry.lookup("app-a", "missing").is_none());
        assert!(registry.lookup("app-b", "echo").is_none());
    }

    #[test]
    fn test_duplicate_app_rejected() {
        let registry = FunctionRegistry::new();
        registry.register_app("app-a", None, Vec::new()).unwrap();
        assert!(matches!(
            registry.register_app("app-a", None, Vec::new()),
            Err(ConfigError::DuplicateApp(_))
        ));
    }

    #[test]
    fn test_function_requires_app() {
        let registry = FunctionRegistry::new();
        assert!(matches!(
            registry.register_function("nope", "f", Arc::new(echo)),
            Err(ConfigError::UnknownApp(_))
        ));
    }

    #[test]
    fn test_manifests_sorted() {
        let registry = FunctionRegistry::new();
        registry.register_app("b", None, Vec::new()).unwrap();
        registry
            .register_app("a", Some("2".to_string()), Vec::new())
            .unwrap();

        let manifests = registry.manifests();
        assert_eq!(manifests.len(), 2);
        assert_eq!(manifests[0].app_id, "a");
        assert_eq!(manifests[1].app_id, "b");
    }
}
