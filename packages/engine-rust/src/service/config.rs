use std::collections::HashMap;
use std::fmt;
use std::sync::Arc;

use conductor_core::FieldDeclaration;

use super::handler::OperationHandler;
use super::hook::Hook;
use super::properties::{keys, Properties};

// ---------------------------------------------------------------------------
// Config
// ---------------------------------------------------------------------------

/// Handler registry, hook lists and property bag owned by one `Executor`.
///
/// A `Config` is immutable once built. The executor swaps in a modified copy
/// when a handler is added at runtime, so in-flight requests keep the
/// registry they started with.
#[derive(Clone, Default)]
pub struct Config {
    handlers: HashMap<String, Arc<dyn OperationHandler>>,
    default_handler: Option<Arc<dyn OperationHandler>>,
    request_hooks: Vec<Arc<dyn Hook>>,
    operation_hooks: Vec<Arc<dyn Hook>>,
    properties: Properties,
}

impl Config {
    #[must_use]
    pub fn builder() -> ConfigBuilder {
        ConfigBuilder::default()
    }

    /// Handler registered for exactly this operation type.
    #[must_use]
    pub fn handler(&self, op_type: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handlers.get(op_type).cloned()
    }

    /// Exact handler, else the default handler.
    #[must_use]
    pub fn resolve(&self, op_type: &str) -> Option<Arc<dyn OperationHandler>> {
        self.handler(op_type).or_else(|| self.default_handler.clone())
    }

    #[must_use]
    pub fn is_supported(&self, op_type: &str) -> bool {
        self.handlers.contains_key(op_type)
    }

    /// Operation types with a registered handler, sorted.
    #[must_use]
    pub fn supported_operations(&self) -> Vec<String> {
        let mut types: Vec<String> = self.handlers.keys().cloned().collect();
        types.sort();
        types
    }

    /// Field declaration of the handler for `op_type`, for introspection.
    #[must_use]
    pub fn field_declaration(&self, op_type: &str) -> Option<FieldDeclaration> {
        self.handlers.get(op_type).map(|h| h.fields())
    }

    #[must_use]
    pub fn default_handler(&self) -> Option<&Arc<dyn OperationHandler>> {
        self.default_handler.as_ref()
    }

    /// Hooks run once per request entering the executor.
    #[must_use]
    pub fn request_hooks(&self) -> &[Arc<dyn Hook>] {
        &self.request_hooks
    }

    /// Hooks run at every nesting level.
    #[must_use]
    pub fn operation_hooks(&self) -> &[Arc<dyn Hook>] {
        &self.operation_hooks
    }

    #[must_use]
    pub fn properties(&self) -> &Properties {
        &self.properties
    }

    /// Copy of this config with one more handler.
    #[must_use]
    pub fn with_handler(&self, op_type: &str, handler: Arc<dyn OperationHandler>) -> Self {
        let mut next = self.clone();
        next.handlers.insert(op_type.to_string(), handler);
        next
    }
}

impl fmt::Debug for Config {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let names = |hooks: &[Arc<dyn Hook>]| hooks.iter().map(|h| h.name()).collect::<Vec<_>>();
        f.debug_struct("Config")
            .field("handlers", &self.supported_operations())
            .field("default_handler", &self.default_handler.is_some())
            .field("request_hooks", &names(&self.request_hooks))
            .field("operation_hooks", &names(&self.operation_hooks))
            .field("properties", &self.properties)
            .finish()
    }
}

// ---------------------------------------------------------------------------
// ConfigBuilder
// ---------------------------------------------------------------------------

/// Errors detected while building a `Config`.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("handler registered for an empty operation type")]
    EmptyOperationType,
    #[error("invalid properties: {0}")]
    InvalidProperties(#[source] anyhow::Error),
}

/// Registration table for a `Config`. Problems surface from `build()`, at
/// startup, rather than at first use.
#[derive(Default)]
pub struct ConfigBuilder {
    config: Config,
    empty_type: bool,
}

impl ConfigBuilder {
    /// Registers a handler. A later registration for the same type replaces
    /// the earlier one.
    #[must_use]
    pub fn handler(mut self, op_type: &str, handler: impl OperationHandler + 'static) -> Self {
        self.insert_handler(op_type, Arc::new(handler));
        self
    }

    #[must_use]
    pub fn shared_handler(mut self, op_type: &str, handler: Arc<dyn OperationHandler>) -> Self {
        self.insert_handler(op_type, handler);
        self
    }

    fn insert_handler(&mut self, op_type: &str, handler: Arc<dyn OperationHandler>) {
        if op_type.trim().is_empty() {
            self.empty_type = true;
            return;
        }
        self.config.handlers.insert(op_type.to_string(), handler);
    }

    #[must_use]
    pub fn default_handler(mut self, handler: impl OperationHandler + 'static) -> Self {
        self.config.default_handler = Some(Arc::new(handler));
        self
    }

    #[must_use]
    pub fn request_hook(mut self, hook: impl Hook + 'static) -> Self {
        self.config.request_hooks.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn shared_request_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.config.request_hooks.push(hook);
        self
    }

    #[must_use]
    pub fn operation_hook(mut self, hook: impl Hook + 'static) -> Self {
        self.config.operation_hooks.push(Arc::new(hook));
        self
    }

    #[must_use]
    pub fn shared_operation_hook(mut self, hook: Arc<dyn Hook>) -> Self {
        self.config.operation_hooks.push(hook);
        self
    }

    #[must_use]
    pub fn properties(mut self, properties: Properties) -> Self {
        self.config.properties = properties;
        self
    }

    #[must_use]
    pub fn property(mut self, key: &str, value: impl Into<serde_json::Value>) -> Self {
        self.config.properties.set(key, value);
        self
    }

    /// Properties set so far, for registration code that reads them.
    #[must_use]
    pub fn current_properties(&self) -> &Properties {
        &self.config.properties
    }

    /// Validates the registration table.
    ///
    /// # Errors
    ///
    /// Returns `ConfigError` for an empty operation type or malformed
    /// engine properties.
    pub fn build(self) -> Result<Config, ConfigError> {
        if self.empty_type {
            return Err(ConfigError::EmptyOperationType);
        }
        self.config
            .properties
            .validate()
            .map_err(ConfigError::InvalidProperties)?;
        Ok(self.config)
    }
}

// ---------------------------------------------------------------------------
// ServiceConfig
// ---------------------------------------------------------------------------

/// Settings for the tower pipeline wrapped around an executor.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ServiceConfig {
    /// Requests one user may have in flight before further ones are refused.
    pub max_requests_per_user: u32,
    /// Timeout applied to requests that do not carry their own.
    pub default_timeout_ms: Option<u64>,
}

impl Default for ServiceConfig {
    fn default() -> Self {
        Self {
            max_requests_per_user: 64,
            default_timeout_ms: None,
        }
    }
}

impl ServiceConfig {
    /// Reads the service keys from a property bag, keeping defaults for
    /// absent keys.
    ///
    /// # Errors
    ///
    /// Returns an error if a service key is malformed.
    pub fn from_properties(properties: &Properties) -> anyhow::Result<Self> {
        let mut config = Self::default();
        if let Some(max) = properties.get_usize(keys::SERVICE_USER_MAX_CONCURRENT)? {
            config.max_requests_per_user = u32::try_from(max).unwrap_or(u32::MAX);
        }
        if let Some(timeout) = properties.get_usize(keys::SERVICE_TIMEOUT_MS)? {
            config.default_timeout_ms = Some(timeout as u64);
        }
        Ok(config)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use async_trait::async_trait;
    use conductor_core::{Context, Operation, Value, ValueType};

    use super::*;
    use crate::error::OperationError;
    use crate::service::executor::Executor;

    struct Fixed(i64);

    #[async_trait]
    impl OperationHandler for Fixed {
        async fn handle(
            &self,
            _operation: &Operation,
            _context: &Context,
            _executor: &Executor,
        ) -> Result<Value, OperationError> {
            Ok(Value::Int(self.0))
        }

        fn fields(&self) -> FieldDeclaration {
            FieldDeclaration::none().required("n", ValueType::Int)
        }
    }

    struct Named(&'static str);

    #[async_trait]
    impl Hook for Named {
        fn name(&self) -> &'static str {
            self.0
        }
    }

    #[test]
    fn resolve_prefers_exact_then_default() {
        let config = Config::builder()
            .handler("A", Fixed(1))
            .default_handler(Fixed(0))
            .build()
            .unwrap();
        assert!(config.handler("A").is_some());
        assert!(config.handler("B").is_none());
        assert!(config.resolve("B").is_some());
        assert!(config.is_supported("A"));
        assert!(!config.is_supported("B"));
    }

    #[test]
    fn resolve_without_default_is_none() {
        let config = Config::builder().handler("A", Fixed(1)).build().unwrap();
        assert!(config.resolve("B").is_none());
    }

    #[test]
    fn hooks_keep_registration_order() {
        let config = Config::builder()
            .request_hook(Named("first"))
            .request_hook(Named("second"))
            .operation_hook(Named("third"))
            .build()
            .unwrap();
        let names: Vec<_> = config.request_hooks().iter().map(|h| h.name()).collect();
        assert_eq!(names, vec!["first", "second"]);
        assert_eq!(config.operation_hooks().len(), 1);
    }

    #[test]
    fn empty_operation_type_fails_at_build() {
        let err = Config::builder().handler(" ", Fixed(1)).build().unwrap_err();
        assert!(matches!(err, ConfigError::EmptyOperationType));
    }

    #[test]
    fn malformed_properties_fail_at_build() {
        let err = Config::builder()
            .property(keys::JOB_EXECUTOR_THREADS, "lots")
            .build()
            .unwrap_err();
        assert!(matches!(err, ConfigError::InvalidProperties(_)));
    }

    #[test]
    fn with_handler_leaves_original_untouched() {
        let config = Config::builder().build().unwrap();
        let next = config.with_handler("A", Arc::new(Fixed(1)));
        assert!(!config.is_supported("A"));
        assert!(next.is_supported("A"));
        assert_eq!(next.supported_operations(), vec!["A"]);
        assert!(next.field_declaration("A").unwrap().field("n").is_some());
    }

    #[test]
    fn service_config_reads_properties() {
        let props = Properties::new()
            .with(keys::SERVICE_USER_MAX_CONCURRENT, 5)
            .with(keys::SERVICE_TIMEOUT_MS, "250");
        let config = ServiceConfig::from_properties(&props).unwrap();
        assert_eq!(config.max_requests_per_user, 5);
        assert_eq!(config.default_timeout_ms, Some(250));
        assert_eq!(
            ServiceConfig::from_properties(&Properties::new()).unwrap(),
            ServiceConfig::default()
        );
    }
}
