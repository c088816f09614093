//! Handler Registry
//!
//! Maps service names to handlers. Lookup is exact and case-sensitive.
//! Handlers are shared as `Arc`s, so a dispatch that resolved a handler
//! keeps it alive for as long as the job runs.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use tracing::{debug, info, warn};

use crate::config::HandlerSettings;
use crate::error::Result;

use super::{JobHandler, SeoLookupHandler, SEO_SERVICE_NAME};

/// Registry of job handlers keyed by service name
pub struct HandlerRegistry {
    handlers: RwLock<HashMap<String, Arc<dyn JobHandler>>>,
}

impl HandlerRegistry {
    /// Create an empty registry
    pub fn new() -> Self {
        Self {
            handlers: RwLock::new(HashMap::new()),
        }
    }

    /// Create a registry with the built-in handlers enabled in `settings`
    pub fn from_settings(settings: &HandlerSettings) -> Result<Self> {
        let registry = Self::new();

        if settings.seo.enabled {
            let handler = SeoLookupHandler::from_settings(&settings.seo)?;
            registry.register(SEO_SERVICE_NAME, Arc::new(handler));
        } else {
            debug!("SEO handler disabled");
        }

        if registry.is_empty() {
            warn!("No job handlers registered; every job will be reported as unsupported");
        }

        Ok(registry)
    }

    /// Register a handler, replacing any previous handler with the same name
    pub fn register(&self, service_name: impl Into<String>, handler: Arc<dyn JobHandler>) {
        let service_name = service_name.into();
        let replaced = self
            .handlers
            .write()
            .insert(service_name.clone(), handler)
            .is_some();

        if replaced {
            warn!(service_name = %service_name, "Replaced existing handler");
        } else {
            info!(service_name = %service_name, "Registered handler");
        }
    }

    /// Find the handler for `service_name`
    pub fn resolve(&self, service_name: &str) -> Option<Arc<dyn JobHandler>> {
        self.handlers.read().get(service_name).cloned()
    }

    /// Registered service names, sorted
    pub fn names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.handlers.read().keys().cloned().collect();
        names.sort();
        names
    }

    pub fn len(&self) -> usize {
        self.handlers.read().len()
    }

    pub fn is_empty(&self) -> bool {
        self.handlers.read().is_empty()
    }
}

impl Default for HandlerRegistry {
    fn default() -> Self {
        Self::new()
    }
}

// ─────────────────────────────────────────────────────────────────
// Tests
// ─────────────────────────────────────────────────────────────────

#[cfg(test)]
mod tests {
    use super::*;
    use crate::handlers::handler_fn;
    use serde_json::{json, Value};

    fn constant(value: Value) -> Arc<dyn JobHandler> {
        Arc::new(handler_fn(move |_| {
            let value = value.clone();
            async move { Ok(value) }
        }))
    }

    #[test]
    fn test_registry_starts_empty() {
        let registry = HandlerRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.resolve("SEO").is_none());
    }

    #[tokio::test]
    async fn test_register_and_resolve() {
        let registry = HandlerRegistry::new();
        registry.register("SEO", constant(json!(1)));

        let handler = registry.resolve("SEO").unwrap();
        assert_eq!(handler.execute(Value::Null).await.unwrap(), json!(1));
    }

    #[test]
    fn test_lookup_is_case_sensitive() {
        let registry = HandlerRegistry::new();
        registry.register("SEO", constant(json!(1)));

        assert!(registry.resolve("seo").is_none());
        assert!(registry.resolve("SEO ").is_none());
        assert!(registry.resolve("").is_none());
    }

    #[tokio::test]
    async fn test_register_replaces() {
        let registry = HandlerRegistry::new();
        registry.register("A", constant(json!("old")));
        registry.register("A", constant(json!("new")));

        assert_eq!(registry.len(), 1);
        let out = registry.resolve("A").unwrap().execute(Value::Null).await.unwrap();
        assert_eq!(out, json!("new"));
    }

    #[test]
    fn test_names_sorted() {
        let registry = HandlerRegistry::new();
        registry.register("b", constant(Value::Null));
        registry.register("a", constant(Value::Null));
        assert_eq!(registry.names(), vec!["a".to_string(), "b".to_string()]);
    }

    #[test]
    fn test_from_settings() {
        let mut settings = HandlerSettings::default();
        let registry = HandlerRegistry::from_settings(&settings).unwrap();
        assert_eq!(registry.names(), vec![SEO_SERVICE_NAME.to_string()]);

        settings.seo.enabled = false;
        assert!(HandlerRegistry::from_settings(&settings).unwrap().is_empty());
    }
}
