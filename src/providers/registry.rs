//! Provider name → adapter lookup.
//!
//! Adding a provider means registering an adapter here (and a
//! [`ProviderConfig`](crate::config::ProviderConfig) for its endpoints and
//! limits), not editing dispatch logic.

use std::collections::HashMap;
use std::sync::Arc;

use super::anthropic::AnthropicAdapter;
use super::google::GoogleAdapter;
use super::openai::OpenAiAdapter;
use super::traits::ProviderAdapter;
use crate::{GatewayError, Result};

/// Registry of provider adapters keyed by provider name.
#[derive(Clone, Default)]
pub struct AdapterRegistry {
    adapters: HashMap<String, Arc<dyn ProviderAdapter>>,
}

impl AdapterRegistry {
    /// Empty registry.
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with the built-in `openai`, `anthropic`, and `google` adapters.
    pub fn with_builtin() -> Self {
        let mut registry = Self::new();
        registry.register("openai", Arc::new(OpenAiAdapter));
        registry.register("anthropic", Arc::new(AnthropicAdapter));
        registry.register("google", Arc::new(GoogleAdapter));
        registry
    }

    /// Register (or replace) the adapter for `provider`.
    pub fn register(&mut self, provider: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) {
        self.adapters.insert(provider.into(), adapter);
    }

    /// Adapter for `provider`, or a configuration error.
    pub fn get(&self, provider: &str) -> Result<Arc<dyn ProviderAdapter>> {
        self.adapters.get(provider).cloned().ok_or_else(|| {
            GatewayError::Configuration(format!("no adapter registered for provider '{provider}'"))
        })
    }

    pub fn contains(&self, provider: &str) -> bool {
        self.adapters.contains_key(provider)
    }

    /// Registered provider names, sorted.
    pub fn providers(&self) -> Vec<String> {
        let mut names: Vec<String> = self.adapters.keys().cloned().collect();
        names.sort();
        names
    }
}
