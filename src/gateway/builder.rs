//! Builder for configuring gateway instances

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use tokio::runtime::Handle;

use super::core::Gateway;
use super::usage::UsageLog;
use crate::cache::{CacheConfig, ResponseCache};
use crate::config::{GatewayConfig, ProviderConfig};
use crate::providers::{AdapterRegistry, ProviderAdapter, RateLimiter, RetryConfig, RetryingHttpClient};
use crate::queue::{RequestQueue, Transport, WorkerContext};
use crate::traits::ProjectDirectory;
use crate::{GatewayError, Result};

/// Main entry point for creating gateway instances.
pub struct Muse;

impl Muse {
    /// Create a new builder for configuring the gateway.
    pub fn builder() -> GatewayBuilder {
        GatewayBuilder::new()
    }
}

/// Builder for configuring gateway instances.
///
/// Without [`config`](Self::config) or [`config_file`](Self::config_file) the
/// built-in defaults are used; the user config file is not read implicitly.
pub struct GatewayBuilder {
    config: Option<GatewayConfig>,
    config_path: Option<PathBuf>,
    providers: Vec<(String, ProviderConfig)>,
    api_keys: HashMap<String, String>,
    adapters: AdapterRegistry,
    projects: Option<Arc<dyn ProjectDirectory>>,
    cache: Option<CacheConfig>,
    retry: Option<RetryConfig>,
    http_client: Option<reqwest::Client>,
    transport: Option<Arc<dyn Transport>>,
}

impl GatewayBuilder {
    pub fn new() -> Self {
        Self {
            config: None,
            config_path: None,
            providers: Vec::new(),
            api_keys: HashMap::new(),
            adapters: AdapterRegistry::with_builtin(),
            projects: None,
            cache: None,
            retry: None,
            http_client: None,
            transport: None,
        }
    }

    /// Use an already-loaded configuration.
    pub fn config(mut self, config: GatewayConfig) -> Self {
        self.config = Some(config);
        self
    }

    /// Load configuration from a TOML file at build time.
    pub fn config_file(mut self, path: impl Into<PathBuf>) -> Self {
        self.config_path = Some(path.into());
        self
    }

    /// Add or replace a provider on top of the loaded configuration.
    pub fn provider(mut self, name: impl Into<String>, config: ProviderConfig) -> Self {
        self.providers.push((name.into(), config));
        self
    }

    /// Set the API key for a provider.
    pub fn api_key(mut self, provider: impl Into<String>, key: impl Into<String>) -> Self {
        self.api_keys.insert(provider.into(), key.into());
        self
    }

    /// Register a custom adapter (or replace a built-in one).
    pub fn adapter(mut self, provider: impl Into<String>, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapters.register(provider, adapter);
        self
    }

    /// Resolve project names for prompt enrichment.
    pub fn project_directory(mut self, directory: impl ProjectDirectory + 'static) -> Self {
        self.projects = Some(Arc::new(directory));
        self
    }

    /// Override the cache section of the configuration.
    pub fn cache(mut self, config: CacheConfig) -> Self {
        self.cache = Some(config);
        self
    }

    /// Override the retry section of the configuration.
    pub fn retry(mut self, config: RetryConfig) -> Self {
        self.retry = Some(config);
        self
    }

    /// Use a preconfigured reqwest client (proxies, TLS roots, ...).
    pub fn http_client(mut self, client: reqwest::Client) -> Self {
        self.http_client = Some(client);
        self
    }

    /// Replace the HTTP transport entirely.
    pub fn transport(mut self, transport: Arc<dyn Transport>) -> Self {
        self.transport = Some(transport);
        self
    }

    /// Build the gateway.
    ///
    /// Must run inside a tokio runtime; the worker is spawned onto it. Opens
    /// the persistent cache when one is configured. The merged configuration
    /// is validated, so providers added here obey the same rules as ones
    /// loaded from a file.
    pub async fn build(self) -> Result<Gateway> {
        let runtime = Handle::try_current().map_err(|_| {
            GatewayError::Configuration("gateway must be built inside a tokio runtime".to_string())
        })?;

        let mut config = match (self.config, &self.config_path) {
            (Some(config), _) => config,
            (None, Some(path)) => GatewayConfig::load(Some(path.as_path()))?,
            (None, None) => GatewayConfig::default(),
        };
        for (name, provider) in self.providers {
            config.providers.insert(name, provider);
        }
        config.validate()?;

        let cache_config = self
            .cache
            .unwrap_or_else(|| CacheConfig::from(&config.cache));
        let retry = self
            .retry
            .unwrap_or_else(|| RetryConfig::from(&config.retry));

        let transport: Arc<dyn Transport> = match (self.transport, self.http_client) {
            (Some(transport), _) => transport,
            (None, Some(client)) => Arc::new(RetryingHttpClient::with_client(client, retry)),
            (None, None) => Arc::new(RetryingHttpClient::new(retry)?),
        };

        let cache = Arc::new(ResponseCache::new(&cache_config).await?);
        let limiter = Arc::new(RateLimiter::from_config(&config));
        let usage = Arc::new(UsageLog::new());

        let context = WorkerContext::new(cache.clone(), limiter.clone(), transport, usage.clone())
            .max_rate_limit_wait(config.queue.max_rate_limit_wait());
        let queue = RequestQueue::with_runtime(context, runtime.clone());

        Ok(Gateway::new(
            config,
            self.adapters,
            self.api_keys,
            self.projects,
            cache,
            limiter,
            usage,
            queue,
            runtime,
        ))
    }
}

impl Default for GatewayBuilder {
    fn default() -> Self {
        Self::new()
    }
}
