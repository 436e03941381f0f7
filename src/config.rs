//! Gateway configuration.
//!
//! Configuration is loaded from TOML with the following resolution order:
//! 1. explicit path (must exist)
//! 2. `~/.muse/gateway.toml` (user)
//! 3. built-in defaults
//!
//! Provider sections replace the built-in entry of the same name wholesale;
//! built-in providers not mentioned in the file stay available.
//!
//! ```toml
//! [providers.openai]
//! base_url = "https://api.openai.com"
//! max_requests = 60
//! window_secs = 60
//! auth = { scheme = "bearer" }
//! endpoints = { generate = "/v1/chat/completions" }
//!
//! [cache]
//! path = "/var/cache/muse/responses.db"
//! max_age_secs = 604800
//!
//! [pricing.openai.gpt-4o]
//! prompt_per_1k = 0.005
//! completion_per_1k = 0.015
//! ```

use std::collections::BTreeMap;
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::Deserialize;

use crate::cache::CacheConfig;
use crate::gateway::PricingTable;
use crate::providers::RetryConfig;
use crate::{GatewayError, Result};

/// Endpoint name used by text generation when no explicit endpoint is given.
pub const GENERATE_ENDPOINT: &str = "generate";

/// Top-level gateway configuration.
#[derive(Debug, Clone, Deserialize)]
pub struct GatewayConfig {
    #[serde(default = "builtin_providers")]
    pub providers: BTreeMap<String, ProviderConfig>,
    #[serde(default)]
    pub cache: CacheSettings,
    #[serde(default)]
    pub retry: RetrySettings,
    #[serde(default)]
    pub queue: QueueSettings,
    #[serde(default)]
    pub pricing: PricingTable,
}

impl Default for GatewayConfig {
    fn default() -> Self {
        Self {
            providers: builtin_providers(),
            cache: CacheSettings::default(),
            retry: RetrySettings::default(),
            queue: QueueSettings::default(),
            pricing: PricingTable::default(),
        }
    }
}

/// How a provider expects its API key.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
#[serde(tag = "scheme", rename_all = "snake_case")]
pub enum AuthScheme {
    /// `Authorization: Bearer <key>`
    Bearer,
    /// `<name>: <key>`
    Header { name: String },
}

/// Immutable per-provider settings.
///
/// Never mutated after load; replaced wholesale when configuration changes.
#[derive(Debug, Clone, PartialEq, Eq, Deserialize)]
pub struct ProviderConfig {
    pub base_url: String,
    /// Endpoint name → path. Paths may contain a `{model}` placeholder.
    #[serde(default)]
    pub endpoints: BTreeMap<String, String>,
    pub auth: AuthScheme,
    /// Requests admitted per trailing window.
    #[serde(default = "default_max_requests")]
    pub max_requests: u32,
    #[serde(default = "default_window_secs")]
    pub window_secs: u64,
}

fn default_max_requests() -> u32 {
    60
}

fn default_window_secs() -> u64 {
    60
}

impl ProviderConfig {
    pub fn new(base_url: impl Into<String>, auth: AuthScheme) -> Self {
        Self {
            base_url: base_url.into(),
            endpoints: BTreeMap::new(),
            auth,
            max_requests: default_max_requests(),
            window_secs: default_window_secs(),
        }
    }

    /// Map an endpoint name to a path.
    pub fn endpoint(mut self, name: impl Into<String>, path: impl Into<String>) -> Self {
        self.endpoints.insert(name.into(), path.into());
        self
    }

    /// Set the admission limit: `max_requests` per `window`.
    pub fn rate_limit(mut self, max_requests: u32, window: Duration) -> Self {
        self.max_requests = max_requests;
        self.window_secs = window.as_secs().max(1);
        self
    }

    pub fn window(&self) -> Duration {
        Duration::from_secs(self.window_secs)
    }

    /// Resolve an endpoint name (or a literal `/path`) into a full URL.
    ///
    /// `{model}` in the path is substituted when `model` is given.
    pub fn url_for(&self, endpoint: &str, model: Option<&str>) -> Result<String> {
        let path = if endpoint.starts_with('/') {
            endpoint
        } else {
            self.endpoints.get(endpoint).ok_or_else(|| {
                GatewayError::Configuration(format!("unknown endpoint '{endpoint}'"))
            })?
        };
        let path = match model {
            Some(m) => path.replace("{model}", m),
            None => path.to_string(),
        };
        if path.contains("{model}") {
            return Err(GatewayError::Configuration(format!(
                "endpoint '{endpoint}' needs a model"
            )));
        }
        Ok(format!("{}{}", self.base_url.trim_end_matches('/'), path))
    }
}

fn builtin_providers() -> BTreeMap<String, ProviderConfig> {
    let mut providers = BTreeMap::new();
    providers.insert(
        "openai".to_string(),
        ProviderConfig::new("https://api.openai.com", AuthScheme::Bearer)
            .endpoint(GENERATE_ENDPOINT, "/v1/chat/completions")
            .endpoint("chat", "/v1/chat/completions")
            .endpoint("embeddings", "/v1/embeddings")
            .rate_limit(60, Duration::from_secs(60)),
    );
    providers.insert(
        "anthropic".to_string(),
        ProviderConfig::new(
            "https://api.anthropic.com",
            AuthScheme::Header {
                name: "x-api-key".to_string(),
            },
        )
        .endpoint(GENERATE_ENDPOINT, "/v1/messages")
        .endpoint("messages", "/v1/messages")
        .rate_limit(50, Duration::from_secs(60)),
    );
    providers.insert(
        "google".to_string(),
        ProviderConfig::new(
            "https://generativelanguage.googleapis.com",
            AuthScheme::Bearer,
        )
        .endpoint(GENERATE_ENDPOINT, "/v1beta/models/{model}:generateContent")
        .rate_limit(60, Duration::from_secs(60)),
    );
    providers
}

/// Cache section.
#[derive(Debug, Clone, Deserialize)]
pub struct CacheSettings {
    #[serde(default = "default_memory_max_entries")]
    pub memory_max_entries: u64,
    #[serde(default = "default_memory_ttl_secs")]
    pub memory_ttl_secs: u64,
    /// SQLite file for the persistent tier. No persistent tier when unset.
    #[serde(default)]
    pub path: Option<PathBuf>,
    #[serde(default = "default_true")]
    pub compression: bool,
    /// Payloads smaller than this are stored uncompressed.
    #[serde(default = "default_compression_threshold")]
    pub compression_threshold: usize,
    /// Persistent records older than this are treated as misses.
    #[serde(default)]
    pub max_age_secs: Option<u64>,
}

impl Default for CacheSettings {
    fn default() -> Self {
        Self {
            memory_max_entries: default_memory_max_entries(),
            memory_ttl_secs: default_memory_ttl_secs(),
            path: None,
            compression: true,
            compression_threshold: default_compression_threshold(),
            max_age_secs: None,
        }
    }
}

fn default_memory_max_entries() -> u64 {
    1_000
}

fn default_memory_ttl_secs() -> u64 {
    3600
}

fn default_compression_threshold() -> usize {
    1024
}

fn default_true() -> bool {
    true
}

impl From<&CacheSettings> for CacheConfig {
    fn from(s: &CacheSettings) -> Self {
        let mut config = CacheConfig::new()
            .max_entries(s.memory_max_entries)
            .ttl(Duration::from_secs(s.memory_ttl_secs))
            .compression(s.compression)
            .compression_threshold(s.compression_threshold);
        if let Some(path) = &s.path {
            config = config.persistent(path.clone());
        }
        if let Some(secs) = s.max_age_secs {
            config = config.max_age(Duration::from_secs(secs));
        }
        config
    }
}

/// Retry section.
#[derive(Debug, Clone, Deserialize)]
pub struct RetrySettings {
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
    #[serde(default = "default_initial_delay_ms")]
    pub initial_delay_ms: u64,
    #[serde(default = "default_max_delay_ms")]
    pub max_delay_ms: u64,
    #[serde(default = "default_attempt_timeout_secs")]
    pub attempt_timeout_secs: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        Self {
            max_attempts: default_max_attempts(),
            initial_delay_ms: default_initial_delay_ms(),
            max_delay_ms: default_max_delay_ms(),
            attempt_timeout_secs: default_attempt_timeout_secs(),
        }
    }
}

fn default_max_attempts() -> u32 {
    3
}

fn default_initial_delay_ms() -> u64 {
    1_000
}

fn default_max_delay_ms() -> u64 {
    10_000
}

fn default_attempt_timeout_secs() -> u64 {
    60
}

impl From<&RetrySettings> for RetryConfig {
    fn from(s: &RetrySettings) -> Self {
        RetryConfig::new()
            .max_attempts(s.max_attempts)
            .initial_delay(Duration::from_millis(s.initial_delay_ms))
            .max_delay(Duration::from_millis(s.max_delay_ms))
            .attempt_timeout(Duration::from_secs(s.attempt_timeout_secs))
    }
}

/// Queue section.
#[derive(Debug, Clone, Deserialize)]
pub struct QueueSettings {
    /// Longest rate-limit wait the worker absorbs before failing the request.
    #[serde(default = "default_max_rate_limit_wait_secs")]
    pub max_rate_limit_wait_secs: u64,
    /// How long shutdown waits for the in-flight request.
    #[serde(default = "default_stop_timeout_secs")]
    pub stop_timeout_secs: u64,
}

impl Default for QueueSettings {
    fn default() -> Self {
        Self {
            max_rate_limit_wait_secs: default_max_rate_limit_wait_secs(),
            stop_timeout_secs: default_stop_timeout_secs(),
        }
    }
}

impl QueueSettings {
    pub fn max_rate_limit_wait(&self) -> Duration {
        Duration::from_secs(self.max_rate_limit_wait_secs)
    }

    pub fn stop_timeout(&self) -> Duration {
        Duration::from_secs(self.stop_timeout_secs)
    }
}

fn default_max_rate_limit_wait_secs() -> u64 {
    60
}

fn default_stop_timeout_secs() -> u64 {
    10
}

impl GatewayConfig {
    /// Load configuration from the standard locations.
    ///
    /// Resolution order:
    /// 1. Explicit path (if provided)
    /// 2. `~/.muse/gateway.toml`
    /// 3. Built-in defaults
    pub fn load(explicit_path: Option<&Path>) -> Result<Self> {
        match Self::resolve_config_path(explicit_path)? {
            Some(path) => {
                let content = fs::read_to_string(&path).map_err(|e| {
                    GatewayError::Configuration(format!(
                        "Failed to read config file {path:?}: {e}"
                    ))
                })?;
                Self::from_toml_str(&content).map_err(|e| {
                    GatewayError::Configuration(format!("{path:?}: {e}"))
                })
            }
            None => Ok(Self::default()),
        }
    }

    /// Parse configuration from a TOML string.
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let mut config: Self = toml::from_str(content).map_err(|e| {
            GatewayError::Configuration(format!("Failed to parse config: {e}"))
        })?;
        for (name, provider) in builtin_providers() {
            config.providers.entry(name).or_insert(provider);
        }
        config.pricing.fill_builtin();
        config.validate()?;
        Ok(config)
    }

    /// Look up a provider by name.
    pub fn provider(&self, name: &str) -> Result<&ProviderConfig> {
        self.providers
            .get(name)
            .ok_or_else(|| GatewayError::Configuration(format!("unknown provider '{name}'")))
    }

    /// Reject limits and budgets that would stall or skip dispatch.
    pub(crate) fn validate(&self) -> Result<()> {
        for (name, provider) in &self.providers {
            if provider.max_requests == 0 {
                return Err(GatewayError::Configuration(format!(
                    "provider '{name}': max_requests must be at least 1"
                )));
            }
            if provider.window_secs == 0 {
                return Err(GatewayError::Configuration(format!(
                    "provider '{name}': window_secs must be at least 1"
                )));
            }
        }
        if self.retry.max_attempts == 0 {
            return Err(GatewayError::Configuration(
                "retry.max_attempts must be at least 1".to_string(),
            ));
        }
        Ok(())
    }

    fn resolve_config_path(explicit: Option<&Path>) -> Result<Option<PathBuf>> {
        if let Some(path) = explicit {
            if path.exists() {
                return Ok(Some(path.to_path_buf()));
            }
            return Err(GatewayError::Configuration(format!(
                "Config file not found: {path:?}"
            )));
        }

        if let Some(home) = dirs::home_dir() {
            let user_config = home.join(".muse").join("gateway.toml");
            if user_config.exists() {
                return Ok(Some(user_config));
            }
        }

        Ok(None)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_include_builtin_providers() {
        let config = GatewayConfig::default();
        assert!(config.providers.contains_key("openai"));
        assert!(config.providers.contains_key("anthropic"));
        assert!(config.providers.contains_key("google"));
        assert_eq!(config.retry.max_attempts, 3);
    }

    #[test]
    fn provider_section_replaces_builtin() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [providers.openai]
            base_url = "http://localhost:9000"
            max_requests = 2
            window_secs = 10
            auth = { scheme = "bearer" }
            endpoints = { generate = "/chat" }
            "#,
        )
        .unwrap();

        let openai = config.provider("openai").unwrap();
        assert_eq!(openai.base_url, "http://localhost:9000");
        assert_eq!(openai.max_requests, 2);
        assert_eq!(openai.window(), Duration::from_secs(10));
        assert!(!openai.endpoints.contains_key("chat"));
        // untouched builtins survive
        assert!(config.provider("anthropic").is_ok());
    }

    #[test]
    fn header_auth_scheme_parses() {
        let config = GatewayConfig::from_toml_str(
            r#"
            [providers.local]
            base_url = "http://localhost:1234"
            auth = { scheme = "header", name = "x-token" }
            "#,
        )
        .unwrap();
        assert_eq!(
            config.provider("local").unwrap().auth,
            AuthScheme::Header {
                name: "x-token".into()
            }
        );
    }

    #[test]
    fn zero_window_rejected() {
        let err = GatewayConfig::from_toml_str(
            r#"
            [providers.bad]
            base_url = "http://localhost"
            window_secs = 0
            auth = { scheme = "bearer" }
            "#,
        )
        .unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn unknown_provider_is_configuration_error() {
        let config = GatewayConfig::default();
        assert!(matches!(
            config.provider("nope"),
            Err(GatewayError::Configuration(_))
        ));
    }

    #[test]
    fn url_for_substitutes_model() {
        let config = GatewayConfig::default();
        let google = config.provider("google").unwrap();
        let url = google.url_for(GENERATE_ENDPOINT, Some("gemini-pro")).unwrap();
        assert_eq!(
            url,
            "https://generativelanguage.googleapis.com/v1beta/models/gemini-pro:generateContent"
        );
        assert!(google.url_for(GENERATE_ENDPOINT, None).is_err());
    }

    #[test]
    fn url_for_accepts_literal_path() {
        let provider = ProviderConfig::new("http://host/", AuthScheme::Bearer);
        assert_eq!(
            provider.url_for("/v1/models", None).unwrap(),
            "http://host/v1/models"
        );
        assert!(provider.url_for("missing", None).is_err());
    }

    #[test]
    fn explicit_missing_path_errors() {
        let err = GatewayConfig::load(Some(Path::new("/definitely/not/here.toml"))).unwrap_err();
        assert!(matches!(err, GatewayError::Configuration(_)));
    }

    #[test]
    fn cache_settings_convert() {
        let settings = CacheSettings {
            path: Some(PathBuf::from("/tmp/x.db")),
            max_age_secs: Some(30),
            ..CacheSettings::default()
        };
        let config = CacheConfig::from(&settings);
        assert_eq!(config.persistent_path, Some(PathBuf::from("/tmp/x.db")));
        assert_eq!(config.max_age, Some(Duration::from_secs(30)));
        assert!(config.compression);
    }
}
