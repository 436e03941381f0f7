//! Text generation requests and project context.

use std::collections::BTreeMap;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::{Value, json};

/// Options for a single text generation.
///
/// ```rust
/// # use muse::TextRequest;
/// let request = TextRequest::new("openai", "gpt-4o-mini", "Write a haiku")
///     .max_tokens(50)
///     .temperature(0.7)
///     .project("demo");
/// ```
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TextRequest {
    pub provider: String,
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
    /// Consult and populate the response cache. Default: true.
    pub use_cache: bool,
    /// Project whose context enriches the prompt.
    pub project: Option<String>,
    /// How long the caller is willing to wait. The dispatched request is not
    /// cancelled on expiry; its result is discarded.
    #[serde(skip)]
    pub deadline: Option<Duration>,
}

impl TextRequest {
    pub fn new(
        provider: impl Into<String>,
        model: impl Into<String>,
        prompt: impl Into<String>,
    ) -> Self {
        Self {
            provider: provider.into(),
            model: model.into(),
            prompt: prompt.into(),
            max_tokens: 1024,
            temperature: 0.7,
            use_cache: true,
            project: None,
            deadline: None,
        }
    }

    pub fn max_tokens(mut self, n: u32) -> Self {
        self.max_tokens = n;
        self
    }

    pub fn temperature(mut self, t: f32) -> Self {
        self.temperature = t;
        self
    }

    /// Enable or disable caching for this request.
    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    pub fn project(mut self, name: impl Into<String>) -> Self {
        self.project = Some(name.into());
        self
    }

    pub fn deadline(mut self, deadline: Duration) -> Self {
        self.deadline = Some(deadline);
        self
    }
}

/// Provider-neutral generation parameters handed to a
/// [`ProviderAdapter`](crate::providers::ProviderAdapter).
///
/// `prompt` is already enriched with project context.
#[derive(Debug, Clone, PartialEq)]
pub struct GenerationParams {
    pub model: String,
    pub prompt: String,
    pub max_tokens: u32,
    pub temperature: f32,
}

/// Project metadata that shapes generated text.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProjectContext {
    pub name: String,
    /// Free-form attributes (genre, tone, synopsis, ...), rendered in key order.
    #[serde(default)]
    pub details: BTreeMap<String, String>,
}

impl ProjectContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            details: BTreeMap::new(),
        }
    }

    pub fn detail(mut self, key: impl Into<String>, value: impl Into<String>) -> Self {
        self.details.insert(key.into(), value.into());
        self
    }

    /// Prepend the project preamble to `prompt`.
    pub fn enrich(&self, prompt: &str) -> String {
        let mut out = format!("Project: {}\n", self.name);
        for (key, value) in &self.details {
            out.push_str(&format!("{key}: {value}\n"));
        }
        out.push('\n');
        out.push_str(prompt);
        out
    }

    /// Fingerprint input for this context.
    pub fn fingerprint_value(&self) -> Value {
        json!({ "name": self.name, "details": self.details })
    }
}
