//! Usage records produced by the worker.

use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Token counts reported by a provider.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TokenUsage {
    pub prompt_tokens: u32,
    pub completion_tokens: u32,
}

impl TokenUsage {
    /// Prompt plus completion tokens, saturating at `u32::MAX`.
    pub fn total(&self) -> u32 {
        self.prompt_tokens.saturating_add(self.completion_tokens)
    }
}

/// One dispatched provider call. Immutable once created.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UsageRecord {
    pub provider: String,
    pub endpoint: String,
    pub success: bool,
    /// Wall time of the network call, retries included.
    pub latency: Duration,
    pub status: Option<u16>,
    pub timestamp: DateTime<Utc>,
    /// Model named in the request payload, if any.
    pub model: Option<String>,
    pub tokens: Option<TokenUsage>,
}
