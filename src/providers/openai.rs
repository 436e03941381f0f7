//! OpenAI-style chat completions.

use serde_json::{Value, json};

use super::traits::{ProviderAdapter, count_at, text_at};
use crate::Result;
use crate::types::{GenerationParams, TokenUsage};

/// Adapter for `/v1/chat/completions` and compatible APIs.
#[derive(Debug, Clone, Copy, Default)]
pub struct OpenAiAdapter;

impl ProviderAdapter for OpenAiAdapter {
    fn name(&self) -> &str {
        "openai"
    }

    fn build_request_body(&self, params: &GenerationParams) -> Value {
        json!({
            "model": params.model,
            "messages": [{ "role": "user", "content": params.prompt }],
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
        })
    }

    fn parse_response(&self, body: &Value) -> Result<String> {
        text_at(body, "/choices/0/message/content")
    }

    fn parse_usage(&self, body: &Value) -> Option<TokenUsage> {
        Some(TokenUsage {
            prompt_tokens: count_at(body, "/usage/prompt_tokens")?,
            completion_tokens: count_at(body, "/usage/completion_tokens")?,
        })
    }
}
