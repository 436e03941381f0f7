//! Google Gemini `generateContent`.
//!
//! The model travels in the URL path (`/models/{model}:generateContent`),
//! not in the body.

use serde_json::{Value, json};

use super::traits::{ProviderAdapter, count_at, text_at};
use crate::Result;
use crate::types::{GenerationParams, TokenUsage};

#[derive(Debug, Clone, Copy, Default)]
pub struct GoogleAdapter;

impl ProviderAdapter for GoogleAdapter {
    fn name(&self) -> &str {
        "google"
    }

    fn build_request_body(&self, params: &GenerationParams) -> Value {
        json!({
            "contents": [{ "role": "user", "parts": [{ "text": params.prompt }] }],
            "generationConfig": {
                "maxOutputTokens": params.max_tokens,
                "temperature": params.temperature,
            },
        })
    }

    fn parse_response(&self, body: &Value) -> Result<String> {
        text_at(body, "/candidates/0/content/parts/0/text")
    }

    fn parse_usage(&self, body: &Value) -> Option<TokenUsage> {
        Some(TokenUsage {
            prompt_tokens: count_at(body, "/usageMetadata/promptTokenCount")?,
            completion_tokens: count_at(body, "/usageMetadata/candidatesTokenCount")?,
        })
    }
}
