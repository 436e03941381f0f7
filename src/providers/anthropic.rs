//! Anthropic messages API.

use serde_json::{Value, json};

use super::traits::{ProviderAdapter, auth_headers, count_at};
use crate::config::AuthScheme;
use crate::types::{GenerationParams, TokenUsage};
use crate::{GatewayError, Result};

/// API version header value sent with every request.
pub const ANTHROPIC_VERSION: &str = "2023-06-01";

/// Adapter for `/v1/messages`.
#[derive(Debug, Clone, Copy, Default)]
pub struct AnthropicAdapter;

impl ProviderAdapter for AnthropicAdapter {
    fn name(&self) -> &str {
        "anthropic"
    }

    fn build_headers(&self, auth: &AuthScheme, api_key: &str) -> Vec<(String, String)> {
        let mut headers = auth_headers(auth, api_key);
        headers.push((
            "anthropic-version".to_string(),
            ANTHROPIC_VERSION.to_string(),
        ));
        headers
    }

    fn build_request_body(&self, params: &GenerationParams) -> Value {
        json!({
            "model": params.model,
            "max_tokens": params.max_tokens,
            "temperature": params.temperature,
            "messages": [{ "role": "user", "content": params.prompt }],
        })
    }

    fn parse_response(&self, body: &Value) -> Result<String> {
        // content is a list of blocks; concatenate the text ones
        let blocks = body
            .get("content")
            .and_then(Value::as_array)
            .ok_or_else(|| GatewayError::Decode("missing content blocks".to_string()))?;
        let text: String = blocks
            .iter()
            .filter(|b| b.get("type").and_then(Value::as_str) == Some("text"))
            .filter_map(|b| b.get("text").and_then(Value::as_str))
            .collect();
        if text.is_empty() && !blocks.is_empty() {
            return Err(GatewayError::Decode("no text content block".to_string()));
        }
        Ok(text)
    }

    fn parse_usage(&self, body: &Value) -> Option<TokenUsage> {
        Some(TokenUsage {
            prompt_tokens: count_at(body, "/usage/input_tokens")?,
            completion_tokens: count_at(body, "/usage/output_tokens")?,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn headers_include_version() {
        let auth = AuthScheme::Header {
            name: "x-api-key".into(),
        };
        let headers = AnthropicAdapter.build_headers(&auth, "sk-ant");
        assert!(headers.contains(&("x-api-key".to_string(), "sk-ant".to_string())));
        assert!(headers.contains(&(
            "anthropic-version".to_string(),
            ANTHROPIC_VERSION.to_string()
        )));
    }

    #[test]
    fn joins_text_blocks() {
        let body = json!({
            "content": [
                {"type": "text", "text": "Hello, "},
                {"type": "tool_use", "id": "t1"},
                {"type": "text", "text": "world"}
            ]
        });
        assert_eq!(AnthropicAdapter.parse_response(&body).unwrap(), "Hello, world");
    }

    #[test]
    fn non_text_only_is_decode_error() {
        let body = json!({"content": [{"type": "tool_use", "id": "t1"}]});
        assert!(matches!(
            AnthropicAdapter.parse_response(&body),
            Err(GatewayError::Decode(_))
        ));
    }

    #[test]
    fn missing_content_is_decode_error() {
        assert!(AnthropicAdapter.parse_response(&json!({"id": "x"})).is_err());
    }

    #[test]
    fn parses_usage() {
        let body = json!({"usage": {"input_tokens": 5, "output_tokens": 7}});
        assert_eq!(AnthropicAdapter.parse_usage(&body).unwrap().total(), 12);
    }
}
