//! Provider adapter trait.
//!
//! An adapter knows one provider's wire format: how to authenticate, how to
//! phrase a generation request, and where the generated text sits in the
//! response. The gateway never branches on provider names; it looks the
//! adapter up in an [`AdapterRegistry`](super::AdapterRegistry).
//!
//! # Example
//!
//! ```ignore
//! struct EchoAdapter;
//!
//! impl ProviderAdapter for EchoAdapter {
//!     fn name(&self) -> &str { "echo" }
//!     fn build_request_body(&self, p: &GenerationParams) -> Value { json!({ "text": p.prompt }) }
//!     fn parse_response(&self, body: &Value) -> Result<String> {
//!         text_at(body, "/text")
//!     }
//! }
//! ```

use serde_json::Value;

use crate::config::AuthScheme;
use crate::types::{GenerationParams, TokenUsage};
use crate::{GatewayError, Result};

/// Wire-format adapter for one provider.
pub trait ProviderAdapter: Send + Sync {
    /// Provider name for logging/debugging.
    fn name(&self) -> &str;

    /// Headers carrying the API key (plus any provider-fixed headers).
    ///
    /// `Content-Type` and `User-Agent` are added by the transport.
    fn build_headers(&self, auth: &AuthScheme, api_key: &str) -> Vec<(String, String)> {
        auth_headers(auth, api_key)
    }

    /// JSON body for a text generation.
    fn build_request_body(&self, params: &GenerationParams) -> Value;

    /// Extract generated text; [`GatewayError::Decode`] if the shape is wrong.
    fn parse_response(&self, body: &Value) -> Result<String>;

    /// Token counts, when the provider reports them.
    fn parse_usage(&self, _body: &Value) -> Option<TokenUsage> {
        None
    }
}

/// Standard auth headers for a scheme.
pub fn auth_headers(auth: &AuthScheme, api_key: &str) -> Vec<(String, String)> {
    match auth {
        AuthScheme::Bearer => vec![("Authorization".to_string(), format!("Bearer {api_key}"))],
        AuthScheme::Header { name } => vec![(name.clone(), api_key.to_string())],
    }
}

/// String at a JSON pointer, or a decode error naming the pointer.
pub fn text_at(body: &Value, pointer: &str) -> Result<String> {
    body.pointer(pointer)
        .and_then(Value::as_str)
        .map(str::to_string)
        .ok_or_else(|| GatewayError::Decode(format!("no text at {pointer}")))
}

/// Non-negative integer at a JSON pointer.
pub(crate) fn count_at(body: &Value, pointer: &str) -> Option<u32> {
    body.pointer(pointer)
        .and_then(Value::as_u64)
        .and_then(|n| u32::try_from(n).ok())
}
