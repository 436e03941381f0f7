//! Provider-facing plumbing.
//!
//! - [`traits::ProviderAdapter`] and the built-in adapters describe each
//!   provider's wire format; [`registry::AdapterRegistry`] maps names to them.
//! - [`rate_limit::RateLimiter`] is the per-provider admission check.
//! - [`http::RetryingHttpClient`] performs the call with bounded retries
//!   configured by [`retry::RetryConfig`].

pub mod anthropic;
pub mod google;
pub mod http;
pub mod openai;
pub mod rate_limit;
pub mod registry;
pub mod retry;
pub mod traits;

pub use anthropic::AnthropicAdapter;
pub use google::GoogleAdapter;
pub use http::{GATEWAY_USER_AGENT, HttpResponse, RetryingHttpClient};
pub use openai::OpenAiAdapter;
pub use rate_limit::RateLimiter;
pub use registry::AdapterRegistry;
pub use retry::RetryConfig;
pub use traits::{ProviderAdapter, auth_headers, text_at};

pub use reqwest::Method;
