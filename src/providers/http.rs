//! Provider HTTP transport with bounded retries.

use std::time::Duration;

use reqwest::header::{CONTENT_TYPE, RETRY_AFTER, USER_AGENT};
use reqwest::{Client, Method, Response};
use serde_json::Value;
use tracing::debug;

use super::retry::{RetryConfig, with_retry};
use crate::{GatewayError, Result};

/// `User-Agent` sent with every provider call.
pub const GATEWAY_USER_AGENT: &str = concat!("muse/", env!("CARGO_PKG_VERSION"));

/// Longest error body excerpt carried in error messages.
const ERROR_BODY_LIMIT: usize = 512;

/// A successful provider response.
#[derive(Debug, Clone, PartialEq)]
pub struct HttpResponse {
    pub status: u16,
    pub body: Value,
}

/// Performs one logical provider call, retrying transient failures.
///
/// Every attempt gets its own timeout; there is no aggregate deadline beyond
/// attempts plus backoff. Callers needing one wrap [`call`](Self::call) in
/// their own timeout.
#[derive(Clone)]
pub struct RetryingHttpClient {
    http: Client,
    retry: RetryConfig,
}

impl RetryingHttpClient {
    pub fn new(retry: RetryConfig) -> Result<Self> {
        let http = Client::builder()
            .user_agent(GATEWAY_USER_AGENT)
            .build()
            .map_err(|e| GatewayError::Configuration(format!("failed to build HTTP client: {e}")))?;
        Ok(Self::with_client(http, retry))
    }

    /// Use a preconfigured reqwest client (proxies, TLS roots, ...).
    pub fn with_client(http: Client, retry: RetryConfig) -> Self {
        Self { http, retry }
    }

    pub fn retry_config(&self) -> &RetryConfig {
        &self.retry
    }

    /// Perform the call. `label` names the provider in logs and metrics.
    ///
    /// On success the body is parsed as JSON (an empty body is `null`);
    /// a 2xx body that is not JSON is a [`GatewayError::Decode`].
    pub async fn call(
        &self,
        label: &str,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<HttpResponse> {
        with_retry(&self.retry, label, || {
            self.attempt(method.clone(), url, headers, body, timeout)
        })
        .await
    }

    async fn attempt(
        &self,
        method: Method,
        url: &str,
        headers: &[(String, String)],
        body: Option<&Value>,
        timeout: Duration,
    ) -> Result<HttpResponse> {
        let mut request = self
            .http
            .request(method, url)
            .timeout(timeout)
            .header(CONTENT_TYPE, "application/json")
            .header(USER_AGENT, GATEWAY_USER_AGENT);
        for (name, value) in headers {
            request = request.header(name.as_str(), value.as_str());
        }
        if let Some(body) = body {
            request = request.json(body);
        }

        let response = request
            .send()
            .await
            .map_err(|e| transport_error(e, timeout))?;
        let status = response.status().as_u16();
        debug!(url, status, "provider responded");

        if status == 429 {
            return Err(GatewayError::ProviderRateLimited {
                retry_after: retry_after(&response),
            });
        }

        let bytes = response
            .bytes()
            .await
            .map_err(|e| transport_error(e, timeout))?;

        if !(200..300).contains(&status) {
            return Err(GatewayError::Api {
                status,
                message: excerpt(&bytes),
            });
        }

        let body = if bytes.is_empty() {
            Value::Null
        } else {
            serde_json::from_slice(&bytes).map_err(|e| {
                GatewayError::Decode(format!("response is not JSON ({e}): {}", excerpt(&bytes)))
            })?
        };
        Ok(HttpResponse { status, body })
    }
}

fn transport_error(err: reqwest::Error, timeout: Duration) -> GatewayError {
    if err.is_timeout() {
        GatewayError::AttemptTimeout(timeout)
    } else if err.is_builder() {
        GatewayError::Configuration(format!("invalid request: {err}"))
    } else {
        GatewayError::Http(err.to_string())
    }
}

/// Parse a `Retry-After` header given in seconds.
fn retry_after(response: &Response) -> Option<Duration> {
    response
        .headers()
        .get(RETRY_AFTER)?
        .to_str()
        .ok()?
        .trim()
        .parse::<f64>()
        .ok()
        .filter(|secs| secs.is_finite() && *secs >= 0.0)
        .map(Duration::from_secs_f64)
}

fn excerpt(bytes: &[u8]) -> String {
    let text = String::from_utf8_lossy(bytes);
    let mut end = text.len().min(ERROR_BODY_LIMIT);
    while !text.is_char_boundary(end) {
        end -= 1;
    }
    text[..end].to_string()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn excerpt_truncates_on_char_boundary() {
        let long = "é".repeat(400);
        let cut = excerpt(long.as_bytes());
        assert!(cut.len() <= ERROR_BODY_LIMIT);
        assert!(cut.chars().all(|c| c == 'é'));
    }

    #[test]
    fn user_agent_is_versioned() {
        assert!(GATEWAY_USER_AGENT.starts_with("muse/"));
    }
}
