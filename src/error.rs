//! Gateway error types

use std::time::Duration;

/// Gateway error types
#[derive(Debug, thiserror::Error)]
pub enum GatewayError {
    // Configuration errors
    #[error("configuration error: {0}")]
    Configuration(String),

    // Admission control
    #[error("rate limit exceeded for {provider}, retry after {wait:?}")]
    RateLimitExceeded { provider: String, wait: Duration },

    // Terminal network failure (after the retry budget is spent)
    #[error("request failed after {attempts} attempt(s){}: {message}", status_suffix(.status))]
    RequestFailed {
        attempts: u32,
        status: Option<u16>,
        message: String,
    },

    // Per-attempt failures, classified for retry
    #[error("HTTP error: {0}")]
    Http(String),

    #[error("API error ({status}): {message}")]
    Api { status: u16, message: String },

    #[error("attempt timed out after {0:?}")]
    AttemptTimeout(Duration),

    /// Provider answered 429. Not retried; the worker surfaces it as
    /// [`GatewayError::RateLimitExceeded`].
    #[error("provider rate limited the request, retry after {retry_after:?}")]
    ProviderRateLimited { retry_after: Option<Duration> },

    // Cache tier failures (absorbed by the gateway, never surfaced for a request)
    #[error("cache error: {0}")]
    Cache(String),

    // Data errors
    #[error("unexpected response payload: {0}")]
    Decode(String),

    // Caller-side deadline
    #[error("timed out waiting for response after {0:?}")]
    Timeout(Duration),

    #[error("request queue is shut down")]
    Shutdown,

    #[error("invalid request state transition: {from} -> {to}")]
    InvalidTransition {
        from: &'static str,
        to: &'static str,
    },
}

fn status_suffix(status: &Option<u16>) -> String {
    status.map(|s| format!(" (status {s})")).unwrap_or_default()
}

impl GatewayError {
    /// Whether this error is worth another attempt.
    ///
    /// Transport errors, attempt timeouts, and 5xx responses are transient.
    /// Everything else (4xx, auth, decode, configuration) fails immediately.
    pub fn is_transient(&self) -> bool {
        match self {
            GatewayError::Http(_) | GatewayError::AttemptTimeout(_) => true,
            GatewayError::Api { status, .. } => *status >= 500,
            _ => false,
        }
    }

    /// Convert a per-attempt error into what the caller sees once the
    /// retry loop gives up after `attempts` tries.
    ///
    /// Network and HTTP failures become [`GatewayError::RequestFailed`];
    /// everything else passes through unchanged.
    pub fn into_terminal(self, attempts: u32) -> Self {
        match self {
            GatewayError::Http(_) | GatewayError::Api { .. } | GatewayError::AttemptTimeout(_) => {
                GatewayError::RequestFailed {
                    attempts,
                    status: self.status(),
                    message: self.to_string(),
                }
            }
            other => other,
        }
    }

    /// HTTP status associated with this error, if any.
    pub fn status(&self) -> Option<u16> {
        match self {
            GatewayError::Api { status, .. } => Some(*status),
            GatewayError::RequestFailed { status, .. } => *status,
            GatewayError::ProviderRateLimited { .. } => Some(429),
            _ => None,
        }
    }
}

impl From<serde_json::Error> for GatewayError {
    fn from(err: serde_json::Error) -> Self {
        GatewayError::Decode(err.to_string())
    }
}

impl From<sqlx::Error> for GatewayError {
    fn from(err: sqlx::Error) -> Self {
        GatewayError::Cache(err.to_string())
    }
}

/// Result type alias for gateway operations
pub type Result<T> = std::result::Result<T, GatewayError>;
