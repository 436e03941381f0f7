//! The single dispatch worker.
//!
//! Per request: cache re-check, rate-limit admission (absorbing short
//! waits), the provider call, response validation, cache write-back, usage
//! record, callback.

use std::sync::Arc;
use std::time::{Duration, Instant};

use async_trait::async_trait;
use chrono::Utc;
use serde_json::Value;
use tracing::{debug, info, warn};

use super::request::{QueuedRequest, RequestState};
use crate::cache::ResponseCache;
use crate::gateway::UsageLog;
use crate::providers::{HttpResponse, RateLimiter, RetryingHttpClient};
use crate::telemetry;
use crate::types::UsageRecord;
use crate::{GatewayError, Result};

/// Sends a dispatched request to its provider.
#[async_trait]
pub trait Transport: Send + Sync {
    async fn send(&self, request: &QueuedRequest) -> Result<HttpResponse>;
}

#[async_trait]
impl Transport for RetryingHttpClient {
    async fn send(&self, request: &QueuedRequest) -> Result<HttpResponse> {
        self.call(
            &request.provider,
            request.method.clone(),
            &request.url,
            &request.headers,
            Some(&request.payload),
            self.retry_config().attempt_timeout,
        )
        .await
    }
}

/// Everything the worker needs to process a request.
#[derive(Clone)]
pub struct WorkerContext {
    pub(crate) cache: Arc<ResponseCache>,
    pub(crate) limiter: Arc<RateLimiter>,
    pub(crate) transport: Arc<dyn Transport>,
    pub(crate) usage: Arc<UsageLog>,
    pub(crate) max_rate_limit_wait: Duration,
}

impl WorkerContext {
    pub fn new(
        cache: Arc<ResponseCache>,
        limiter: Arc<RateLimiter>,
        transport: Arc<dyn Transport>,
        usage: Arc<UsageLog>,
    ) -> Self {
        Self {
            cache,
            limiter,
            transport,
            usage,
            max_rate_limit_wait: Duration::from_secs(60),
        }
    }

    /// Longest rate-limit wait absorbed before failing with
    /// [`GatewayError::RateLimitExceeded`].
    pub fn max_rate_limit_wait(mut self, wait: Duration) -> Self {
        self.max_rate_limit_wait = wait;
        self
    }

    pub(crate) async fn process(&self, mut request: QueuedRequest) {
        if let Some(e) = request.take_rejection() {
            debug!(id = %request.id, provider = %request.provider, error = %e, "rejected on arrival");
            request.finish(Err(e));
            return;
        }

        if let Err(e) = request.transition(RequestState::Dispatched) {
            warn!(id = %request.id, error = %e, "skipping request");
            request.finish(Err(e));
            return;
        }

        if request.use_cache
            && let Some(hit) = self.cache.get(&request.cache_key).await
        {
            if request.validate(&hit).is_ok() {
                debug!(id = %request.id, provider = %request.provider, "served from cache at dispatch");
                request.finish(Ok(hit));
                return;
            }
            debug!(id = %request.id, provider = %request.provider, "dropping unusable cache entry");
            self.cache.delete(&request.cache_key).await;
        }

        if let Err(e) = self.admit(&request.provider).await {
            request.finish(Err(e));
            return;
        }

        let started = Instant::now();
        let outcome = self.transport.send(&request).await;
        let latency = started.elapsed();

        metrics::histogram!(
            telemetry::REQUEST_DURATION_SECONDS,
            "provider" => request.provider.clone(),
            "endpoint" => request.endpoint.clone(),
        )
        .record(latency.as_secs_f64());

        let result = match outcome {
            Ok(response) => match request.validate(&response.body) {
                Ok(()) => {
                    self.record_usage(&request, latency, Some(response.status), Some(&response.body));
                    if request.use_cache {
                        self.cache.set(&request.cache_key, response.body.clone()).await;
                    }
                    Ok(response.body)
                }
                Err(e) => {
                    warn!(
                        id = %request.id,
                        provider = %request.provider,
                        error = %e,
                        "unusable response, not cached"
                    );
                    self.record_usage(&request, latency, Some(response.status), None);
                    Err(e)
                }
            },
            Err(e) => {
                let status = e.status();
                let e = self.provider_throttle(&request.provider, e);
                warn!(
                    id = %request.id,
                    provider = %request.provider,
                    endpoint = %request.endpoint,
                    error = %e,
                    "request failed"
                );
                self.record_usage(&request, latency, status, None);
                Err(e)
            }
        };

        let status = if result.is_ok() { "ok" } else { "error" };
        metrics::counter!(
            telemetry::REQUESTS_TOTAL,
            "provider" => request.provider.clone(),
            "endpoint" => request.endpoint.clone(),
            "status" => status,
        )
        .increment(1);

        request.finish(result);
    }

    /// Wait out the provider's window, or fail if the wait is too long.
    /// Records the attempt once admitted.
    async fn admit(&self, provider: &str) -> Result<()> {
        while !self.limiter.can_proceed(provider) {
            let wait = self.limiter.wait_time(provider);
            metrics::counter!(telemetry::RATE_LIMITED_TOTAL, "provider" => provider.to_string())
                .increment(1);
            if wait > self.max_rate_limit_wait {
                return Err(GatewayError::RateLimitExceeded {
                    provider: provider.to_string(),
                    wait,
                });
            }
            info!(provider, wait_ms = wait.as_millis() as u64, "rate limited, waiting");
            tokio::time::sleep(wait).await;
        }
        self.limiter.record_attempt(provider);
        Ok(())
    }

    /// A provider-side 429 becomes the same error a local denial produces.
    fn provider_throttle(&self, provider: &str, err: GatewayError) -> GatewayError {
        match err {
            GatewayError::ProviderRateLimited { retry_after } => {
                metrics::counter!(telemetry::RATE_LIMITED_TOTAL, "provider" => provider.to_string())
                    .increment(1);
                GatewayError::RateLimitExceeded {
                    provider: provider.to_string(),
                    wait: retry_after.unwrap_or_else(|| self.limiter.wait_time(provider)),
                }
            }
            other => other,
        }
    }

    fn record_usage(
        &self,
        request: &QueuedRequest,
        latency: Duration,
        status: Option<u16>,
        body: Option<&Value>,
    ) {
        let tokens = match (&request.adapter, body) {
            (Some(adapter), Some(body)) => adapter.parse_usage(body),
            _ => None,
        };
        self.usage.record(UsageRecord {
            provider: request.provider.clone(),
            endpoint: request.endpoint.clone(),
            success: body.is_some(),
            latency,
            status,
            timestamp: Utc::now(),
            model: request.model().map(str::to_string),
            tokens,
        });
    }
}
