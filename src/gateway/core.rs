//! The public gateway.

use std::collections::HashMap;
use std::sync::{Arc, PoisonError, RwLock};
use std::sync::mpsc::{self, RecvTimeoutError};
use std::time::Duration;

use serde_json::{Value, json};
use tokio::runtime::Handle;
use tokio::sync::oneshot;
use tracing::debug;

use super::pricing::PricingTable;
use super::usage::{UsageLog, UsageSummary};
use crate::cache::{CacheStats, ResponseCache, fingerprint};
use crate::config::{GENERATE_ENDPOINT, GatewayConfig};
use crate::providers::{AdapterRegistry, ProviderAdapter, RateLimiter, auth_headers};
use crate::queue::{Callback, QueuedRequest, RequestId, RequestQueue, Validator};
use crate::traits::ProjectDirectory;
use crate::types::{GenerationParams, ProjectContext, TextRequest, UsageRecord};
use crate::{GatewayError, Result};

/// Entry point for all provider traffic.
///
/// Every network call funnels through one background worker; callers may be
/// any number of tasks or threads. Build one with
/// [`Muse::builder()`](super::Muse::builder).
pub struct Gateway {
    config: GatewayConfig,
    adapters: AdapterRegistry,
    keys: RwLock<HashMap<String, String>>,
    projects: Option<Arc<dyn ProjectDirectory>>,
    cache: Arc<ResponseCache>,
    limiter: Arc<RateLimiter>,
    usage: Arc<UsageLog>,
    queue: RequestQueue,
    runtime: Handle,
}

/// A request resolved against configuration, ready to enqueue.
struct Prepared {
    provider: String,
    endpoint: String,
    url: String,
    payload: Value,
    headers: Vec<(String, String)>,
    cache_key: String,
    adapter: Option<Arc<dyn ProviderAdapter>>,
    validator: Option<Validator>,
}

impl Prepared {
    fn into_request(self, use_cache: bool, callback: Callback) -> QueuedRequest {
        let request = QueuedRequest::new(
            self.provider,
            self.endpoint,
            self.url,
            self.payload,
            self.cache_key,
            callback,
        )
        .headers(self.headers)
        .use_cache(use_cache);
        let request = match self.validator {
            Some(validator) => request.validator(validator),
            None => request,
        };
        match self.adapter {
            Some(adapter) => request.adapter(adapter),
            None => request,
        }
    }
}

/// Accepts only bodies the adapter can pull text out of.
fn parses_with(adapter: Arc<dyn ProviderAdapter>) -> Validator {
    Arc::new(move |body: &Value| adapter.parse_response(body).map(|_| ()))
}

impl Gateway {
    #[allow(clippy::too_many_arguments)]
    pub(crate) fn new(
        config: GatewayConfig,
        adapters: AdapterRegistry,
        keys: HashMap<String, String>,
        projects: Option<Arc<dyn ProjectDirectory>>,
        cache: Arc<ResponseCache>,
        limiter: Arc<RateLimiter>,
        usage: Arc<UsageLog>,
        queue: RequestQueue,
        runtime: Handle,
    ) -> Self {
        Self {
            config,
            adapters,
            keys: RwLock::new(keys),
            projects,
            cache,
            limiter,
            usage,
            queue,
            runtime,
        }
    }

    pub fn config(&self) -> &GatewayConfig {
        &self.config
    }

    pub fn adapters(&self) -> &AdapterRegistry {
        &self.adapters
    }

    pub fn rate_limiter(&self) -> &RateLimiter {
        &self.limiter
    }

    // =========================================================================
    // Credentials
    // =========================================================================

    /// Store the API key for `provider`, replacing any previous key.
    pub fn set_api_key(&self, provider: impl Into<String>, key: impl Into<String>) {
        self.keys
            .write()
            .unwrap_or_else(PoisonError::into_inner)
            .insert(provider.into(), key.into());
    }

    pub fn get_api_key(&self, provider: &str) -> Option<String> {
        self.keys
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned()
    }

    fn require_key(&self, provider: &str) -> Result<String> {
        self.get_api_key(provider).ok_or_else(|| {
            GatewayError::Configuration(format!("no API key set for provider '{provider}'"))
        })
    }

    // =========================================================================
    // Text generation
    // =========================================================================

    /// Generate text, answering from cache when possible.
    ///
    /// On a miss the request goes through the queue and this future resolves
    /// when the worker finishes it. With a deadline set, expiry returns
    /// [`GatewayError::Timeout`]; the dispatched request still completes and
    /// its response is cached.
    pub async fn generate_text(&self, request: TextRequest) -> Result<String> {
        let (prepared, adapter) = self.prepare_text(&request).await?;

        if request.use_cache
            && let Some(hit) = self.cache.get(&prepared.cache_key).await
        {
            match adapter.parse_response(&hit) {
                Ok(text) => {
                    debug!(provider = %request.provider, model = %request.model, "generate_text cache hit");
                    return Ok(text);
                }
                Err(e) => {
                    debug!(error = %e, "cached response unusable, refetching");
                    self.cache.delete(&prepared.cache_key).await;
                }
            }
        }

        let prepared = self.with_credentials(prepared, adapter.as_ref())?;
        let (tx, rx) = oneshot::channel();
        self.queue.enqueue(prepared.into_request(
            request.use_cache,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        ));

        let completed = match request.deadline {
            Some(deadline) => tokio::time::timeout(deadline, rx)
                .await
                .map_err(|_| GatewayError::Timeout(deadline))?,
            None => rx.await,
        };
        let body = completed.map_err(|_| GatewayError::Shutdown)??;
        adapter.parse_response(&body)
    }

    /// Blocking form of [`generate_text`](Self::generate_text) for callers
    /// outside the async runtime.
    ///
    /// The worker must be able to make progress while this thread waits, so
    /// the gateway has to live on a multi-threaded runtime.
    ///
    /// # Panics
    ///
    /// Panics when called from within an asynchronous execution context.
    pub fn generate_text_blocking(&self, request: TextRequest) -> Result<String> {
        let (prepared, adapter) = self.runtime.block_on(self.prepare_text(&request))?;

        if request.use_cache
            && let Some(hit) = self.runtime.block_on(self.cache.get(&prepared.cache_key))
        {
            match adapter.parse_response(&hit) {
                Ok(text) => return Ok(text),
                Err(e) => {
                    debug!(error = %e, "cached response unusable, refetching");
                    self.runtime.block_on(self.cache.delete(&prepared.cache_key));
                }
            }
        }

        let prepared = self.with_credentials(prepared, adapter.as_ref())?;
        let (tx, rx) = mpsc::channel();
        self.queue.enqueue(prepared.into_request(
            request.use_cache,
            Box::new(move |result| {
                // the receiver may have timed out and gone away
                let _ = tx.send(result);
            }),
        ));

        let body = match request.deadline {
            Some(deadline) => rx.recv_timeout(deadline).map_err(|e| match e {
                RecvTimeoutError::Timeout => GatewayError::Timeout(deadline),
                RecvTimeoutError::Disconnected => GatewayError::Shutdown,
            })?,
            None => rx.recv().map_err(|_| GatewayError::Shutdown)?,
        }?;
        adapter.parse_response(&body)
    }

    async fn prepare_text(
        &self,
        request: &TextRequest,
    ) -> Result<(Prepared, Arc<dyn ProviderAdapter>)> {
        let provider = self.config.provider(&request.provider)?;
        let adapter = self.adapters.get(&request.provider)?;

        let context = match &request.project {
            Some(name) => Some(self.resolve_project(name).await),
            None => None,
        };
        let prompt = match &context {
            Some(context) => context.enrich(&request.prompt),
            None => request.prompt.clone(),
        };
        let payload = adapter.build_request_body(&GenerationParams {
            model: request.model.clone(),
            prompt,
            max_tokens: request.max_tokens,
            temperature: request.temperature,
        });

        // the model is not always in the body (it can live in the URL)
        let key_context = json!({
            "model": request.model,
            "project": context.as_ref().map(ProjectContext::fingerprint_value),
        });
        let cache_key = fingerprint(
            &request.provider,
            GENERATE_ENDPOINT,
            &payload,
            Some(&key_context),
        );

        let prepared = Prepared {
            provider: request.provider.clone(),
            endpoint: GENERATE_ENDPOINT.to_string(),
            url: provider.url_for(GENERATE_ENDPOINT, Some(&request.model))?,
            payload,
            headers: Vec::new(),
            cache_key,
            adapter: Some(adapter.clone()),
            validator: Some(parses_with(adapter.clone())),
        };
        Ok((prepared, adapter))
    }

    async fn resolve_project(&self, name: &str) -> ProjectContext {
        let found = match &self.projects {
            Some(directory) => directory.lookup(name).await,
            None => None,
        };
        found.unwrap_or_else(|| {
            debug!(project = name, "unknown project, enriching with name only");
            ProjectContext::new(name)
        })
    }

    /// Attach auth headers. Needed only once a request will hit the network.
    fn with_credentials(
        &self,
        mut prepared: Prepared,
        adapter: &dyn ProviderAdapter,
    ) -> Result<Prepared> {
        let provider = self.config.provider(&prepared.provider)?;
        let key = self.require_key(&prepared.provider)?;
        prepared.headers = adapter.build_headers(&provider.auth, &key);
        Ok(prepared)
    }

    // =========================================================================
    // Raw requests
    // =========================================================================

    fn prepare_raw(&self, provider_name: &str, endpoint: &str, payload: Value) -> Result<Prepared> {
        let provider = self.config.provider(provider_name)?;
        let model = payload.get("model").and_then(Value::as_str);
        let url = provider.url_for(endpoint, model)?;
        let key = self.require_key(provider_name)?;
        let adapter = self.adapters.get(provider_name).ok();
        let headers = match &adapter {
            Some(adapter) => adapter.build_headers(&provider.auth, &key),
            None => auth_headers(&provider.auth, &key),
        };
        let cache_key = fingerprint(provider_name, endpoint, &payload, None);
        Ok(Prepared {
            provider: provider_name.to_string(),
            endpoint: endpoint.to_string(),
            url,
            payload,
            headers,
            cache_key,
            adapter,
            validator: None,
        })
    }

    /// Send `payload` to a provider endpoint and return the JSON response.
    ///
    /// `endpoint` is a configured endpoint name or a literal path starting
    /// with `/`. A `{model}` placeholder is filled from `payload["model"]`.
    pub async fn request(
        &self,
        provider: &str,
        endpoint: &str,
        payload: Value,
        use_cache: bool,
    ) -> Result<Value> {
        let prepared = self.prepare_raw(provider, endpoint, payload)?;
        if use_cache && let Some(hit) = self.cache.get(&prepared.cache_key).await {
            return Ok(hit);
        }

        let (tx, rx) = oneshot::channel();
        self.queue.enqueue(prepared.into_request(
            use_cache,
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        ));
        rx.await.map_err(|_| GatewayError::Shutdown)?
    }

    /// Queue a request and return immediately.
    ///
    /// `callback` runs exactly once on the worker task, with the response or
    /// an error. Errors found before queueing (unknown provider, missing
    /// key) are queued too and reach the callback the same way.
    pub fn request_async<F>(
        &self,
        provider: &str,
        endpoint: &str,
        payload: Value,
        callback: F,
    ) -> RequestId
    where
        F: FnOnce(Result<Value>) + Send + 'static,
    {
        let request = match self.prepare_raw(provider, endpoint, payload) {
            Ok(prepared) => prepared.into_request(true, Box::new(callback)),
            Err(e) => QueuedRequest::rejected(provider, endpoint, e, Box::new(callback)),
        };
        self.queue.enqueue(request)
    }

    /// Requests waiting for the worker.
    pub fn pending_requests(&self) -> usize {
        self.queue.pending()
    }

    // =========================================================================
    // Accounting
    // =========================================================================

    /// Estimated USD cost from the configured pricing table. Unknown
    /// provider/model pairs cost `0.0`.
    pub fn estimate_cost(
        &self,
        provider: &str,
        model: &str,
        prompt_tokens: u32,
        completion_tokens: u32,
    ) -> f64 {
        self.config
            .pricing
            .estimate(provider, model, prompt_tokens, completion_tokens)
    }

    pub fn pricing(&self) -> &PricingTable {
        &self.config.pricing
    }

    pub fn usage_records(&self) -> Vec<UsageRecord> {
        self.usage.records()
    }

    pub fn usage_summary(&self) -> UsageSummary {
        self.usage.summary(&self.config.pricing)
    }

    // =========================================================================
    // Cache administration
    // =========================================================================

    pub async fn clear_cache(&self) {
        self.cache.clear().await;
    }

    pub async fn cache_stats(&self) -> CacheStats {
        self.cache.stats().await
    }

    /// Sweep persistent entries older than `max_age`. Returns rows removed.
    pub async fn clear_expired(&self, max_age: Duration) -> u64 {
        self.cache.clear_expired(max_age).await
    }

    // =========================================================================
    // Lifecycle
    // =========================================================================

    /// Stop the worker and close the persistent cache.
    ///
    /// Queued requests fail with [`GatewayError::Shutdown`]; the in-flight
    /// one gets up to `timeout` to finish. Later requests fail with
    /// `Shutdown` too. If the in-flight request outlives `timeout` this
    /// returns [`GatewayError::Timeout`] and leaves the cache open so that
    /// request can still write its response back.
    pub async fn shutdown(&self, timeout: Duration) -> Result<()> {
        self.queue.stop(timeout).await?;
        self.cache.close().await;
        Ok(())
    }
}
