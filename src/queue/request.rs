//! Queued requests and their lifecycle.
//!
//! ```text
//! Queued ──► Dispatched ──► Completed
//!                      └──► Failed
//! ```
//!
//! Terminal states are final; retrying means submitting a new request.
//! Every request carries a completion that fires exactly once: on finish,
//! or with [`GatewayError::Shutdown`] if the request is dropped unfinished.

use std::fmt;
use std::panic::{AssertUnwindSafe, catch_unwind};
use std::sync::{Arc, Mutex, PoisonError};

use reqwest::Method;
use serde_json::Value;
use tracing::error;
use uuid::Uuid;

use crate::providers::ProviderAdapter;
use crate::{GatewayError, Result};

/// Identifier handed back by `enqueue`.
pub type RequestId = Uuid;

/// Completion callback. Runs on the worker task.
pub type Callback = Box<dyn FnOnce(Result<Value>) + Send + 'static>;

/// Checks a successful response body before it counts as a success. A body
/// the validator rejects fails the request and is never cached.
pub type Validator = Arc<dyn Fn(&Value) -> Result<()> + Send + Sync>;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum RequestState {
    Queued,
    Dispatched,
    Completed,
    Failed,
}

impl RequestState {
    pub fn as_str(&self) -> &'static str {
        match self {
            RequestState::Queued => "queued",
            RequestState::Dispatched => "dispatched",
            RequestState::Completed => "completed",
            RequestState::Failed => "failed",
        }
    }

    pub fn is_terminal(&self) -> bool {
        matches!(self, RequestState::Completed | RequestState::Failed)
    }

    pub fn can_transition_to(&self, next: RequestState) -> bool {
        matches!(
            (self, next),
            (RequestState::Queued, RequestState::Dispatched)
                | (RequestState::Dispatched, RequestState::Completed)
                | (RequestState::Dispatched, RequestState::Failed)
                // a queue that shuts down fails requests it never dispatched
                | (RequestState::Queued, RequestState::Failed)
        )
    }
}

impl fmt::Display for RequestState {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// One-shot callback holder. Fires at most once, and fires
/// [`GatewayError::Shutdown`] from `Drop` if never fired explicitly.
///
/// The mutex makes the holder `Sync`, so a request can be borrowed across
/// awaits on the worker.
struct Completion {
    callback: Mutex<Option<Callback>>,
}

impl Completion {
    fn new(callback: Callback) -> Self {
        Self {
            callback: Mutex::new(Some(callback)),
        }
    }

    fn fire(&self, result: Result<Value>) {
        let callback = self
            .callback
            .lock()
            .unwrap_or_else(PoisonError::into_inner)
            .take();
        if let Some(callback) = callback
            && catch_unwind(AssertUnwindSafe(|| callback(result))).is_err()
        {
            error!("request callback panicked");
        }
    }
}

impl Drop for Completion {
    fn drop(&mut self) {
        self.fire(Err(GatewayError::Shutdown));
    }
}

/// A request owned by the queue until the worker finishes it.
pub struct QueuedRequest {
    pub id: RequestId,
    pub provider: String,
    /// Endpoint name (or literal path) used for logging and usage records.
    pub endpoint: String,
    pub url: String,
    pub method: Method,
    pub payload: Value,
    pub headers: Vec<(String, String)>,
    pub use_cache: bool,
    pub cache_key: String,
    /// Adapter used to pull token usage out of the response.
    pub(crate) adapter: Option<Arc<dyn ProviderAdapter>>,
    pub(crate) validator: Option<Validator>,
    /// Error to fail with on arrival, before any dispatch work.
    rejection: Option<GatewayError>,
    state: RequestState,
    completion: Completion,
}

impl QueuedRequest {
    /// A cacheable `POST` of `payload` to `url`.
    pub fn new(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        url: impl Into<String>,
        payload: Value,
        cache_key: impl Into<String>,
        callback: Callback,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            provider: provider.into(),
            endpoint: endpoint.into(),
            url: url.into(),
            method: Method::POST,
            payload,
            headers: Vec::new(),
            use_cache: true,
            cache_key: cache_key.into(),
            adapter: None,
            validator: None,
            rejection: None,
            state: RequestState::Queued,
            completion: Completion::new(callback),
        }
    }

    pub fn method(mut self, method: Method) -> Self {
        self.method = method;
        self
    }

    pub fn headers(mut self, headers: Vec<(String, String)>) -> Self {
        self.headers = headers;
        self
    }

    pub fn use_cache(mut self, enabled: bool) -> Self {
        self.use_cache = enabled;
        self
    }

    pub(crate) fn adapter(mut self, adapter: Arc<dyn ProviderAdapter>) -> Self {
        self.adapter = Some(adapter);
        self
    }

    /// Only bodies accepted by `validator` complete the request or reach
    /// the cache.
    pub fn validator(mut self, validator: Validator) -> Self {
        self.validator = Some(validator);
        self
    }

    /// A request that fails with `error` as soon as the worker reaches it.
    ///
    /// Lets errors found before queueing reach the callback on the worker
    /// task like any other outcome.
    pub fn rejected(
        provider: impl Into<String>,
        endpoint: impl Into<String>,
        error: GatewayError,
        callback: Callback,
    ) -> Self {
        let mut request =
            Self::new(provider, endpoint, "", Value::Null, "", callback).use_cache(false);
        request.rejection = Some(error);
        request
    }

    pub(crate) fn take_rejection(&mut self) -> Option<GatewayError> {
        self.rejection.take()
    }

    /// Run the validator, if any, over a response body.
    pub(crate) fn validate(&self, body: &Value) -> Result<()> {
        match &self.validator {
            Some(validator) => validator(body),
            None => Ok(()),
        }
    }

    pub fn state(&self) -> RequestState {
        self.state
    }

    /// Model named in the payload, if any.
    pub fn model(&self) -> Option<&str> {
        self.payload.get("model").and_then(Value::as_str)
    }

    pub(crate) fn transition(&mut self, next: RequestState) -> Result<()> {
        if !self.state.can_transition_to(next) {
            return Err(GatewayError::InvalidTransition {
                from: self.state.as_str(),
                to: next.as_str(),
            });
        }
        self.state = next;
        Ok(())
    }

    /// Move to the terminal state matching `result` and fire the callback.
    pub(crate) fn finish(mut self, result: Result<Value>) {
        let next = if result.is_ok() {
            RequestState::Completed
        } else {
            RequestState::Failed
        };
        if let Err(e) = self.transition(next) {
            error!(id = %self.id, error = %e, "finishing request from unexpected state");
        }
        self.completion.fire(result);
    }
}

impl fmt::Debug for QueuedRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        // headers carry credentials; keep them out of logs
        f.debug_struct("QueuedRequest")
            .field("id", &self.id)
            .field("provider", &self.provider)
            .field("endpoint", &self.endpoint)
            .field("method", &self.method)
            .field("use_cache", &self.use_cache)
            .field("state", &self.state)
            .finish_non_exhaustive()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;
    use std::sync::atomic::{AtomicU32, Ordering};

    fn request(callback: Callback) -> QueuedRequest {
        QueuedRequest::new("openai", "generate", "http://x", json!({}), "key", callback)
    }

    #[test]
    fn valid_transitions() {
        let mut req = request(Box::new(|_| {}));
        assert_eq!(req.state(), RequestState::Queued);
        req.transition(RequestState::Dispatched).unwrap();
        req.transition(RequestState::Completed).unwrap();
        assert!(req.state().is_terminal());
    }

    #[test]
    fn terminal_states_are_final() {
        let mut req = request(Box::new(|_| {}));
        req.transition(RequestState::Dispatched).unwrap();
        req.transition(RequestState::Failed).unwrap();
        let err = req.transition(RequestState::Queued).unwrap_err();
        assert!(matches!(
            err,
            GatewayError::InvalidTransition {
                from: "failed",
                to: "queued"
            }
        ));
        assert!(req.transition(RequestState::Dispatched).is_err());
    }

    #[test]
    fn cannot_skip_dispatch_to_complete() {
        let mut req = request(Box::new(|_| {}));
        assert!(req.transition(RequestState::Completed).is_err());
    }

    #[test]
    fn finish_fires_once() {
        let calls = Arc::new(AtomicU32::new(0));
        let c = calls.clone();
        let mut req = request(Box::new(move |r| {
            assert_eq!(r.unwrap(), json!("ok"));
            c.fetch_add(1, Ordering::SeqCst);
        }));
        req.transition(RequestState::Dispatched).unwrap();
        req.finish(Ok(json!("ok")));
        assert_eq!(calls.load(Ordering::SeqCst), 1);
    }

    #[test]
    fn dropped_request_reports_shutdown() {
        let seen = Arc::new(Mutex::new(None));
        let s = seen.clone();
        let req = request(Box::new(move |r| {
            *s.lock().unwrap() = Some(matches!(r, Err(GatewayError::Shutdown)));
        }));
        drop(req);
        assert_eq!(*seen.lock().unwrap(), Some(true));
    }

    #[test]
    fn panicking_callback_is_contained() {
        let req = request(Box::new(|_| panic!("boom")));
        req.finish(Err(GatewayError::Shutdown));
    }

    #[test]
    fn validator_gates_bodies() {
        let req = request(Box::new(|_| {})).validator(Arc::new(|body: &Value| {
            body.get("text")
                .map(|_| ())
                .ok_or_else(|| GatewayError::Decode("missing text".into()))
        }));
        assert!(req.validate(&json!({ "text": "hi" })).is_ok());
        assert!(matches!(
            req.validate(&json!({})),
            Err(GatewayError::Decode(_))
        ));
        assert!(request(Box::new(|_| {})).validate(&json!({})).is_ok());
    }

    #[test]
    fn rejected_request_carries_its_error() {
        let mut req = QueuedRequest::rejected(
            "nope",
            "generate",
            GatewayError::Configuration("unknown provider".into()),
            Box::new(|_| {}),
        );
        assert!(!req.use_cache);
        assert!(matches!(
            req.take_rejection(),
            Some(GatewayError::Configuration(_))
        ));
        assert!(req.take_rejection().is_none());
    }

    #[test]
    fn debug_hides_headers() {
        let req = request(Box::new(|_| {}))
            .headers(vec![("Authorization".into(), "Bearer secret".into())]);
        assert!(!format!("{req:?}").contains("secret"));
    }
}
