//! FIFO request queue drained by a single background worker.
//!
//! At most one worker exists at a time. `enqueue` starts it when idle; it
//! exits once the queue is empty, clearing its flag under the same lock
//! that guards the queue, so a request is never stranded between the
//! worker's last pop and the next enqueue.
//!
//! After [`stop`](RequestQueue::stop), queued and newly enqueued requests
//! complete with [`GatewayError::Shutdown`](crate::GatewayError::Shutdown).

mod request;
mod worker;

pub use request::{Callback, QueuedRequest, RequestId, RequestState, Validator};
pub use worker::{Transport, WorkerContext};

use std::collections::VecDeque;
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::time::Duration;

use tokio::runtime::Handle;
use tokio::task::JoinHandle;
use tracing::{debug, error, warn};

use crate::telemetry;
use crate::{GatewayError, Result};

#[derive(Default)]
struct QueueState {
    pending: VecDeque<QueuedRequest>,
    running: bool,
    stopped: bool,
    worker: Option<JoinHandle<()>>,
}

struct Shared {
    state: Mutex<QueueState>,
    context: WorkerContext,
}

impl Shared {
    fn lock(&self) -> MutexGuard<'_, QueueState> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// The gateway's request queue.
pub struct RequestQueue {
    shared: Arc<Shared>,
    runtime: Handle,
}

impl RequestQueue {
    /// Create a queue whose worker runs on the current tokio runtime.
    pub fn new(context: WorkerContext) -> Result<Self> {
        let runtime = Handle::try_current().map_err(|_| {
            GatewayError::Configuration("request queue needs a tokio runtime".to_string())
        })?;
        Ok(Self::with_runtime(context, runtime))
    }

    pub fn with_runtime(context: WorkerContext, runtime: Handle) -> Self {
        Self {
            shared: Arc::new(Shared {
                state: Mutex::new(QueueState::default()),
                context,
            }),
            runtime,
        }
    }

    /// Append a request, starting the worker if idle. Never blocks on I/O.
    pub fn enqueue(&self, request: QueuedRequest) -> RequestId {
        let id = request.id;
        let mut state = self.shared.lock();
        if state.stopped {
            drop(state);
            debug!(%id, "queue stopped, rejecting request");
            request.finish(Err(GatewayError::Shutdown));
            return id;
        }

        state.pending.push_back(request);
        metrics::gauge!(telemetry::QUEUE_DEPTH).set(state.pending.len() as f64);

        if !state.running {
            state.running = true;
            state.worker = Some(self.runtime.spawn(drain(self.shared.clone())));
        }
        id
    }

    /// Requests waiting for dispatch (the in-flight one excluded).
    pub fn pending(&self) -> usize {
        self.shared.lock().pending.len()
    }

    /// Whether a worker is currently draining the queue.
    pub fn is_running(&self) -> bool {
        self.shared.lock().running
    }

    pub fn is_stopped(&self) -> bool {
        self.shared.lock().stopped
    }

    /// Stop accepting work, fail everything still queued, and wait up to
    /// `timeout` for the in-flight request.
    ///
    /// On timeout the in-flight request keeps running and its callback still
    /// fires when it finishes.
    pub async fn stop(&self, timeout: Duration) -> Result<()> {
        let (abandoned, worker) = {
            let mut state = self.shared.lock();
            state.stopped = true;
            let abandoned: Vec<QueuedRequest> = state.pending.drain(..).collect();
            metrics::gauge!(telemetry::QUEUE_DEPTH).set(0.0);
            (abandoned, state.worker.take())
        };

        if !abandoned.is_empty() {
            debug!(count = abandoned.len(), "failing queued requests on stop");
        }
        for request in abandoned {
            request.finish(Err(GatewayError::Shutdown));
        }

        let Some(worker) = worker else {
            return Ok(());
        };
        match tokio::time::timeout(timeout, worker).await {
            Ok(Ok(())) => Ok(()),
            Ok(Err(e)) => {
                warn!(error = %e, "queue worker ended abnormally");
                Ok(())
            }
            Err(_) => {
                warn!(timeout_ms = timeout.as_millis() as u64, "in-flight request outlived stop");
                Err(GatewayError::Timeout(timeout))
            }
        }
    }
}

async fn drain(shared: Arc<Shared>) {
    loop {
        let next = {
            let mut state = shared.lock();
            match state.pending.pop_front() {
                Some(request) => {
                    metrics::gauge!(telemetry::QUEUE_DEPTH).set(state.pending.len() as f64);
                    request
                }
                None => {
                    state.running = false;
                    return;
                }
            }
        };
        // a panic inside `process` ends only its own task; the dropped
        // request reports Shutdown and the queue keeps draining
        let context = shared.context.clone();
        let id = next.id;
        if let Err(e) = tokio::spawn(async move { context.process(next).await }).await {
            error!(%id, error = %e, "request processing panicked");
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{CacheConfig, ResponseCache};
    use crate::gateway::UsageLog;
    use crate::providers::{HttpResponse, RateLimiter};
    use async_trait::async_trait;
    use serde_json::{Value, json};
    use std::sync::Mutex as StdMutex;

    /// Echoes the payload back after an optional delay, recording order.
    #[derive(Default)]
    struct EchoTransport {
        seen: StdMutex<Vec<Value>>,
        delay: Duration,
        /// Payload `n` whose send panics.
        panic_on: Option<u64>,
    }

    #[async_trait]
    impl Transport for EchoTransport {
        async fn send(&self, request: &QueuedRequest) -> Result<HttpResponse> {
            if !self.delay.is_zero() {
                tokio::time::sleep(self.delay).await;
            }
            if self.panic_on.is_some() && request.payload["n"].as_u64() == self.panic_on {
                panic!("transport blew up");
            }
            self.seen.lock().unwrap().push(request.payload.clone());
            Ok(HttpResponse {
                status: 200,
                body: request.payload.clone(),
            })
        }
    }

    fn context(transport: Arc<EchoTransport>, limiter: RateLimiter) -> WorkerContext {
        WorkerContext::new(
            Arc::new(ResponseCache::memory_only(&CacheConfig::new())),
            Arc::new(limiter),
            transport,
            Arc::new(UsageLog::new()),
        )
    }

    fn request(n: u32, tx: tokio::sync::mpsc::UnboundedSender<(u32, Result<Value>)>) -> QueuedRequest {
        QueuedRequest::new(
            "openai",
            "generate",
            "http://unused",
            json!({ "n": n }),
            format!("key-{n}"),
            Box::new(move |result| {
                let _ = tx.send((n, result));
            }),
        )
    }

    #[tokio::test]
    async fn dispatches_in_fifo_order() {
        let transport = Arc::new(EchoTransport::default());
        let queue = RequestQueue::new(context(transport.clone(), RateLimiter::new())).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for n in 0..5 {
            queue.enqueue(request(n, tx.clone()));
        }
        let mut order = Vec::new();
        for _ in 0..5 {
            let (n, result) = rx.recv().await.unwrap();
            assert_eq!(result.unwrap(), json!({ "n": n }));
            order.push(n);
        }
        assert_eq!(order, vec![0, 1, 2, 3, 4]);

        let seen = transport.seen.lock().unwrap().clone();
        let sent: Vec<u64> = seen.iter().map(|v| v["n"].as_u64().unwrap()).collect();
        assert_eq!(sent, vec![0, 1, 2, 3, 4]);
    }

    #[tokio::test]
    async fn worker_restarts_after_draining() {
        let transport = Arc::new(EchoTransport::default());
        let queue = RequestQueue::new(context(transport, RateLimiter::new())).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        queue.enqueue(request(1, tx.clone()));
        rx.recv().await.unwrap();
        // let the worker observe the empty queue and exit
        while queue.is_running() {
            tokio::task::yield_now().await;
        }

        queue.enqueue(request(2, tx));
        let (n, result) = rx.recv().await.unwrap();
        assert_eq!(n, 2);
        assert!(result.is_ok());
    }

    #[tokio::test]
    async fn stop_fails_queued_requests() {
        let transport = Arc::new(EchoTransport {
            delay: Duration::from_millis(50),
            ..Default::default()
        });
        let queue = RequestQueue::new(context(transport, RateLimiter::new())).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        for n in 0..3 {
            queue.enqueue(request(n, tx.clone()));
        }
        // let the worker pick up the first request
        tokio::time::sleep(Duration::from_millis(10)).await;
        queue.stop(Duration::from_secs(5)).await.unwrap();

        let mut results = Vec::new();
        for _ in 0..3 {
            results.push(rx.recv().await.unwrap());
        }
        results.sort_by_key(|(n, _)| *n);
        assert!(results[0].1.is_ok());
        assert!(matches!(results[1].1, Err(GatewayError::Shutdown)));
        assert!(matches!(results[2].1, Err(GatewayError::Shutdown)));

        // enqueue after stop still reports through the callback
        queue.enqueue(request(9, tx));
        let (n, result) = rx.recv().await.unwrap();
        assert_eq!(n, 9);
        assert!(matches!(result, Err(GatewayError::Shutdown)));
        assert!(queue.is_stopped());
    }

    #[tokio::test(start_paused = true)]
    async fn short_rate_limit_wait_is_absorbed() {
        let limiter = RateLimiter::new();
        limiter.configure("openai", 1, Duration::from_secs(2));
        let transport = Arc::new(EchoTransport::default());
        let queue = RequestQueue::new(context(transport, limiter)).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        let start = tokio::time::Instant::now();
        queue.enqueue(request(1, tx.clone()));
        queue.enqueue(request(2, tx));
        assert!(rx.recv().await.unwrap().1.is_ok());
        assert!(rx.recv().await.unwrap().1.is_ok());
        assert!(start.elapsed() >= Duration::from_secs(2));
    }

    #[tokio::test(start_paused = true)]
    async fn long_rate_limit_wait_fails_request() {
        let limiter = RateLimiter::new();
        limiter.configure("openai", 1, Duration::from_secs(600));
        let transport = Arc::new(EchoTransport::default());
        let ctx = context(transport, limiter).max_rate_limit_wait(Duration::from_secs(1));
        let queue = RequestQueue::new(ctx).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        queue.enqueue(request(1, tx.clone()));
        queue.enqueue(request(2, tx));
        assert!(rx.recv().await.unwrap().1.is_ok());
        let (_, second) = rx.recv().await.unwrap();
        assert!(matches!(
            second,
            Err(GatewayError::RateLimitExceeded { ref provider, .. }) if provider == "openai"
        ));
    }

    #[tokio::test]
    async fn cached_response_skips_transport() {
        let transport = Arc::new(EchoTransport::default());
        let ctx = context(transport.clone(), RateLimiter::new());
        ctx.cache.set("key-1", json!("cached")).await;
        let queue = RequestQueue::new(ctx).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        queue.enqueue(request(1, tx));
        assert_eq!(rx.recv().await.unwrap().1.unwrap(), json!("cached"));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn records_usage_per_dispatch() {
        let transport = Arc::new(EchoTransport::default());
        let ctx = context(transport, RateLimiter::new());
        let usage = ctx.usage.clone();
        let queue = RequestQueue::new(ctx).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        queue.enqueue(request(1, tx.clone()).use_cache(false));
        queue.enqueue(request(1, tx).use_cache(false));
        rx.recv().await.unwrap();
        rx.recv().await.unwrap();

        let records = usage.records();
        assert_eq!(records.len(), 2);
        assert!(records.iter().all(|r| r.success && r.status == Some(200)));
    }

    #[tokio::test]
    async fn panic_in_processing_does_not_wedge_queue() {
        let transport = Arc::new(EchoTransport {
            panic_on: Some(1),
            ..Default::default()
        });
        let queue = RequestQueue::new(context(transport, RateLimiter::new())).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        queue.enqueue(request(1, tx.clone()));
        let (n, first) = rx.recv().await.unwrap();
        assert_eq!(n, 1);
        assert!(matches!(first, Err(GatewayError::Shutdown)));

        queue.enqueue(request(2, tx));
        let (n, second) = tokio::time::timeout(Duration::from_secs(5), rx.recv())
            .await
            .unwrap()
            .unwrap();
        assert_eq!(n, 2);
        assert_eq!(second.unwrap(), json!({ "n": 2 }));
        assert_eq!(queue.pending(), 0);
    }

    #[tokio::test]
    async fn rejected_request_fails_on_the_worker() {
        let transport = Arc::new(EchoTransport::default());
        let queue = RequestQueue::new(context(transport.clone(), RateLimiter::new())).unwrap();
        let (tx, rx) = tokio::sync::oneshot::channel();

        queue.enqueue(QueuedRequest::rejected(
            "nope",
            "generate",
            GatewayError::Configuration("unknown provider 'nope'".into()),
            Box::new(move |result| {
                let _ = tx.send(result);
            }),
        ));
        assert!(matches!(rx.await.unwrap(), Err(GatewayError::Configuration(_))));
        assert!(transport.seen.lock().unwrap().is_empty());
    }

    fn requires_text() -> Validator {
        Arc::new(|body: &Value| {
            body.get("text")
                .map(|_| ())
                .ok_or_else(|| GatewayError::Decode("missing text".into()))
        })
    }

    #[tokio::test]
    async fn invalid_response_is_not_cached() {
        let transport = Arc::new(EchoTransport::default());
        let ctx = context(transport.clone(), RateLimiter::new());
        let cache = ctx.cache.clone();
        let usage = ctx.usage.clone();
        let queue = RequestQueue::new(ctx).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        queue.enqueue(request(1, tx).validator(requires_text()));
        assert!(matches!(rx.recv().await.unwrap().1, Err(GatewayError::Decode(_))));
        assert!(cache.get("key-1").await.is_none());

        let records = usage.records();
        assert_eq!(records.len(), 1);
        assert!(!records[0].success);
        assert_eq!(records[0].status, Some(200));
    }

    #[tokio::test]
    async fn unusable_cache_entry_is_replaced() {
        let transport = Arc::new(EchoTransport::default());
        let ctx = context(transport.clone(), RateLimiter::new());
        ctx.cache.set("key-1", json!({ "stale": true })).await;
        let cache = ctx.cache.clone();
        let queue = RequestQueue::new(ctx).unwrap();
        let (tx, mut rx) = tokio::sync::mpsc::unbounded_channel();

        // the echo body lacks "text" too, so the request fails, but the
        // transport was reached and the bad entry is gone
        queue.enqueue(request(1, tx).validator(requires_text()));
        assert!(rx.recv().await.unwrap().1.is_err());
        assert_eq!(transport.seen.lock().unwrap().len(), 1);
        assert!(cache.get("key-1").await.is_none());
    }
}
