//! Telemetry metric name constants.
//!
//! Centralised metric names for gateway operations. Consumers install
//! their own `metrics` recorder (e.g. prometheus, statsd); without a
//! recorder installed, all metric calls are no-ops.
//!
//! # Metric naming conventions
//!
//! All metrics are prefixed with `muse_`. Counters end in `_total`,
//! histograms use meaningful units (e.g. `_seconds`).
//!
//! # Common labels
//!
//! - `provider`: provider name (e.g. "openai", "anthropic")
//! - `endpoint`: endpoint name or path the request targeted
//! - `status`: outcome: "ok" or "error"
//! - `tier`: cache tier that answered: "memory" or "persistent"

/// Total requests dispatched by the worker.
///
/// Labels: `provider`, `endpoint`, `status` ("ok" | "error").
pub const REQUESTS_TOTAL: &str = "muse_requests_total";

/// Network call duration in seconds, retries included.
///
/// Labels: `provider`, `endpoint`.
pub const REQUEST_DURATION_SECONDS: &str = "muse_request_duration_seconds";

/// Total retry attempts (not counting the initial request).
///
/// Labels: `provider`.
pub const RETRIES_TOTAL: &str = "muse_retries_total";

/// Total cache hits.
///
/// Labels: `tier`.
pub const CACHE_HITS_TOTAL: &str = "muse_cache_hits_total";

/// Total cache misses (both tiers missed).
pub const CACHE_MISSES_TOTAL: &str = "muse_cache_misses_total";

/// Total admission denials from the rate limiter.
///
/// Labels: `provider`.
pub const RATE_LIMITED_TOTAL: &str = "muse_rate_limited_total";

/// Number of requests waiting in the queue.
pub const QUEUE_DEPTH: &str = "muse_queue_depth";
