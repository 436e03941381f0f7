//! Per-provider trailing-window admission control.
//!
//! Each provider owns a [`RateWindow`]: the timestamps of dispatched
//! requests inside the last `window`. A request is admissible while fewer
//! than `max_requests` timestamps remain after pruning. This is plain window
//! counting, not a token bucket, so up to one window's worth of burst can
//! straddle a window boundary.
//!
//! Windows are locked individually; providers never contend with each other.
//! Timestamps come from [`tokio::time::Instant`] so a paused test clock
//! drives expiry.

use std::collections::{HashMap, VecDeque};
use std::sync::{Arc, Mutex, PoisonError, RwLock};
use std::time::Duration;

use tokio::time::Instant;
use tracing::debug;

use crate::config::GatewayConfig;
use crate::telemetry;
use crate::{GatewayError, Result};

/// Mutable trailing-window state for one provider.
#[derive(Debug)]
struct RateWindow {
    max_requests: u32,
    window: Duration,
    stamps: VecDeque<Instant>,
}

impl RateWindow {
    fn new(max_requests: u32, window: Duration) -> Self {
        Self {
            max_requests,
            window,
            stamps: VecDeque::with_capacity(max_requests as usize),
        }
    }

    fn prune(&mut self, now: Instant) {
        while let Some(oldest) = self.stamps.front() {
            if now.duration_since(*oldest) >= self.window {
                self.stamps.pop_front();
            } else {
                break;
            }
        }
    }

    fn admissible(&mut self, now: Instant) -> bool {
        self.prune(now);
        self.stamps.len() < self.max_requests as usize
    }

    fn wait_time(&mut self, now: Instant) -> Duration {
        if self.admissible(now) {
            return Duration::ZERO;
        }
        if self.max_requests == 0 {
            // never admits; report a full window rather than a busy-loop zero
            return self.window;
        }
        // the slot frees once enough of the oldest stamps leave the window
        let excess = self.stamps.len() - self.max_requests as usize;
        match self.stamps.get(excess) {
            Some(oldest) => (*oldest + self.window).saturating_duration_since(now),
            None => Duration::ZERO,
        }
    }
}

/// Admission control across all providers.
///
/// Providers without configured limits are always admitted.
#[derive(Debug, Default)]
pub struct RateLimiter {
    windows: RwLock<HashMap<String, Arc<Mutex<RateWindow>>>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self::default()
    }

    /// Limiter with one window per configured provider.
    pub fn from_config(config: &GatewayConfig) -> Self {
        let limiter = Self::new();
        for (name, provider) in &config.providers {
            limiter.configure(name, provider.max_requests, provider.window());
        }
        limiter
    }

    /// Install (or replace) the limits for `provider`. Recorded history is
    /// discarded on replacement.
    pub fn configure(&self, provider: &str, max_requests: u32, window: Duration) {
        let mut windows = self
            .windows
            .write()
            .unwrap_or_else(PoisonError::into_inner);
        windows.insert(
            provider.to_string(),
            Arc::new(Mutex::new(RateWindow::new(max_requests, window))),
        );
    }

    fn window(&self, provider: &str) -> Option<Arc<Mutex<RateWindow>>> {
        self.windows
            .read()
            .unwrap_or_else(PoisonError::into_inner)
            .get(provider)
            .cloned()
    }

    fn with_window<T>(&self, provider: &str, f: impl FnOnce(&mut RateWindow) -> T) -> Option<T> {
        let window = self.window(provider)?;
        let mut guard = window.lock().unwrap_or_else(PoisonError::into_inner);
        Some(f(&mut guard))
    }

    /// Whether a request to `provider` may be dispatched now.
    ///
    /// Prunes expired timestamps; records nothing.
    pub fn can_proceed(&self, provider: &str) -> bool {
        let now = Instant::now();
        self.with_window(provider, |w| w.admissible(now))
            .unwrap_or(true)
    }

    /// Record a dispatched request. Call only once the request is really sent.
    pub fn record_attempt(&self, provider: &str) {
        let now = Instant::now();
        self.with_window(provider, |w| {
            w.prune(now);
            w.stamps.push_back(now);
        });
    }

    /// Time until `provider` admits another request; zero if it already does.
    pub fn wait_time(&self, provider: &str) -> Duration {
        let now = Instant::now();
        self.with_window(provider, |w| w.wait_time(now))
            .unwrap_or(Duration::ZERO)
    }

    /// Admission check that fails with [`GatewayError::RateLimitExceeded`].
    pub fn check(&self, provider: &str) -> Result<()> {
        let wait = self.wait_time(provider);
        if wait.is_zero() {
            return Ok(());
        }
        metrics::counter!(telemetry::RATE_LIMITED_TOTAL, "provider" => provider.to_owned())
            .increment(1);
        debug!(provider, wait_ms = wait.as_millis() as u64, "admission denied");
        Err(GatewayError::RateLimitExceeded {
            provider: provider.to_string(),
            wait,
        })
    }
}
