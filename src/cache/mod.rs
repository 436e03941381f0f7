//! Two-tier response cache.
//!
//! [`ResponseCache`] answers repeat provider calls without touching the
//! network:
//!
//! - **memory tier**: moka's bounded LRU + TTL map, safe for concurrent
//!   `get`/`set` from the worker and from callers on the cache-hit fast path.
//! - **persistent tier**: optional [`PersistentStore`] (SQLite) that survives
//!   restarts. Values are stored as JSON, LZ4-compressed when that pays off.
//!
//! Writes go through to both tiers. Reads check memory first; a persistent hit
//! is promoted into memory before it is returned.
//!
//! # Failure handling
//!
//! Caching is an optimization. Every tier error is logged and absorbed:
//! a failed read is a miss, a failed write leaves the value uncached.
//!
//! # Staleness
//!
//! Persistent records expire lazily. With [`CacheConfig::max_age`] set, a
//! read of an older record deletes it and reports a miss. Without it, records
//! are served until [`ResponseCache::clear_expired`] sweeps them, so on-disk
//! growth is bounded only by periodic sweeping.

pub mod compression;
pub mod key;
pub mod persistent;

pub use key::fingerprint;
pub use persistent::{PersistentRecord, PersistentStore, StoreStats};

use std::path::PathBuf;
use std::time::Duration;

use moka::future::Cache;
use serde_json::Value;
use tracing::{debug, warn};

use crate::Result;
use crate::telemetry;

/// Configuration for the response cache.
///
/// ```rust
/// # use muse::CacheConfig;
/// # use std::time::Duration;
/// let config = CacheConfig::new()
///     .max_entries(10_000)
///     .ttl(Duration::from_secs(3600))
///     .persistent("/tmp/muse-cache.db")
///     .max_age(Duration::from_secs(7 * 24 * 3600));
/// ```
#[derive(Debug, Clone)]
pub struct CacheConfig {
    /// Maximum number of entries in the memory tier. Default: 1,000.
    pub max_entries: u64,
    /// Time-to-live for memory entries. Default: 1 hour.
    pub ttl: Duration,
    /// SQLite file for the persistent tier. Default: none.
    pub persistent_path: Option<PathBuf>,
    /// Compress persistent payloads. Default: true.
    pub compression: bool,
    /// Payloads below this many bytes are never compressed. Default: 1 KiB.
    pub compression_threshold: usize,
    /// Persistent records older than this are misses. Default: none.
    pub max_age: Option<Duration>,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            max_entries: 1_000,
            ttl: Duration::from_secs(3600),
            persistent_path: None,
            compression: true,
            compression_threshold: 1024,
            max_age: None,
        }
    }
}

impl CacheConfig {
    /// Create a new config with sensible defaults.
    pub fn new() -> Self {
        Self::default()
    }

    /// Set the maximum number of memory entries.
    pub fn max_entries(mut self, n: u64) -> Self {
        self.max_entries = n;
        self
    }

    /// Set the memory time-to-live.
    pub fn ttl(mut self, ttl: Duration) -> Self {
        self.ttl = ttl;
        self
    }

    /// Enable the persistent tier at `path`.
    pub fn persistent(mut self, path: impl Into<PathBuf>) -> Self {
        self.persistent_path = Some(path.into());
        self
    }

    /// Enable or disable persistent payload compression.
    pub fn compression(mut self, enabled: bool) -> Self {
        self.compression = enabled;
        self
    }

    /// Set the smallest payload, in bytes, worth compressing.
    pub fn compression_threshold(mut self, bytes: usize) -> Self {
        self.compression_threshold = bytes;
        self
    }

    /// Treat persistent records older than `age` as expired on read.
    pub fn max_age(mut self, age: Duration) -> Self {
        self.max_age = Some(age);
        self
    }
}

/// Read-only cache introspection.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct CacheStats {
    /// Durable entries: persistent rows, or memory entries without a persistent tier.
    pub entry_count: u64,
    /// Bytes held by the persistent tier.
    pub total_bytes: u64,
    /// Persistent rows stored compressed.
    pub compressed_count: u64,
    /// Memory tier entries (approximate; moka counts lazily).
    pub memory_entries: u64,
}

/// Two-tier response cache. See module docs.
pub struct ResponseCache {
    memory: Cache<String, Value>,
    persistent: Option<PersistentStore>,
    compression: bool,
    compression_threshold: usize,
    max_age: Option<Duration>,
}

impl ResponseCache {
    /// Build a cache, opening the persistent tier if one is configured.
    pub async fn new(config: &CacheConfig) -> Result<Self> {
        let persistent = match &config.persistent_path {
            Some(path) => Some(PersistentStore::open(path).await?),
            None => None,
        };
        Ok(Self::with_store(config, persistent))
    }

    /// Memory tier only.
    pub fn memory_only(config: &CacheConfig) -> Self {
        Self::with_store(config, None)
    }

    /// Build a cache around an already-open persistent store.
    pub fn with_store(config: &CacheConfig, persistent: Option<PersistentStore>) -> Self {
        let memory = Cache::builder()
            .max_capacity(config.max_entries)
            .time_to_live(config.ttl)
            .build();
        Self {
            memory,
            persistent,
            compression: config.compression,
            compression_threshold: config.compression_threshold,
            max_age: config.max_age,
        }
    }

    /// Whether a SQLite tier backs the memory tier.
    pub fn has_persistent_tier(&self) -> bool {
        self.persistent.is_some()
    }

    /// Look up a value, memory first, then the persistent tier.
    ///
    /// Persistent hits are promoted into memory. Tier errors count as misses.
    pub async fn get(&self, key: &str) -> Option<Value> {
        if let Some(value) = self.memory.get(key).await {
            metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => "memory").increment(1);
            return Some(value);
        }

        match self.get_persistent(key).await {
            Ok(Some(value)) => {
                metrics::counter!(telemetry::CACHE_HITS_TOTAL, "tier" => "persistent")
                    .increment(1);
                self.memory.insert(key.to_string(), value.clone()).await;
                debug!(key, "promoted persistent cache entry");
                Some(value)
            }
            Ok(None) => {
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
            Err(e) => {
                warn!(key, error = %e, "persistent cache read failed, treating as miss");
                metrics::counter!(telemetry::CACHE_MISSES_TOTAL).increment(1);
                None
            }
        }
    }

    async fn get_persistent(&self, key: &str) -> Result<Option<Value>> {
        let Some(store) = &self.persistent else {
            return Ok(None);
        };
        let Some(record) = store.get(key).await? else {
            return Ok(None);
        };

        if let Some(max_age) = self.max_age
            && record.age(persistent::unix_now()) > max_age
        {
            debug!(key, "persistent cache entry expired");
            store.delete(key).await?;
            return Ok(None);
        }

        match compression::decode(&record.data, record.compressed) {
            Ok(value) => Ok(Some(value)),
            Err(e) => {
                // unreadable rows would fail forever; drop them
                store.delete(key).await?;
                Err(e)
            }
        }
    }

    /// Write a value through to both tiers.
    pub async fn set(&self, key: &str, value: Value) {
        if let Some(store) = &self.persistent
            && let Err(e) = self.put_persistent(store, key, &value).await
        {
            warn!(key, error = %e, "persistent cache write failed");
        }
        self.memory.insert(key.to_string(), value).await;
    }

    async fn put_persistent(&self, store: &PersistentStore, key: &str, value: &Value) -> Result<()> {
        let (data, compressed) =
            compression::encode(value, self.compression, self.compression_threshold)?;
        store
            .put(&PersistentRecord {
                key: key.to_string(),
                data,
                compressed,
                timestamp: persistent::unix_now(),
            })
            .await
    }

    /// Remove a key from both tiers.
    pub async fn delete(&self, key: &str) {
        self.memory.invalidate(key).await;
        if let Some(store) = &self.persistent
            && let Err(e) = store.delete(key).await
        {
            warn!(key, error = %e, "persistent cache delete failed");
        }
    }

    /// Sweep persistent records older than `max_age`. Returns rows removed.
    ///
    /// Memory entries age out on their own TTL and are left alone.
    pub async fn clear_expired(&self, max_age: Duration) -> u64 {
        let Some(store) = &self.persistent else {
            return 0;
        };
        let cutoff = persistent::unix_now() - max_age.as_secs_f64();
        match store.delete_older_than(cutoff).await {
            Ok(removed) => {
                debug!(removed, "swept expired persistent cache entries");
                removed
            }
            Err(e) => {
                warn!(error = %e, "persistent cache sweep failed");
                0
            }
        }
    }

    /// Drop every entry from both tiers.
    pub async fn clear(&self) {
        self.memory.invalidate_all();
        if let Some(store) = &self.persistent
            && let Err(e) = store.clear().await
        {
            warn!(error = %e, "persistent cache clear failed");
        }
    }

    /// Entry counts and sizes across both tiers.
    pub async fn stats(&self) -> CacheStats {
        let memory_entries = self.memory.entry_count();
        let Some(store) = &self.persistent else {
            return CacheStats {
                entry_count: memory_entries,
                memory_entries,
                ..CacheStats::default()
            };
        };
        match store.stats().await {
            Ok(s) => CacheStats {
                entry_count: s.entries,
                total_bytes: s.total_bytes,
                compressed_count: s.compressed,
                memory_entries,
            },
            Err(e) => {
                warn!(error = %e, "persistent cache stats failed");
                CacheStats {
                    memory_entries,
                    ..CacheStats::default()
                }
            }
        }
    }

    /// Close the persistent tier.
    pub async fn close(&self) {
        if let Some(store) = &self.persistent {
            store.close().await;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn cache_config_defaults() {
        let config = CacheConfig::default();
        assert_eq!(config.max_entries, 1_000);
        assert_eq!(config.ttl, Duration::from_secs(3600));
        assert!(config.persistent_path.is_none());
        assert!(config.compression);
        assert!(config.max_age.is_none());
    }

    #[tokio::test]
    async fn memory_only_miss_then_hit() {
        let cache = ResponseCache::memory_only(&CacheConfig::default());
        assert!(cache.get("k").await.is_none());
        cache.set("k", json!({"a": [1, 2, 3]})).await;
        assert_eq!(cache.get("k").await, Some(json!({"a": [1, 2, 3]})));
    }

    #[tokio::test]
    async fn delete_removes_from_memory() {
        let cache = ResponseCache::memory_only(&CacheConfig::default());
        cache.set("k", json!(1)).await;
        cache.delete("k").await;
        assert!(cache.get("k").await.is_none());
    }

    #[tokio::test]
    async fn persistent_hit_is_promoted() {
        let store = PersistentStore::open_in_memory().await.unwrap();
        let cache = ResponseCache::with_store(&CacheConfig::default(), Some(store));
        cache.set("k", json!("v")).await;

        // evict from memory only, leaving the persistent row
        cache.memory.invalidate("k").await;
        assert!(cache.memory.get("k").await.is_none());

        assert_eq!(cache.get("k").await, Some(json!("v")));
        assert_eq!(cache.memory.get("k").await, Some(json!("v")));
    }

    #[tokio::test]
    async fn expired_persistent_row_is_a_miss() {
        let store = PersistentStore::open_in_memory().await.unwrap();
        store
            .put(&PersistentRecord {
                key: "old".into(),
                data: b"\"stale\"".to_vec(),
                compressed: false,
                timestamp: persistent::unix_now() - 120.0,
            })
            .await
            .unwrap();
        let config = CacheConfig::new().max_age(Duration::from_secs(60));
        let cache = ResponseCache::with_store(&config, Some(store));

        assert!(cache.get("old").await.is_none());
        assert_eq!(cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn stale_row_served_without_max_age() {
        let store = PersistentStore::open_in_memory().await.unwrap();
        store
            .put(&PersistentRecord {
                key: "old".into(),
                data: b"\"stale\"".to_vec(),
                compressed: false,
                timestamp: persistent::unix_now() - 120.0,
            })
            .await
            .unwrap();
        let cache = ResponseCache::with_store(&CacheConfig::default(), Some(store));

        assert_eq!(cache.get("old").await, Some(json!("stale")));
        assert_eq!(cache.clear_expired(Duration::from_secs(60)).await, 1);
    }

    #[tokio::test]
    async fn corrupt_row_is_dropped() {
        let store = PersistentStore::open_in_memory().await.unwrap();
        store
            .put(&PersistentRecord {
                key: "bad".into(),
                data: b"not json".to_vec(),
                compressed: false,
                timestamp: persistent::unix_now(),
            })
            .await
            .unwrap();
        let cache = ResponseCache::with_store(&CacheConfig::default(), Some(store));

        assert!(cache.get("bad").await.is_none());
        assert_eq!(cache.stats().await.entry_count, 0);
    }

    #[tokio::test]
    async fn clear_expired_without_persistent_tier() {
        let cache = ResponseCache::memory_only(&CacheConfig::default());
        assert_eq!(cache.clear_expired(Duration::ZERO).await, 0);
    }
}
