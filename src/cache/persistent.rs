//! SQLite-backed persistent cache tier.
//!
//! One table, `response_cache(key TEXT PRIMARY KEY, data BLOB, timestamp REAL,
//! compressed INTEGER)`. `data` holds JSON bytes, LZ4-compressed when
//! `compressed = 1`. `timestamp` is the write time in unix seconds.
//!
//! Writers are serialized through an async mutex. Readers go straight to the
//! pool; SQLite's transactional replace (WAL mode for file databases) means a
//! reader sees either the old row or the new one, never a partial write.

use std::path::Path;
use std::str::FromStr;
use std::time::Duration;

use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions};
use tokio::sync::Mutex;
use tracing::{debug, info};

use crate::{GatewayError, Result};

/// A stored cache row.
#[derive(Debug, Clone, PartialEq)]
pub struct PersistentRecord {
    pub key: String,
    pub data: Vec<u8>,
    pub compressed: bool,
    /// Write time, unix seconds.
    pub timestamp: f64,
}

impl PersistentRecord {
    /// Age relative to `now` (unix seconds). Clock skew clamps to zero.
    pub fn age(&self, now: f64) -> Duration {
        Duration::from_secs_f64((now - self.timestamp).max(0.0))
    }
}

/// Aggregate numbers over the persistent table.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct StoreStats {
    pub entries: u64,
    pub total_bytes: u64,
    pub compressed: u64,
}

/// Persistent key → blob store.
pub struct PersistentStore {
    pool: SqlitePool,
    write_lock: Mutex<()>,
}

impl PersistentStore {
    /// Open (or create) the cache database at `path`.
    pub async fn open(path: &Path) -> Result<Self> {
        if let Some(parent) = path.parent()
            && !parent.as_os_str().is_empty()
        {
            std::fs::create_dir_all(parent).map_err(|e| {
                GatewayError::Cache(format!("failed to create cache directory: {e}"))
            })?;
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .busy_timeout(Duration::from_secs(5));

        let pool = SqlitePoolOptions::new()
            .max_connections(4)
            .connect_with(options)
            .await?;

        info!(path = %path.display(), "opened persistent response cache");
        Self::init(pool).await
    }

    /// Open a private in-memory database. Contents vanish on drop.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::from_str("sqlite::memory:")?;
        // a second connection would see a different (empty) database
        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .idle_timeout(None)
            .max_lifetime(None)
            .connect_with(options)
            .await?;
        Self::init(pool).await
    }

    async fn init(pool: SqlitePool) -> Result<Self> {
        sqlx::query(
            r#"
            CREATE TABLE IF NOT EXISTS response_cache (
                key TEXT PRIMARY KEY,
                data BLOB NOT NULL,
                timestamp REAL NOT NULL,
                compressed INTEGER NOT NULL DEFAULT 0
            )
            "#,
        )
        .execute(&pool)
        .await?;
        sqlx::query("CREATE INDEX IF NOT EXISTS idx_response_cache_timestamp ON response_cache(timestamp)")
            .execute(&pool)
            .await?;

        Ok(Self {
            pool,
            write_lock: Mutex::new(()),
        })
    }

    pub async fn get(&self, key: &str) -> Result<Option<PersistentRecord>> {
        let row: Option<(Vec<u8>, f64, i64)> = sqlx::query_as(
            "SELECT data, timestamp, compressed FROM response_cache WHERE key = ?",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        Ok(row.map(|(data, timestamp, compressed)| PersistentRecord {
            key: key.to_string(),
            data,
            compressed: compressed != 0,
            timestamp,
        }))
    }

    /// Insert or atomically replace a record.
    pub async fn put(&self, record: &PersistentRecord) -> Result<()> {
        let _guard = self.write_lock.lock().await;
        sqlx::query(
            "INSERT OR REPLACE INTO response_cache (key, data, timestamp, compressed) VALUES (?, ?, ?, ?)",
        )
        .bind(&record.key)
        .bind(&record.data)
        .bind(record.timestamp)
        .bind(i64::from(record.compressed))
        .execute(&self.pool)
        .await?;
        debug!(key = %record.key, bytes = record.data.len(), compressed = record.compressed, "persisted cache entry");
        Ok(())
    }

    /// Returns whether a row was removed.
    pub async fn delete(&self, key: &str) -> Result<bool> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM response_cache WHERE key = ?")
            .bind(key)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected() > 0)
    }

    /// Delete every row written before `cutoff` (unix seconds).
    pub async fn delete_older_than(&self, cutoff: f64) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM response_cache WHERE timestamp < ?")
            .bind(cutoff)
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn clear(&self) -> Result<u64> {
        let _guard = self.write_lock.lock().await;
        let result = sqlx::query("DELETE FROM response_cache")
            .execute(&self.pool)
            .await?;
        Ok(result.rows_affected())
    }

    pub async fn stats(&self) -> Result<StoreStats> {
        let (entries, total_bytes, compressed): (i64, i64, i64) = sqlx::query_as(
            "SELECT COUNT(*), COALESCE(SUM(LENGTH(data)), 0), COALESCE(SUM(compressed), 0) FROM response_cache",
        )
        .fetch_one(&self.pool)
        .await?;

        Ok(StoreStats {
            entries: entries.max(0) as u64,
            total_bytes: total_bytes.max(0) as u64,
            compressed: compressed.max(0) as u64,
        })
    }

    /// Close the pool, waiting for checked-out connections.
    pub async fn close(&self) {
        self.pool.close().await;
    }
}

/// Current time in unix seconds with sub-second precision.
pub(crate) fn unix_now() -> f64 {
    chrono::Utc::now().timestamp_micros() as f64 / 1_000_000.0
}
