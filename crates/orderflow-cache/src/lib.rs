#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **orderflow-cache** – L1 embedded cache and read-path fallback chain for
//! the orderflow control plane (§4.9).
//!
//! Hot reads are wrapped as: **L1** cache get → **L2** caller-supplied
//! loader (typically a storage query behind a circuit breaker) → **L3** a
//! stale re-read of L1, ignoring expiry, taken only when L2 fails → **L4** a
//! typed [`orderflow_types::DomainError::ServiceUnavailable`] when even the
//! stale entry is missing. [`read_through`] implements exactly this chain;
//! populating the cache is a side effect of L2 success, never of L1 or L3.

use std::path::Path;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sled::{Db, Tree};

use orderflow_types::DomainError;

mod warmer;
pub use warmer::{CacheWarmer, WarmEntry};

/// Errors raised by the L1 cache itself (not by the L2 loader, whose errors
/// are opaque to this crate and only drive the L1-vs-stale decision).
#[derive(Debug, thiserror::Error)]
pub enum CacheError {
    /// The embedded `sled` database returned an error.
    #[error("cache backend error: {0}")]
    Backend(#[from] sled::Error),
    /// A value failed to convert to or from `serde_json::Value`.
    #[error("cache value (de)serialization error: {0}")]
    Json(#[from] serde_json::Error),
    /// The on-disk `StoredEntry` envelope failed to encode.
    #[error("cache entry encoding error: {0}")]
    Encoding(#[from] rmp_serde::encode::Error),
    /// The on-disk `StoredEntry` envelope failed to decode.
    #[error("cache entry decoding error: {0}")]
    Decoding(#[from] rmp_serde::decode::Error),
}

#[derive(Serialize, Deserialize)]
struct StoredEntry {
    value: serde_json::Value,
    expires_at_ms: i64,
}

/// The L1 cache: an embedded `sled` tree storing JSON-encoded values behind
/// a per-entry absolute expiry.
///
/// Grounded on the teacher's `SledBackend`: same open/open_with_config/
/// from_db/temporary construction shape, repurposed from a primary event
/// store into a cache — `sled`'s "fast embedded KV, durable, single
/// process" role fits an L1 cache as well as it fit a WAL.
pub struct SledCache {
    _db: Db,
    tree: Tree,
}

impl SledCache {
    /// Opens or creates a cache database at `path`.
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self, CacheError> {
        Self::open_with_config(path, sled::Config::default())
    }

    /// Opens a cache database with custom `sled` configuration.
    pub fn open_with_config<P: AsRef<Path>>(path: P, config: sled::Config) -> Result<Self, CacheError> {
        let db = config.path(path).open()?;
        Self::from_db(db)
    }

    /// Wraps an already-open `sled::Db`.
    pub fn from_db(db: Db) -> Result<Self, CacheError> {
        let tree = db.open_tree("l1_cache")?;
        Ok(Self { _db: db, tree })
    }

    /// A temporary, process-local cache for tests and local development.
    pub fn temporary() -> Result<Self, CacheError> {
        let db = sled::Config::new().temporary(true).open()?;
        Self::from_db(db)
    }

    /// Writes `value` under `key`, expiring `ttl` after `now`.
    pub fn put<T: Serialize>(&self, key: &str, value: &T, ttl: Duration, now: DateTime<Utc>) -> Result<(), CacheError> {
        let value = serde_json::to_value(value)?;
        let expires_at_ms = (now + chrono::Duration::from_std(ttl).unwrap_or_default()).timestamp_millis();
        let entry = StoredEntry { value, expires_at_ms };
        let bytes = rmp_serde::to_vec_named(&entry)?;
        self.tree.insert(key.as_bytes(), bytes)?;
        Ok(())
    }

    /// Reads `key`, returning `None` if absent or expired as of `now` (L1).
    pub fn get_fresh<T: DeserializeOwned>(&self, key: &str, now: DateTime<Utc>) -> Result<Option<T>, CacheError> {
        match self.load_entry(key)? {
            Some(entry) if entry.expires_at_ms > now.timestamp_millis() => {
                Ok(Some(serde_json::from_value(entry.value)?))
            }
            _ => Ok(None),
        }
    }

    /// Reads `key` ignoring expiry (L3 fallback), returning `None` only if
    /// the key has never been populated or was explicitly removed.
    pub fn get_stale<T: DeserializeOwned>(&self, key: &str) -> Result<Option<T>, CacheError> {
        match self.load_entry(key)? {
            Some(entry) => Ok(Some(serde_json::from_value(entry.value)?)),
            None => Ok(None),
        }
    }

    fn load_entry(&self, key: &str) -> Result<Option<StoredEntry>, CacheError> {
        match self.tree.get(key.as_bytes())? {
            Some(bytes) => Ok(Some(rmp_serde::from_slice(&bytes)?)),
            None => Ok(None),
        }
    }

    /// Removes `key`, if present.
    pub fn remove(&self, key: &str) -> Result<(), CacheError> {
        self.tree.remove(key.as_bytes())?;
        Ok(())
    }

    /// Number of entries currently held, expired or not.
    pub fn len(&self) -> usize {
        self.tree.len()
    }

    /// Whether the cache holds no entries.
    pub fn is_empty(&self) -> bool {
        self.tree.is_empty()
    }

    /// Flushes pending writes to disk.
    pub async fn flush(&self) -> Result<(), CacheError> {
        self.tree.flush_async().await?;
        Ok(())
    }
}

/// Runs the four-level read-path chain of §4.9 for a single key.
///
/// `loader` stands in for L2 (a storage query, typically already wrapped
/// in a circuit breaker by the caller via `orderflow-resilience`): on
/// success its value both answers the read and is written back to L1. On
/// failure, L3 retries the same key in the cache ignoring expiry; only if
/// that too comes up empty does this return L4, a typed
/// [`DomainError::ServiceUnavailable`].
pub async fn read_through<T, F, Fut>(
    cache: &SledCache,
    key: &str,
    ttl: Duration,
    now: DateTime<Utc>,
    loader: F,
) -> Result<T, DomainError>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Fut,
    Fut: std::future::Future<Output = anyhow::Result<T>>,
{
    if let Some(hit) = cache.get_fresh::<T>(key, now).unwrap_or(None) {
        return Ok(hit);
    }

    match loader().await {
        Ok(value) => {
            if let Err(e) = cache.put(key, &value, ttl, now) {
                tracing::warn!(error = %e, key, "failed to populate L1 cache after L2 success");
            }
            Ok(value)
        }
        Err(l2_err) => match cache.get_stale::<T>(key).unwrap_or(None) {
            Some(stale) => {
                tracing::warn!(key, error = %l2_err, "read-path fallback served a stale L1 entry");
                Ok(stale)
            }
            None => Err(DomainError::ServiceUnavailable(format!(
                "read-path exhausted for key {key}: {l2_err}"
            ))),
        },
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[test]
    fn put_then_get_fresh_round_trips() {
        let cache = SledCache::temporary().unwrap();
        let now = Utc::now();
        cache.put("order:1", &42u32, Duration::from_secs(60), now).unwrap();
        let got: Option<u32> = cache.get_fresh("order:1", now).unwrap();
        assert_eq!(got, Some(42));
    }

    #[test]
    fn expired_entry_is_invisible_to_fresh_get_but_visible_to_stale_get() {
        let cache = SledCache::temporary().unwrap();
        let now = Utc::now();
        cache.put("order:1", &42u32, Duration::from_secs(1), now).unwrap();

        let later = now + chrono::Duration::seconds(5);
        let fresh: Option<u32> = cache.get_fresh("order:1", later).unwrap();
        assert_eq!(fresh, None);

        let stale: Option<u32> = cache.get_stale("order:1").unwrap();
        assert_eq!(stale, Some(42));
    }

    #[tokio::test]
    async fn read_through_populates_cache_on_l2_success() {
        let cache = SledCache::temporary().unwrap();
        let now = Utc::now();
        let calls = AtomicUsize::new(0);

        let value: u32 = read_through(&cache, "k", Duration::from_secs(60), now, || async {
            calls.fetch_add(1, Ordering::SeqCst);
            Ok(7u32)
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
        assert_eq!(calls.load(Ordering::SeqCst), 1);

        let cached: Option<u32> = cache.get_fresh("k", now).unwrap();
        assert_eq!(cached, Some(7));
    }

    #[tokio::test]
    async fn read_through_falls_back_to_stale_entry_when_l2_fails() {
        let cache = SledCache::temporary().unwrap();
        let now = Utc::now();
        cache.put("k", &7u32, Duration::from_secs(1), now).unwrap();
        let later = now + chrono::Duration::seconds(5);

        let value: u32 = read_through(&cache, "k", Duration::from_secs(60), later, || async {
            Err(anyhow::anyhow!("storage unreachable"))
        })
        .await
        .unwrap();
        assert_eq!(value, 7);
    }

    #[tokio::test]
    async fn read_through_returns_typed_failure_when_l2_and_stale_both_miss() {
        let cache = SledCache::temporary().unwrap();
        let now = Utc::now();

        let err = read_through::<u32, _, _>(&cache, "missing", Duration::from_secs(60), now, || async {
            Err(anyhow::anyhow!("storage unreachable"))
        })
        .await
        .unwrap_err();
        assert!(matches!(err, DomainError::ServiceUnavailable(_)));
    }
}
