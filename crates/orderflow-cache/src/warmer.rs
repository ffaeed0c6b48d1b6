//! Startup warmer for the L1 cache (§4.9 "A startup warmer pre-populates
//! the cache for the active working set").

use chrono::{DateTime, Utc};
use serde::Serialize;

use crate::{CacheError, SledCache};

/// A single entry a [`CacheWarmer`] wants pre-populated, with the
/// per-entry TTL that reflects its hotness (e.g. identity records get a
/// longer TTL than an aggregate-with-details view).
pub struct WarmEntry<T> {
    /// Cache key.
    pub key: String,
    /// Value to populate.
    pub value: T,
    /// Time-to-live from the moment of warming.
    pub ttl: std::time::Duration,
}

/// Implemented by each component that knows its own "active working set"
/// at startup (e.g. the order service warms recently-active orders).
#[async_trait::async_trait]
pub trait CacheWarmer<T: Serialize + Send + Sync> {
    /// Loads the working set to pre-populate, without touching the cache.
    async fn load_working_set(&self) -> anyhow::Result<Vec<WarmEntry<T>>>;

    /// Loads the working set and writes every entry into `cache`, returning
    /// the number of entries written.
    async fn warm(&self, cache: &SledCache, now: DateTime<Utc>) -> anyhow::Result<usize> {
        let entries = self.load_working_set().await?;
        let count = entries.len();
        for entry in entries {
            cache
                .put(&entry.key, &entry.value, entry.ttl, now)
                .map_err(|e: CacheError| anyhow::anyhow!(e))?;
        }
        Ok(count)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    struct FixedWarmer;

    #[async_trait::async_trait]
    impl CacheWarmer<u32> for FixedWarmer {
        async fn load_working_set(&self) -> anyhow::Result<Vec<WarmEntry<u32>>> {
            Ok(vec![
                WarmEntry { key: "a".into(), value: 1, ttl: std::time::Duration::from_secs(300) },
                WarmEntry { key: "b".into(), value: 2, ttl: std::time::Duration::from_secs(60) },
            ])
        }
    }

    #[tokio::test]
    async fn warm_populates_every_entry() {
        let cache = SledCache::temporary().unwrap();
        let now = Utc::now();
        let warmer = FixedWarmer;

        let count = warmer.warm(&cache, now).await.unwrap();
        assert_eq!(count, 2);

        let a: Option<u32> = cache.get_fresh("a", now).unwrap();
        let b: Option<u32> = cache.get_fresh("b", now).unwrap();
        assert_eq!(a, Some(1));
        assert_eq!(b, Some(2));
    }
}
