//! Best-effort distributed lock (§4.4) and the scheduled leader lock built
//! on top of it (§4.10).

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orderflow_store_core::{LockLeaseStore, StoreError};
use tracing::{debug, warn};

/// Errors surfaced by [`ScheduledLeaderLock::acquire`]. A failure to
/// *acquire* the lock is not an error — it is a normal "skip this tick"
/// outcome — so this type only covers genuine backend failures.
#[derive(Debug, thiserror::Error)]
pub enum LeaderLockError {
    /// The lock backend itself failed.
    #[error("lock backend error: {0}")]
    Backend(#[from] StoreError),
}

/// A best-effort advisory lease wrapper over [`LockLeaseStore`].
///
/// **Never** rely on this for mutual exclusion of writes — the fencing
/// counter (`orderflow_store_core::FencingCounterStore`) is the
/// correctness mechanism. This only reduces contention between workers
/// that would otherwise race to do the same redundant work.
pub struct DistributedLock<S: LockLeaseStore> {
    store: Arc<S>,
    holder: String,
}

impl<S: LockLeaseStore> DistributedLock<S> {
    /// Builds a lock wrapper identifying itself as `holder` (e.g.
    /// `format!("{process_name}-{}", Uuid::new_v4())`) when acquiring leases.
    pub fn new(store: Arc<S>, holder: impl Into<String>) -> Self {
        Self { store, holder: holder.into() }
    }

    /// Attempts to acquire `key`, polling every 50ms until `wait_budget`
    /// elapses. Returns `None` if the budget runs out without success.
    pub async fn try_lock(
        &self,
        key: &str,
        wait_budget: Duration,
        lease_duration: Duration,
    ) -> Result<Option<LockGuard<'_, S>>, LeaderLockError> {
        let deadline = tokio::time::Instant::now() + wait_budget;
        loop {
            let now = Utc::now();
            if self.store.try_acquire(key, &self.holder, lease_duration, now).await? {
                return Ok(Some(LockGuard { lock: self, key: key.to_string(), released: false }));
            }
            if tokio::time::Instant::now() >= deadline {
                return Ok(None);
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
    }

    async fn release(&self, key: &str) -> Result<(), LeaderLockError> {
        self.store.release(key, &self.holder).await?;
        Ok(())
    }
}

/// A held lease. Call [`LockGuard::release`] to release it deterministically;
/// if dropped without releasing, the lease is left to expire on its own and
/// a warning is logged — this is a leak of contention-avoidance, not of
/// correctness, since fencing still protects the guarded resource.
pub struct LockGuard<'a, S: LockLeaseStore> {
    lock: &'a DistributedLock<S>,
    key: String,
    released: bool,
}

impl<'a, S: LockLeaseStore> LockGuard<'a, S> {
    /// Releases the lease, checking "held by this caller" server-side so a
    /// caller can never release another holder's lease.
    pub async fn release(mut self) -> Result<(), LeaderLockError> {
        self.lock.release(&self.key).await?;
        self.released = true;
        Ok(())
    }
}

impl<'a, S: LockLeaseStore> Drop for LockGuard<'a, S> {
    fn drop(&mut self) {
        if !self.released {
            warn!(key = %self.key, "lock guard dropped without explicit release; lease will expire naturally");
        }
    }
}

/// Wraps a periodic job body in `acquire(name, lockAtMostFor, lockAtLeastFor)`
/// (§4.10). Used by the outbox relay, the admission dequeuer, and cache
/// warmers so only one process in the group runs a given job at a time.
pub struct ScheduledLeaderLock<S: LockLeaseStore> {
    lock: DistributedLock<S>,
}

impl<S: LockLeaseStore> ScheduledLeaderLock<S> {
    /// Builds a leader lock identifying itself as `holder`.
    pub fn new(store: Arc<S>, holder: impl Into<String>) -> Self {
        Self { lock: DistributedLock::new(store, holder) }
    }

    /// Runs `body` under the named lease if it can be acquired immediately
    /// (no wait budget — a missed tick just waits for the next scheduler
    /// firing). `lock_at_most_for` bounds orphaned-lease duration; after
    /// `body` completes, the lease is held for at least `lock_at_least_for`
    /// before release, so a very short job can't cause a re-acquisition
    /// storm. Returns `Ok(true)` if `body` ran, `Ok(false)` if the lease
    /// was already held elsewhere.
    pub async fn acquire<F, Fut>(
        &self,
        name: &str,
        lock_at_most_for: Duration,
        lock_at_least_for: Duration,
        body: F,
    ) -> Result<bool, LeaderLockError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = anyhow::Result<()>>,
    {
        let Some(guard) = self.lock.try_lock(name, Duration::ZERO, lock_at_most_for).await? else {
            debug!(job = name, "leader lock already held elsewhere, skipping tick");
            return Ok(false);
        };

        let started = tokio::time::Instant::now();
        if let Err(e) = body().await {
            warn!(job = name, error = %e, "scheduled job body failed");
        }

        let elapsed = started.elapsed();
        if elapsed < lock_at_least_for {
            tokio::time::sleep(lock_at_least_for - elapsed).await;
        }

        guard.release().await?;
        Ok(true)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_store_memory::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn try_lock_succeeds_once_then_blocks_a_second_holder() {
        let store = Arc::new(MemoryStore::new());
        let a = DistributedLock::new(store.clone(), "holder-a");
        let b = DistributedLock::new(store.clone(), "holder-b");

        let guard_a = a.try_lock("job", Duration::from_millis(10), Duration::from_secs(60)).await.unwrap();
        assert!(guard_a.is_some());

        let guard_b = b.try_lock("job", Duration::from_millis(10), Duration::from_secs(60)).await.unwrap();
        assert!(guard_b.is_none());
    }

    #[tokio::test]
    async fn release_lets_another_holder_acquire() {
        let store = Arc::new(MemoryStore::new());
        let a = DistributedLock::new(store.clone(), "holder-a");
        let b = DistributedLock::new(store.clone(), "holder-b");

        let guard_a = a.try_lock("job", Duration::from_millis(10), Duration::from_secs(60)).await.unwrap().unwrap();
        guard_a.release().await.unwrap();

        let guard_b = b.try_lock("job", Duration::from_millis(10), Duration::from_secs(60)).await.unwrap();
        assert!(guard_b.is_some());
    }

    #[tokio::test]
    async fn leader_lock_skips_tick_when_already_held() {
        let store = Arc::new(MemoryStore::new());
        let holder_b = ScheduledLeaderLock::new(store.clone(), "b");
        let b_calls = Arc::new(AtomicUsize::new(0));

        // Hold the lease via a plain DistributedLock so it's still held
        // when holder_b's ScheduledLeaderLock tries to acquire it.
        let raw = DistributedLock::new(store.clone(), "a");
        let _held = raw.try_lock("relay", Duration::ZERO, Duration::from_secs(60)).await.unwrap().unwrap();

        let ran = holder_b
            .acquire("relay", Duration::from_secs(60), Duration::ZERO, {
                let b_calls = b_calls.clone();
                move || {
                    b_calls.fetch_add(1, Ordering::SeqCst);
                    async { Ok(()) }
                }
            })
            .await
            .unwrap();
        assert!(!ran);
        assert_eq!(b_calls.load(Ordering::SeqCst), 0);
    }
}
