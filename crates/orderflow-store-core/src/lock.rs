//! Advisory lease-lock trait (§4.4, §4.10, §3 "lock lease table").

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use std::time::Duration;

use crate::StoreError;

/// Storage contract for the advisory distributed lease lock.
///
/// **This lock is never the correctness mechanism.** It exists only to
/// reduce contention and avoid duplicate scheduled work; the fencing
/// counter ([`crate::FencingCounterStore`]) is authoritative for ordering
/// guarded writes. A caller holding a lease MUST NOT treat that as proof no
/// other writer can act concurrently (§9 "lease-based locks are not mutual
/// exclusion").
#[async_trait]
pub trait LockLeaseStore: Send + Sync {
    /// Attempt to acquire or renew `lock_name` for `holder`.
    ///
    /// Succeeds if no unexpired lease exists, or if `holder` already holds
    /// the current lease (renewal). `lease_duration` is the new
    /// expires-at horizon from `now`.
    async fn try_acquire(
        &self,
        lock_name: &str,
        holder: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError>;

    /// Release `lock_name`, but only if `holder` is the current lease
    /// holder — releasing a lease you do not hold is a no-op, not an error,
    /// since it usually indicates the lease already expired and was taken
    /// over by another process.
    async fn release(&self, lock_name: &str, holder: &str) -> Result<(), StoreError>;
}
