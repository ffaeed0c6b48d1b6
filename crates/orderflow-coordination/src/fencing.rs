//! Fencing conditional-writer glue (§4.3): obtains a fresh fencing token
//! before a guarded write and translates a rejected write into the right
//! error without making callers hand-roll the token dance each time.

use chrono::{DateTime, Utc};
use orderflow_store_core::{FencingCounterStore, StoreError};

/// Errors from [`guarded_write`].
#[derive(Debug, thiserror::Error)]
pub enum FencingGlueError {
    /// The counter backend itself failed.
    #[error("fencing counter backend error: {0}")]
    Counter(#[from] StoreError),
    /// The guarded write itself failed (typically `StoreError::Domain(StaleLock)`
    /// if another writer's token has since advanced the counter further).
    #[error("guarded write failed: {0}")]
    Write(StoreError),
}

/// Obtains a fresh monotonic token for `resource` and passes it to `write`,
/// which performs the actual guarded update (e.g.
/// `DeliveryRepository::set_status_guarded`). This guarantees
/// linearizability of the guarded update even if a lease-based lock is
/// erroneously held by two writers at once (GC pause, clock skew, expired
/// lease) — the counter, not the lock, is what orders the writes.
pub async fn guarded_write<T, F, Fut>(
    counters: &impl FencingCounterStore,
    resource: &str,
    now: DateTime<Utc>,
    write: F,
) -> Result<T, FencingGlueError>
where
    F: FnOnce(u64) -> Fut,
    Fut: std::future::Future<Output = Result<T, StoreError>>,
{
    let token = counters.next_token(resource, now).await?;
    write(token).await.map_err(FencingGlueError::Write)
}
