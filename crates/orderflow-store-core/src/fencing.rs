//! Fencing-counter trait (§4.3, §3 "fencing resource table").

use async_trait::async_trait;
use chrono::{DateTime, Utc};

use crate::StoreError;

/// Storage contract for the durable fencing-token counter.
///
/// One row per contended resource (e.g. `delivery:{orderId}`), created
/// lazily on first guarded write. The counter — not the lease lock — is the
/// correctness mechanism: a guarded write must present a token at least as
/// large as [`FencingCounterStore::current_token`] and the backend rejects
/// (via `Err(StoreError::Domain(DomainError::StaleLock))`) any write whose
/// condition fails, so that two racing writers can never both succeed
/// (§8 "fencing monotonicity").
#[async_trait]
pub trait FencingCounterStore: Send + Sync {
    /// Atomically increment and return the next token for `resource`,
    /// creating the row at `0 -> 1` if it does not yet exist.
    async fn next_token(&self, resource: &str, now: DateTime<Utc>) -> Result<u64, StoreError>;

    /// Read the current token for `resource` without incrementing it.
    /// Returns `0` if the resource has never been fenced.
    async fn current_token(&self, resource: &str) -> Result<u64, StoreError>;

    /// Perform a guarded write: succeeds only if `presented_token` is
    /// greater than or equal to the resource's current token, after which
    /// the resource's current token is advanced to `presented_token`.
    ///
    /// Implementations must make the compare-and-set atomic with respect to
    /// concurrent callers on the same resource.
    async fn guard_write(&self, resource: &str, presented_token: u64) -> Result<(), StoreError>;
}
