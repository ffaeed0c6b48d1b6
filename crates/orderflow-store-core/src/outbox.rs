//! Transactional outbox trait (§4.1).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow_types::OutboxRecord;

use crate::StoreError;

/// Storage contract for the transactional outbox.
///
/// `append` is never called standalone by the relay — it is always invoked
/// as part of a larger write the caller performs within its own
/// transaction (see [`crate::repository::SagaTransactions`]); this trait
/// exposes the relay-side read/update operations plus the append primitive
/// domain repositories compose into their atomic methods.
#[async_trait]
pub trait OutboxStore: Send + Sync {
    /// Append an unpublished outbox row, returning it with its assigned id.
    async fn append(&self, record: OutboxRecord) -> Result<OutboxRecord, StoreError>;

    /// Fetch up to `limit` unpublished rows for `aggregate_type`, ordered by
    /// `(aggregate_id, id)` ascending so that a single aggregate's events
    /// are returned — and therefore published — in commit order (§5).
    async fn fetch_unpublished(
        &self,
        aggregate_type: &str,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError>;

    /// Mark a row as published. Idempotent: marking an already-published row
    /// again is a no-op, since a crash between publish and this call is an
    /// expected edge case (§4.1) resolved by consumer idempotency.
    async fn mark_published(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError>;

    /// Delete published rows older than `cutoff`, returning the count
    /// removed. Run by the retention sweep under the leader lock.
    async fn delete_published_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
