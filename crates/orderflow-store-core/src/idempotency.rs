//! Idempotent-consumer ledger trait (§4.2).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use uuid::Uuid;

use crate::StoreError;

/// Storage contract for the processed-event ledger.
///
/// Every consumer handler calls [`IdempotencyLedger::try_mark_processed`] in
/// the same transaction as its business effect, before applying that
/// effect. A `false` return means the event was already processed and the
/// handler must short-circuit without re-applying anything (§4.2, §7
/// "idempotency check short-circuits").
#[async_trait]
pub trait IdempotencyLedger: Send + Sync {
    /// Attempt to record `event_id` as processed at `now`.
    ///
    /// Returns `true` if this call inserted a new row (first delivery),
    /// `false` if a row already existed (redelivery).
    async fn try_mark_processed(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError>;

    /// Remove ledger rows older than `cutoff`, returning the count removed.
    /// Run by the retention sweep (§9 open-question decision) under the
    /// leader lock.
    async fn sweep_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError>;
}
