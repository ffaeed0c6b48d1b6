//! Transactional outbox and idempotent-consumer ledger types (§3, §4.1, §4.2).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::Value;
use uuid::Uuid;

/// A row in the outbox table, co-committed with the business mutation that
/// produced it (§4.1). The relay publishes rows in `(aggregate_id, id)`
/// order so that events for a single aggregate are never reordered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct OutboxRecord {
    /// Monotonically increasing row id; the relay's per-aggregate ordering key.
    pub id: i64,
    /// Aggregate type tag, e.g. `"order"`, `"payment"`, `"delivery"`.
    pub aggregate_type: String,
    /// Identifier of the aggregate instance that produced this event.
    pub aggregate_id: Uuid,
    /// Event type tag, e.g. `"order.created"`, `"payment.process"`.
    pub event_type: String,
    /// Event payload, already serialized to JSON at write time.
    pub payload: Value,
    /// Whether the relay has successfully published this row.
    pub published: bool,
    /// Row creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Timestamp the relay recorded successful publication, if any.
    pub published_at: Option<DateTime<Utc>>,
}

impl OutboxRecord {
    /// Construct a new, unpublished outbox row. `id` is left at `0`; the
    /// store assigns the real row id on insert (e.g. via a serial column).
    pub fn new_unpublished(
        aggregate_type: impl Into<String>,
        aggregate_id: Uuid,
        event_type: impl Into<String>,
        payload: Value,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: 0,
            aggregate_type: aggregate_type.into(),
            aggregate_id,
            event_type: event_type.into(),
            payload,
            published: false,
            created_at: now,
            published_at: None,
        }
    }
}

/// A row in the idempotent-consumer ledger (§4.2): one entry per event id
/// ever processed, inserted in the same transaction as the business effect
/// it guards.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProcessedEvent {
    /// Identifier of the processed event (the outbox row id or broker message id).
    pub event_id: Uuid,
    /// Timestamp the event was processed, used by the retention sweep (§9).
    pub processed_at: DateTime<Utc>,
}

impl ProcessedEvent {
    /// Record that `event_id` was processed at `now`.
    pub fn new(event_id: Uuid, now: DateTime<Utc>) -> Self {
        Self { event_id, processed_at: now }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn new_unpublished_record_starts_unpublished() {
        let rec = OutboxRecord::new_unpublished(
            "order",
            Uuid::new_v4(),
            "order.created",
            serde_json::json!({"total_cents": 1200}),
            Utc::now(),
        );
        assert!(!rec.published);
        assert!(rec.published_at.is_none());
    }
}
