//! Outbox atomicity and per-aggregate commit order (§4.1, §5, §8).

#[path = "common.rs"]
mod common;

use chrono::Utc;
use serde_json::json;
use uuid::Uuid;

use orderflow_store_core::OutboxStore;
use orderflow_types::OutboxRecord;

use common::new_store;

#[tokio::test]
async fn fetch_unpublished_orders_by_aggregate_then_row_id() {
    let store = new_store();
    let now = Utc::now();
    let aggregate_a = Uuid::new_v4();
    let aggregate_b = Uuid::new_v4();

    // Interleave appends across two aggregates; the fetch must still group
    // and order per-aggregate by ascending row id (commit order, §5).
    let a1 = store
        .append(OutboxRecord::new_unpublished("order", aggregate_a, "order.created", json!({"n": 1}), now))
        .await
        .unwrap();
    let b1 = store
        .append(OutboxRecord::new_unpublished("order", aggregate_b, "order.created", json!({"n": 1}), now))
        .await
        .unwrap();
    let a2 = store
        .append(OutboxRecord::new_unpublished("order", aggregate_a, "order.cancelled", json!({"n": 2}), now))
        .await
        .unwrap();

    let unpublished = store.fetch_unpublished("order", 10).await.unwrap();
    assert_eq!(unpublished.len(), 3);

    let a_rows: Vec<_> = unpublished.iter().filter(|r| r.aggregate_id == aggregate_a).collect();
    assert_eq!(a_rows.len(), 2);
    assert!(a_rows[0].id < a_rows[1].id, "aggregate A's own rows must stay in commit order");
    assert_eq!(a_rows[0].id, a1.id);
    assert_eq!(a_rows[1].id, a2.id);

    let b_rows: Vec<_> = unpublished.iter().filter(|r| r.aggregate_id == aggregate_b).collect();
    assert_eq!(b_rows[0].id, b1.id);
}

#[tokio::test]
async fn mark_published_is_idempotent_and_excludes_from_future_fetches() {
    let store = new_store();
    let now = Utc::now();
    let aggregate = Uuid::new_v4();

    let record = store
        .append(OutboxRecord::new_unpublished("payment", aggregate, "payment.process", json!({}), now))
        .await
        .unwrap();

    store.mark_published(record.id, now).await.unwrap();
    let unpublished = store.fetch_unpublished("payment", 10).await.unwrap();
    assert!(unpublished.is_empty());

    // Re-marking an already-published row is a no-op, not an error — a
    // crash between publish and this call is an expected race (§4.1).
    store.mark_published(record.id, now).await.unwrap();
}

#[tokio::test]
async fn delete_published_older_than_cutoff_only_removes_published_rows() {
    let store = new_store();
    let old = Utc::now() - chrono::Duration::days(2);
    let recent = Utc::now();
    let aggregate = Uuid::new_v4();

    let published_old = store
        .append(OutboxRecord::new_unpublished("order", aggregate, "order.created", json!({}), old))
        .await
        .unwrap();
    let unpublished_old = store
        .append(OutboxRecord::new_unpublished("order", aggregate, "order.cancelled", json!({}), old))
        .await
        .unwrap();

    store.mark_published(published_old.id, old).await.unwrap();

    let cutoff = Utc::now() - chrono::Duration::hours(1);
    let deleted = store.delete_published_older_than(cutoff).await.unwrap();
    assert_eq!(deleted, 1);

    // The unpublished old row survives retention: only published rows are
    // ever eligible for deletion, regardless of age.
    let still_unpublished = store.fetch_unpublished("order", 10).await.unwrap();
    assert_eq!(still_unpublished.len(), 1);
    assert_eq!(still_unpublished[0].id, unpublished_old.id);
}
