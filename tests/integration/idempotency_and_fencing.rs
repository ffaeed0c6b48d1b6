//! Idempotent-consumer and fencing-counter guarantees (§4.2, §4.3, §8).

#[path = "common.rs"]
mod common;

use chrono::Utc;
use uuid::Uuid;

use orderflow_store_core::{
    Applied, DeliveryRepository, FencingCounterStore, OrderRepository, SagaTransactions, StoreError,
};
use orderflow_types::{DeliveryStatus, DomainError};

use common::{new_store, sample_order};

/// Scenario 4: redelivering the same `OrderCreated` event id must not
/// duplicate the saga's payment command — exactly one Payment row, and the
/// second delivery reports `AlreadyProcessed` without re-mutating anything.
#[tokio::test]
async fn redelivered_start_saga_event_is_applied_exactly_once() {
    let store = new_store();
    let now = Utc::now();
    let user_id = Uuid::new_v4();
    let order = sample_order(user_id, None, now);
    let order_id = order.id;
    let event_id = Uuid::new_v4();
    let saga_id = Uuid::new_v4();

    let first = store.start_saga(event_id, saga_id, order.clone(), now).await.unwrap();
    assert!(matches!(first, Applied::Applied(_)));

    // Redelivery of the exact same event id.
    let second = store.start_saga(event_id, saga_id, order, now).await.unwrap();
    assert_eq!(second, Applied::AlreadyProcessed);

    let persisted = store.get(order_id).await.unwrap();
    assert_eq!(persisted.id, order_id);
}

/// Scenario 6: a duplicate `Idempotency-Key` maps to the same order on a
/// second lookup rather than creating a new one — the gateway layer turns
/// this into the 201-then-409 behavior; here we verify the store-level
/// invariant the gateway relies on.
#[tokio::test]
async fn find_by_idempotency_key_returns_the_original_order() {
    let store = new_store();
    let now = Utc::now();
    let user_id = Uuid::new_v4();
    let key = "order-checkout-abc123";
    let order = sample_order(user_id, Some(key), now);
    let order_id = order.id;

    store.start_saga(Uuid::new_v4(), Uuid::new_v4(), order, now).await.unwrap();

    let found = store.find_by_idempotency_key(key).await.unwrap();
    assert_eq!(found.map(|o| o.id), Some(order_id));

    let missing = store.find_by_idempotency_key("no-such-key").await.unwrap();
    assert!(missing.is_none());
}

/// Scenario 5: writer A obtains fencing token 5 and pauses; writer B
/// obtains token 6 and succeeds; writer A's stale write is then rejected
/// with zero effect, never silently applied out of order.
#[tokio::test]
async fn stale_fencing_token_is_rejected_after_a_newer_token_wins() {
    let store = new_store();
    let now = Utc::now();
    let user_id = Uuid::new_v4();
    let order = sample_order(user_id, None, now);
    let order_id = order.id;

    store.start_saga(Uuid::new_v4(), Uuid::new_v4(), order, now).await.unwrap();
    store.on_payment_result(Uuid::new_v4(), find_saga_id(&store, order_id).await, true, None, now).await.unwrap();

    let resource = format!("delivery:{order_id}");
    let token_a = store.next_token(&resource, now).await.unwrap();
    let token_b = store.next_token(&resource, now).await.unwrap();
    assert!(token_b > token_a);

    // Writer B (the later token) applies its write first.
    let delivered = store.set_status_guarded(order_id, DeliveryStatus::RiderAssigned, token_b, now).await.unwrap();
    assert_eq!(delivered.status, DeliveryStatus::RiderAssigned);

    // Writer A's stale write must be rejected, not silently accepted.
    let err = store
        .set_status_guarded(order_id, DeliveryStatus::PickedUp, token_a, now)
        .await
        .unwrap_err();
    assert!(matches!(err, StoreError::Domain(DomainError::StaleLock { .. })));

    // And the delivery row must still show writer B's status, untouched.
    let current = store.get_by_order(order_id).await.unwrap().unwrap();
    assert_eq!(current.status, DeliveryStatus::RiderAssigned);
}

/// Fencing monotonicity (§8): `next_token` never returns a value less than
/// or equal to one already issued for the same resource, across any
/// interleaving of callers.
#[tokio::test]
async fn fencing_tokens_are_strictly_increasing_per_resource() {
    let store = new_store();
    let now = Utc::now();
    let resource = "delivery:shared";

    let mut tokens = Vec::new();
    for _ in 0..20 {
        tokens.push(store.next_token(resource, now).await.unwrap());
    }

    for window in tokens.windows(2) {
        assert!(window[1] > window[0]);
    }
    assert_eq!(store.current_token(resource).await.unwrap(), tokens[tokens.len() - 1]);
}

async fn find_saga_id(store: &orderflow_store_memory::MemoryStore, order_id: Uuid) -> Uuid {
    use orderflow_store_core::SagaRepository;
    store.get_by_order(order_id).await.unwrap().unwrap().saga_id
}
