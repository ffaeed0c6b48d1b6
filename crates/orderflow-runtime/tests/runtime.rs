//! End-to-end wiring tests for the composition root: a saga started
//! through `Runtime::saga` produces an outbox row the relay can publish,
//! and the admission queue/dequeuer interplay releases a queued order.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use uuid::Uuid;

use orderflow_runtime::{test_config, InMemoryPublisher, Runtime};
use orderflow_store_memory::MemoryStore;
use orderflow_types::{LineItem, Order, PaymentMethod};

fn sample_order() -> Order {
    Order::new(
        Uuid::new_v4(),
        Uuid::new_v4(),
        vec![LineItem { menu_id: Uuid::new_v4(), quantity: 2, unit_price_cents: 2500 }],
        "1 Infinite Loop".to_string(),
        PaymentMethod::Card,
        None,
        Utc::now(),
    )
    .unwrap()
}

#[tokio::test]
async fn starting_a_saga_produces_a_row_the_relay_publishes() {
    let store = Arc::new(MemoryStore::new());
    let publisher = Arc::new(InMemoryPublisher::new());
    let runtime = Runtime::new(test_config(), store.clone(), publisher.clone()).await.unwrap();

    let order = sample_order();
    let order_id = order.id;
    let saga_id = Uuid::new_v4();
    runtime.saga.start_saga(Uuid::new_v4(), saga_id, order, Utc::now()).await.unwrap();

    // Give the spawned relay task a few ticks to run under test_config's
    // (short) interval before asserting on its effect.
    tokio::time::sleep(Duration::from_millis(50)).await;

    let published = publisher.published().await;
    assert!(
        published.iter().any(|(binding, key, _)| binding == "paymentCommands-out-0" && *key == order_id),
        "expected a paymentCommands-out-0 publish keyed by the order id, got {published:?}"
    );

    runtime.shutdown().await;
}

#[tokio::test]
async fn admission_queue_exposes_rank_once_active() {
    let store = Arc::new(MemoryStore::new());
    let publisher = Arc::new(InMemoryPublisher::new());
    let mut config = test_config();
    config.admission.active_threshold = 1;
    let runtime = Runtime::new(config, store, publisher).await.unwrap();

    let now = Utc::now();
    // First accept bypasses (in_flight 0 < threshold 1 at evaluation time).
    assert!(runtime.admission_queue.accept(Uuid::new_v4(), now).await.is_none());
    // Second accept sees the queue active and gets a rank.
    let status = runtime.admission_queue.accept(Uuid::new_v4(), now).await.unwrap();
    assert_eq!(status.rank, 1);

    runtime.shutdown().await;
}
