//! Saga transition matrix and the three seeded lifecycle scenarios (§4.6, §8).

#[path = "common.rs"]
mod common;

use chrono::Utc;
use uuid::Uuid;

use orderflow_events::RealtimeNotifier;
use orderflow_saga::SagaOrchestrator;
use orderflow_store_core::{DeliveryRepository, PaymentRepository};
use orderflow_types::{DeliveryStatus, OrderStatus, PaymentStatus, SagaStatus, SagaStep};

use common::{new_store, sample_order};

fn orchestrator(
    store: std::sync::Arc<orderflow_store_memory::MemoryStore>,
) -> SagaOrchestrator<orderflow_store_memory::MemoryStore> {
    SagaOrchestrator::new(store, RealtimeNotifier::default())
}

/// Scenario 1: payment and delivery both succeed. The saga reaches
/// `DeliveryPending` with a completed payment and a waiting delivery row
/// (rider assignment itself is driven by a fencing-guarded write outside
/// the saga, verified separately in `idempotency_and_fencing.rs`).
#[tokio::test]
async fn happy_path_completes_payment_and_creates_delivery() {
    let store = new_store();
    let saga = orchestrator(store.clone());
    let now = Utc::now();
    let user_id = Uuid::new_v4();
    let order = sample_order(user_id, None, now);
    let order_id = order.id;
    let saga_id = Uuid::new_v4();

    let state = saga.start_saga(Uuid::new_v4(), saga_id, order, now).await.unwrap();
    assert_eq!(state.step, SagaStep::PaymentPending);

    let state = saga.on_payment_result(Uuid::new_v4(), saga_id, true, None, now).await.unwrap();
    assert_eq!(state.step, SagaStep::DeliveryPending);
    assert_eq!(state.status, SagaStatus::Started);

    let payment = PaymentRepository::get_by_order(store.as_ref(), order_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Completed);

    let delivery = DeliveryRepository::get_by_order(store.as_ref(), order_id).await.unwrap();
    assert!(delivery.is_some());
    assert_eq!(delivery.unwrap().status, DeliveryStatus::Waiting);
}

/// Scenario 2: payment fails outright. The saga terminates `Failed`
/// without ever creating a delivery row, the order is cancelled, and the
/// payment itself is marked failed rather than refunded (nothing to refund).
#[tokio::test]
async fn payment_failure_terminates_the_saga_with_no_delivery() {
    let store = new_store();
    let saga = orchestrator(store.clone());
    let now = Utc::now();
    let user_id = Uuid::new_v4();
    let order = sample_order(user_id, None, now);
    let order_id = order.id;
    let saga_id = Uuid::new_v4();

    saga.start_saga(Uuid::new_v4(), saga_id, order, now).await.unwrap();
    let state = saga
        .on_payment_result(Uuid::new_v4(), saga_id, false, Some("card_declined".to_string()), now)
        .await
        .unwrap();

    assert_eq!(state.step, SagaStep::Failed);
    assert_eq!(state.status, SagaStatus::Failed);
    assert_eq!(state.failure_reason.as_deref(), Some("card_declined"));

    let payment = PaymentRepository::get_by_order(store.as_ref(), order_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Failed);

    let delivery = DeliveryRepository::get_by_order(store.as_ref(), order_id).await.unwrap();
    assert!(delivery.is_none());
}

/// Scenario 3: payment succeeds but delivery later fails. The saga enters
/// compensation, refunds the payment, and cancels the order — terminal
/// `Failed`, same as an outright payment failure, but having passed through
/// `PaymentCompleted` first.
#[tokio::test]
async fn delivery_failure_after_payment_success_triggers_compensation() {
    let store = new_store();
    let saga = orchestrator(store.clone());
    let now = Utc::now();
    let user_id = Uuid::new_v4();
    let order = sample_order(user_id, None, now);
    let order_id = order.id;
    let saga_id = Uuid::new_v4();

    saga.start_saga(Uuid::new_v4(), saga_id, order, now).await.unwrap();
    saga.on_payment_result(Uuid::new_v4(), saga_id, true, None, now).await.unwrap();

    let state = saga
        .on_delivery_result(Uuid::new_v4(), saga_id, false, Some("no_riders_available".to_string()), now)
        .await
        .unwrap();
    assert_eq!(state.step, SagaStep::CompensatingPayment);

    let final_state = saga.on_compensation_result(Uuid::new_v4(), saga_id, now).await.unwrap();
    assert_eq!(final_state.step, SagaStep::Failed);
    assert_eq!(final_state.status, SagaStatus::Failed);

    let payment = PaymentRepository::get_by_order(store.as_ref(), order_id).await.unwrap().unwrap();
    assert_eq!(payment.status, PaymentStatus::Refunded);

    let saga_state = saga.get_by_order(order_id).await.unwrap().unwrap();
    assert_eq!(saga_state.step, SagaStep::Failed);
}

/// Round-trip property: every saga that reaches `Failed` also leaves its
/// order in `Cancelled`, regardless of which failure path drove it there.
#[tokio::test]
async fn every_failed_saga_cancels_its_order() {
    let store = new_store();
    let saga = orchestrator(store.clone());
    let now = Utc::now();
    let user_id = Uuid::new_v4();
    let order = sample_order(user_id, None, now);
    let order_id = order.id;
    let saga_id = Uuid::new_v4();

    saga.start_saga(Uuid::new_v4(), saga_id, order, now).await.unwrap();
    saga.on_payment_result(Uuid::new_v4(), saga_id, false, Some("insufficient_funds".to_string()), now)
        .await
        .unwrap();

    use orderflow_store_core::OrderRepository;
    let order = store.get(order_id).await.unwrap();
    assert_eq!(order.status, OrderStatus::Cancelled);
}

/// Redelivering a reply event already applied must not re-fire a second
/// compensating command or re-transition the saga — it re-reports the
/// current state instead.
#[tokio::test]
async fn redelivered_payment_result_does_not_double_apply() {
    let store = new_store();
    let saga = orchestrator(store.clone());
    let now = Utc::now();
    let user_id = Uuid::new_v4();
    let order = sample_order(user_id, None, now);
    let saga_id = Uuid::new_v4();
    let event_id = Uuid::new_v4();

    saga.start_saga(Uuid::new_v4(), saga_id, order, now).await.unwrap();
    let first = saga.on_payment_result(event_id, saga_id, true, None, now).await.unwrap();
    let second = saga.on_payment_result(event_id, saga_id, true, None, now).await.unwrap();

    assert_eq!(first.step, second.step);
    assert_eq!(first.updated_at, second.updated_at);
}
