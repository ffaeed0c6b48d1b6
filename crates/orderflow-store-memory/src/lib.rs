#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **orderflow-store-memory** – In-memory storage backend for the orderflow
//! control plane.
//!
//! A single [`tokio::sync::Mutex`] guards every in-process table. Because
//! the backend has no native multi-table transaction, this lock is exactly
//! what stands in for one: every method that the spec requires to be
//! atomic (§4.6's four saga entry points in particular) holds the lock for
//! its entire body, so no other caller can observe or interleave a partial
//! write. `orderflow-store-postgres` gets the same guarantee from a real
//! `sqlx` transaction instead.
//!
//! This backend is for tests and local development; it holds no data
//! across process restarts.

use std::collections::HashMap;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use orderflow_store_core::{
    Applied, DeliveryRepository, FencingCounterStore, IdempotencyLedger, LockLeaseStore,
    OrderRepository, OutboxStore, PaymentRepository, SagaRepository, SagaTransactions, StoreError,
};
use orderflow_types::{
    CommandEvent, Delivery, DeliveryStatus, DomainError, Order, OrderStatus, OutboxRecord,
    Payment, PaymentCommandKind, PaymentStatus, SagaState, SagaStep,
};

#[derive(Default)]
struct State {
    orders: HashMap<Uuid, Order>,
    orders_by_idempotency_key: HashMap<String, Uuid>,
    payments: HashMap<Uuid, Payment>,
    payments_by_order: HashMap<Uuid, Uuid>,
    deliveries: HashMap<Uuid, Delivery>,
    deliveries_by_order: HashMap<Uuid, Uuid>,
    sagas: HashMap<Uuid, SagaState>,
    sagas_by_order: HashMap<Uuid, Uuid>,
    outbox: Vec<OutboxRecord>,
    next_outbox_id: i64,
    processed_events: HashMap<Uuid, DateTime<Utc>>,
    fencing_counters: HashMap<String, u64>,
    leases: HashMap<String, Lease>,
}

#[derive(Clone)]
struct Lease {
    holder: String,
    expires_at: DateTime<Utc>,
}

/// The in-memory backend. Implements every `orderflow-store-core` trait,
/// so one `Arc<MemoryStore>` can be wired wherever the workspace expects a
/// `dyn OrderRepository`, `dyn OutboxStore`, etc.
#[derive(Clone)]
pub struct MemoryStore {
    state: Arc<Mutex<State>>,
}

impl Default for MemoryStore {
    fn default() -> Self {
        Self::new()
    }
}

impl MemoryStore {
    /// Construct an empty store.
    pub fn new() -> Self {
        Self { state: Arc::new(Mutex::new(State::default())) }
    }

    fn append_outbox_locked(state: &mut State, record: OutboxRecord) -> OutboxRecord {
        state.next_outbox_id += 1;
        let mut record = record;
        record.id = state.next_outbox_id;
        state.outbox.push(record.clone());
        record
    }
}

//─────────────────────────────
//  OutboxStore
//─────────────────────────────

#[async_trait]
impl OutboxStore for MemoryStore {
    async fn append(&self, record: OutboxRecord) -> Result<OutboxRecord, StoreError> {
        let mut state = self.state.lock().await;
        Ok(Self::append_outbox_locked(&mut state, record))
    }

    async fn fetch_unpublished(
        &self,
        aggregate_type: &str,
        limit: usize,
    ) -> Result<Vec<OutboxRecord>, StoreError> {
        let state = self.state.lock().await;
        let mut rows: Vec<OutboxRecord> = state
            .outbox
            .iter()
            .filter(|r| !r.published && r.aggregate_type == aggregate_type)
            .cloned()
            .collect();
        rows.sort_by(|a, b| (a.aggregate_id, a.id).cmp(&(b.aggregate_id, b.id)));
        rows.truncate(limit);
        Ok(rows)
    }

    async fn mark_published(&self, id: i64, now: DateTime<Utc>) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(row) = state.outbox.iter_mut().find(|r| r.id == id) {
            row.published = true;
            row.published_at = Some(now);
        }
        Ok(())
    }

    async fn delete_published_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.outbox.len();
        state
            .outbox
            .retain(|r| !(r.published && r.published_at.map(|p| p < cutoff).unwrap_or(false)));
        Ok((before - state.outbox.len()) as u64)
    }
}

//─────────────────────────────
//  IdempotencyLedger
//─────────────────────────────

#[async_trait]
impl IdempotencyLedger for MemoryStore {
    async fn try_mark_processed(&self, event_id: Uuid, now: DateTime<Utc>) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        if state.processed_events.contains_key(&event_id) {
            return Ok(false);
        }
        state.processed_events.insert(event_id, now);
        Ok(true)
    }

    async fn sweep_older_than(&self, cutoff: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let before = state.processed_events.len();
        state.processed_events.retain(|_, processed_at| *processed_at >= cutoff);
        Ok((before - state.processed_events.len()) as u64)
    }
}

//─────────────────────────────
//  FencingCounterStore
//─────────────────────────────

#[async_trait]
impl FencingCounterStore for MemoryStore {
    async fn next_token(&self, resource: &str, _now: DateTime<Utc>) -> Result<u64, StoreError> {
        let mut state = self.state.lock().await;
        let counter = state.fencing_counters.entry(resource.to_string()).or_insert(0);
        *counter += 1;
        Ok(*counter)
    }

    async fn current_token(&self, resource: &str) -> Result<u64, StoreError> {
        let state = self.state.lock().await;
        Ok(state.fencing_counters.get(resource).copied().unwrap_or(0))
    }

    async fn guard_write(&self, resource: &str, presented_token: u64) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        let current = state.fencing_counters.get(resource).copied().unwrap_or(0);
        if presented_token <= current {
            return Err(StoreError::stale_version(resource, presented_token as i64, current as i64));
        }
        state.fencing_counters.insert(resource.to_string(), presented_token);
        Ok(())
    }
}

//─────────────────────────────
//  LockLeaseStore
//─────────────────────────────

#[async_trait]
impl LockLeaseStore for MemoryStore {
    async fn try_acquire(
        &self,
        lock_name: &str,
        holder: &str,
        lease_duration: Duration,
        now: DateTime<Utc>,
    ) -> Result<bool, StoreError> {
        let mut state = self.state.lock().await;
        let expires_at = now
            + chrono::Duration::from_std(lease_duration)
                .unwrap_or_else(|_| chrono::Duration::seconds(0));

        let acquired = match state.leases.get(lock_name) {
            Some(existing) if existing.expires_at > now && existing.holder != holder => false,
            _ => true,
        };

        if acquired {
            state.leases.insert(
                lock_name.to_string(),
                Lease { holder: holder.to_string(), expires_at },
            );
        }
        Ok(acquired)
    }

    async fn release(&self, lock_name: &str, holder: &str) -> Result<(), StoreError> {
        let mut state = self.state.lock().await;
        if let Some(existing) = state.leases.get(lock_name) {
            if existing.holder == holder {
                state.leases.remove(lock_name);
            }
        }
        Ok(())
    }
}

//─────────────────────────────
//  Domain repositories
//─────────────────────────────

#[async_trait]
impl OrderRepository for MemoryStore {
    async fn insert(&self, order: Order) -> Result<Order, StoreError> {
        let mut state = self.state.lock().await;
        if let Some(key) = &order.idempotency_key {
            if state.orders_by_idempotency_key.contains_key(key) {
                return Err(StoreError::Domain(DomainError::DuplicateRequest(key.clone())));
            }
            state.orders_by_idempotency_key.insert(key.clone(), order.id);
        }
        state.orders.insert(order.id, order.clone());
        Ok(order)
    }

    async fn get(&self, id: Uuid) -> Result<Order, StoreError> {
        let state = self.state.lock().await;
        state
            .orders
            .get(&id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", id.to_string()))
    }

    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .orders_by_idempotency_key
            .get(key)
            .and_then(|id| state.orders.get(id).cloned()))
    }

    async fn cancel(&self, id: Uuid, expected_version: i64, now: DateTime<Utc>) -> Result<Order, StoreError> {
        let _ = now;
        let mut state = self.state.lock().await;
        let order = state
            .orders
            .get_mut(&id)
            .ok_or_else(|| StoreError::not_found("order", id.to_string()))?;
        if order.version != expected_version {
            return Err(StoreError::stale_version(format!("order:{id}"), expected_version, order.version));
        }
        if !order.is_user_cancellable() {
            return Err(StoreError::Domain(DomainError::InvalidStateTransition {
                from: format!("{:?}", order.status),
                to: "Cancelled".to_string(),
            }));
        }
        order.set_status(OrderStatus::Cancelled);
        Ok(order.clone())
    }
}

#[async_trait]
impl PaymentRepository for MemoryStore {
    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .payments_by_order
            .get(&order_id)
            .and_then(|id| state.payments.get(id).cloned()))
    }
}

#[async_trait]
impl DeliveryRepository for MemoryStore {
    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Delivery>, StoreError> {
        let state = self.state.lock().await;
        Ok(state
            .deliveries_by_order
            .get(&order_id)
            .and_then(|id| state.deliveries.get(id).cloned()))
    }

    async fn set_status_guarded(
        &self,
        order_id: Uuid,
        status: DeliveryStatus,
        fencing_token: u64,
        now: DateTime<Utc>,
    ) -> Result<Delivery, StoreError> {
        let mut state = self.state.lock().await;
        let delivery_id = *state
            .deliveries_by_order
            .get(&order_id)
            .ok_or_else(|| StoreError::not_found("delivery", order_id.to_string()))?;
        let delivery = state.deliveries.get_mut(&delivery_id).expect("indexed delivery must exist");

        if let Some(current) = delivery.last_fencing_token {
            if fencing_token <= current {
                return Err(StoreError::stale_version(
                    format!("delivery:{order_id}"),
                    fencing_token as i64,
                    current as i64,
                ));
            }
        }
        delivery.last_fencing_token = Some(fencing_token);
        delivery.status = status;
        delivery.version += 1;
        let _ = now;
        Ok(delivery.clone())
    }
}

#[async_trait]
impl SagaRepository for MemoryStore {
    async fn get(&self, saga_id: Uuid) -> Result<SagaState, StoreError> {
        let state = self.state.lock().await;
        state
            .sagas
            .get(&saga_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("saga", saga_id.to_string()))
    }

    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<SagaState>, StoreError> {
        let state = self.state.lock().await;
        Ok(state.sagas_by_order.get(&order_id).and_then(|id| state.sagas.get(id).cloned()))
    }
}

//─────────────────────────────
//  SagaTransactions
//─────────────────────────────

#[async_trait]
impl SagaTransactions for MemoryStore {
    async fn start_saga(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        order: Order,
        now: DateTime<Utc>,
    ) -> Result<Applied<(SagaState, Order)>, StoreError> {
        let mut state = self.state.lock().await;
        if state.processed_events.contains_key(&event_id) {
            return Ok(Applied::AlreadyProcessed);
        }
        state.processed_events.insert(event_id, now);

        if let Some(key) = &order.idempotency_key {
            if let Some(existing) = state.orders_by_idempotency_key.get(key) {
                if *existing != order.id {
                    return Err(StoreError::Domain(DomainError::DuplicateRequest(key.clone())));
                }
            } else {
                state.orders_by_idempotency_key.insert(key.clone(), order.id);
            }
        }

        let saga = SagaState::start(order.id, saga_id, now);
        state.sagas.insert(saga.saga_id, saga.clone());
        state.sagas_by_order.insert(order.id, saga.saga_id);
        state.orders.insert(order.id, order.clone());

        let payment = Payment::new_pending(
            order.id,
            order.total_cents,
            order.payment_method,
            order.idempotency_key.clone(),
            now,
        );
        state.payments_by_order.insert(order.id, payment.id);
        state.payments.insert(payment.id, payment);

        let command = CommandEvent::Payment {
            saga_id,
            order_id: order.id,
            amount_cents: order.total_cents,
            kind: PaymentCommandKind::Process,
        };
        let payload = serde_json::to_value(&command).map_err(|e| StoreError::Backend(e.into()))?;
        Self::append_outbox_locked(
            &mut state,
            OutboxRecord::new_unpublished("payment", order.id, "payment.process", payload, now),
        );

        Ok(Applied::Applied((saga, order)))
    }

    async fn on_payment_result(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        success: bool,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Applied<(SagaState, Order)>, StoreError> {
        let mut state = self.state.lock().await;
        if state.processed_events.contains_key(&event_id) {
            return Ok(Applied::AlreadyProcessed);
        }
        state.processed_events.insert(event_id, now);

        let mut saga = state
            .sagas
            .get(&saga_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("saga", saga_id.to_string()))?;
        let mut order = state
            .orders
            .get(&saga.order_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", saga.order_id.to_string()))?;

        if let Some(payment_id) = state.payments_by_order.get(&order.id).copied() {
            if let Some(payment) = state.payments.get_mut(&payment_id) {
                let next = if success { PaymentStatus::Completed } else { PaymentStatus::Failed };
                payment.transition(next)?;
            }
        }

        if success {
            saga.advance(SagaStep::PaymentCompleted, None, now)?;
            order.set_status(OrderStatus::Paid);
            saga.advance(SagaStep::DeliveryPending, None, now)?;

            let delivery = Delivery::new_waiting(order.id, now);
            state.deliveries_by_order.insert(order.id, delivery.id);
            state.deliveries.insert(delivery.id, delivery);

            let command = CommandEvent::Delivery { saga_id, order_id: order.id };
            let payload = serde_json::to_value(&command).map_err(|e| StoreError::Backend(e.into()))?;
            Self::append_outbox_locked(
                &mut state,
                OutboxRecord::new_unpublished("delivery", order.id, "delivery.create", payload, now),
            );
        } else {
            saga.advance(SagaStep::Failed, failure_reason, now)?;
            order.set_status(OrderStatus::Cancelled);
        }

        state.sagas.insert(saga.saga_id, saga.clone());
        state.orders.insert(order.id, order.clone());
        Ok(Applied::Applied((saga, order)))
    }

    async fn on_delivery_result(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        success: bool,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Applied<(SagaState, Order)>, StoreError> {
        let mut state = self.state.lock().await;
        if state.processed_events.contains_key(&event_id) {
            return Ok(Applied::AlreadyProcessed);
        }
        state.processed_events.insert(event_id, now);

        let mut saga = state
            .sagas
            .get(&saga_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("saga", saga_id.to_string()))?;
        let mut order = state
            .orders
            .get(&saga.order_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", saga.order_id.to_string()))?;

        if success {
            saga.advance(SagaStep::Completed, None, now)?;
            order.set_status(OrderStatus::Delivering);
        } else {
            saga.advance(SagaStep::CompensatingPayment, failure_reason.clone(), now)?;

            let payment_amount = state
                .payments_by_order
                .get(&order.id)
                .and_then(|id| state.payments.get(id))
                .map(|p| p.amount_cents)
                .unwrap_or(order.total_cents);

            let command = CommandEvent::Payment {
                saga_id,
                order_id: order.id,
                amount_cents: payment_amount,
                kind: PaymentCommandKind::Compensate,
            };
            let payload = serde_json::to_value(&command).map_err(|e| StoreError::Backend(e.into()))?;
            Self::append_outbox_locked(
                &mut state,
                OutboxRecord::new_unpublished("payment", order.id, "payment.compensate", payload, now),
            );
        }

        state.sagas.insert(saga.saga_id, saga.clone());
        state.orders.insert(order.id, order.clone());
        Ok(Applied::Applied((saga, order)))
    }

    async fn on_compensation_result(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Applied<(SagaState, Order)>, StoreError> {
        let mut state = self.state.lock().await;
        if state.processed_events.contains_key(&event_id) {
            return Ok(Applied::AlreadyProcessed);
        }
        state.processed_events.insert(event_id, now);

        let mut saga = state
            .sagas
            .get(&saga_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("saga", saga_id.to_string()))?;
        let mut order = state
            .orders
            .get(&saga.order_id)
            .cloned()
            .ok_or_else(|| StoreError::not_found("order", saga.order_id.to_string()))?;

        saga.advance(SagaStep::Failed, None, now)?;
        order.set_status(OrderStatus::Cancelled);

        if let Some(payment_id) = state.payments_by_order.get(&order.id).copied() {
            if let Some(payment) = state.payments.get_mut(&payment_id) {
                let _ = payment.transition(PaymentStatus::Refunded);
            }
        }

        state.sagas.insert(saga.saga_id, saga.clone());
        state.orders.insert(order.id, order.clone());
        Ok(Applied::Applied((saga, order)))
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_order() -> Order {
        Order::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![orderflow_types::LineItem {
                menu_id: Uuid::new_v4(),
                quantity: 2,
                unit_price_cents: 500,
            }],
            "221B Baker St".into(),
            orderflow_types::PaymentMethod::Card,
            None,
            Utc::now(),
        )
        .unwrap()
    }

    #[tokio::test]
    async fn start_saga_writes_outbox_and_saga_atomically() {
        let store = MemoryStore::new();
        let order = sample_order();
        let saga_id = Uuid::new_v4();
        let applied = store
            .start_saga(Uuid::new_v4(), saga_id, order.clone(), Utc::now())
            .await
            .unwrap();
        let (saga, _) = match applied {
            Applied::Applied(v) => v,
            Applied::AlreadyProcessed => panic!("expected first delivery"),
        };
        assert_eq!(saga.step, SagaStep::PaymentPending);

        let outbox = store.fetch_unpublished("payment", 10).await.unwrap();
        assert_eq!(outbox.len(), 1);
        assert_eq!(outbox[0].event_type, "payment.process");
    }

    #[tokio::test]
    async fn duplicate_event_id_short_circuits() {
        let store = MemoryStore::new();
        let order = sample_order();
        let event_id = Uuid::new_v4();
        let saga_id = Uuid::new_v4();

        store.start_saga(event_id, saga_id, order.clone(), Utc::now()).await.unwrap();
        let second = store.start_saga(event_id, saga_id, order, Utc::now()).await.unwrap();
        assert_eq!(second, Applied::AlreadyProcessed);

        let outbox = store.fetch_unpublished("payment", 10).await.unwrap();
        assert_eq!(outbox.len(), 1, "retried delivery must not duplicate the outbox write");
    }

    #[tokio::test]
    async fn payment_success_then_delivery_failure_drives_compensation() {
        let store = MemoryStore::new();
        let order = sample_order();
        let saga_id = Uuid::new_v4();
        store.start_saga(Uuid::new_v4(), saga_id, order.clone(), Utc::now()).await.unwrap();

        let (saga, order) = match store
            .on_payment_result(Uuid::new_v4(), saga_id, true, None, Utc::now())
            .await
            .unwrap()
        {
            Applied::Applied(v) => v,
            _ => panic!(),
        };
        assert_eq!(saga.step, SagaStep::DeliveryPending);
        assert_eq!(order.status, OrderStatus::Paid);

        let (saga, order) = match store
            .on_delivery_result(Uuid::new_v4(), saga_id, false, Some("rider unavailable".into()), Utc::now())
            .await
            .unwrap()
        {
            Applied::Applied(v) => v,
            _ => panic!(),
        };
        assert_eq!(saga.step, SagaStep::CompensatingPayment);
        assert_eq!(order.status, OrderStatus::Paid, "order status unchanged until compensation resolves");

        let (saga, order) = match store
            .on_compensation_result(Uuid::new_v4(), saga_id, Utc::now())
            .await
            .unwrap()
        {
            Applied::Applied(v) => v,
            _ => panic!(),
        };
        assert_eq!(saga.status, orderflow_types::SagaStatus::Failed);
        assert_eq!(order.status, OrderStatus::Cancelled);
    }

    #[tokio::test]
    async fn fencing_guard_rejects_stale_token() {
        let store = MemoryStore::new();
        store.guard_write("delivery:x", 5).await.unwrap();
        let err = store.guard_write("delivery:x", 3).await.unwrap_err();
        assert!(matches!(err, StoreError::Domain(DomainError::StaleLock { .. })));
    }

    #[tokio::test]
    async fn lease_lock_rejects_second_holder_until_expiry() {
        let store = MemoryStore::new();
        let now = Utc::now();
        assert!(store.try_acquire("relay", "proc-a", Duration::from_secs(30), now).await.unwrap());
        assert!(!store.try_acquire("relay", "proc-b", Duration::from_secs(30), now).await.unwrap());
        assert!(store
            .try_acquire("relay", "proc-b", Duration::from_secs(30), now + chrono::Duration::seconds(60))
            .await
            .unwrap());
    }
}
