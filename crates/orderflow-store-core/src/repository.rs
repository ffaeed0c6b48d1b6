//! Domain repositories and the saga's four atomic transactional entry
//! points (§3, §4.6).

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use orderflow_types::{Delivery, DeliveryStatus, Order, Payment, SagaState};
use uuid::Uuid;

use crate::StoreError;

/// Outcome of a call guarded by the idempotency ledger: either the effect
/// was applied for the first time, or it was already applied by an earlier
/// delivery of the same event (§4.2) and the caller must not re-emit
/// anything.
#[derive(Debug, Clone, PartialEq)]
pub enum Applied<T> {
    /// First delivery: the mutation and its outbox writes were committed.
    Applied(T),
    /// Redelivery: `try_mark_processed` found an existing ledger row.
    AlreadyProcessed,
}

/// Read/write access to the Order aggregate outside of saga transactions.
#[async_trait]
pub trait OrderRepository: Send + Sync {
    /// Insert a newly created order, rejecting a duplicate `idempotency_key`
    /// with [`orderflow_types::DomainError::DuplicateRequest`].
    async fn insert(&self, order: Order) -> Result<Order, StoreError>;

    /// Fetch an order by id.
    async fn get(&self, id: Uuid) -> Result<Order, StoreError>;

    /// Fetch the order previously created under `idempotency_key`, if any.
    async fn find_by_idempotency_key(&self, key: &str) -> Result<Option<Order>, StoreError>;

    /// User-initiated cancel, checked against the optimistic `expected_version`.
    async fn cancel(&self, id: Uuid, expected_version: i64, now: DateTime<Utc>) -> Result<Order, StoreError>;
}

/// Read access to the Payment aggregate.
#[async_trait]
pub trait PaymentRepository: Send + Sync {
    /// Fetch the payment for `order_id`, if one has been created.
    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Payment>, StoreError>;
}

/// Read access to the Delivery aggregate.
#[async_trait]
pub trait DeliveryRepository: Send + Sync {
    /// Fetch the delivery for `order_id`, if one has been created.
    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<Delivery>, StoreError>;

    /// Guarded status write, validated against the fencing token recorded
    /// on the row (§4.3). Rejects with `StaleLock` if `fencing_token` is
    /// behind `last_fencing_token`.
    async fn set_status_guarded(
        &self,
        order_id: Uuid,
        status: DeliveryStatus,
        fencing_token: u64,
        now: DateTime<Utc>,
    ) -> Result<Delivery, StoreError>;
}

/// Read access to the SagaState aggregate.
#[async_trait]
pub trait SagaRepository: Send + Sync {
    /// Fetch a saga by id.
    async fn get(&self, saga_id: Uuid) -> Result<SagaState, StoreError>;

    /// Fetch the saga driving `order_id`, if one has been started.
    async fn get_by_order(&self, order_id: Uuid) -> Result<Option<SagaState>, StoreError>;
}

/// The saga orchestrator's four transactional entry points (§4.6).
///
/// Each method performs, in a single backend transaction: (1) an
/// idempotency-ledger insert keyed by `event_id`, short-circuiting to
/// [`Applied::AlreadyProcessed`] on conflict; (2) the SagaState and Order
/// row mutations; (3) the outbox append for the command this step emits, if
/// any. No SPEC_FULL module ever observes these three writes independently
/// — they succeed or fail together.
#[async_trait]
pub trait SagaTransactions: Send + Sync {
    /// `startSaga`: create the SagaState in `Started`/`PaymentPending` and
    /// write a `PaymentCommand(Process)` to the outbox.
    async fn start_saga(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        order: Order,
        now: DateTime<Utc>,
    ) -> Result<Applied<(SagaState, Order)>, StoreError>;

    /// `onPaymentResult`: on success, advances `PaymentPending` ->
    /// `PaymentCompleted` -> `DeliveryPending` and writes a delivery
    /// command; on failure, advances to terminal `Failed` and cancels the
    /// order.
    async fn on_payment_result(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        success: bool,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Applied<(SagaState, Order)>, StoreError>;

    /// `onDeliveryResult`: on success, advances to terminal `Completed`; on
    /// failure, starts compensation (`CompensatingPayment`) and writes a
    /// `PaymentCommand(Compensate)`.
    async fn on_delivery_result(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        success: bool,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Applied<(SagaState, Order)>, StoreError>;

    /// `onCompensationResult`: advances to terminal `Failed` and cancels
    /// the order.
    async fn on_compensation_result(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<Applied<(SagaState, Order)>, StoreError>;
}
