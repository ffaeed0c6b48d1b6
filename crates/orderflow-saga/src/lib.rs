#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **orderflow-saga** – Orchestrator for the order-fulfillment saga (§4.6).
//!
//! The actual transactional state machine — the idempotency-ledger insert,
//! the `SagaState`/`Order` mutation, and the outbox append, all applied
//! atomically — lives behind [`orderflow_store_core::SagaTransactions`] and
//! is implemented per-backend in `orderflow-store-memory` and
//! `orderflow-store-postgres`. This crate is the thin layer above that: it
//! gives the four transactional entry points a single call surface, routes
//! an inbound [`ReplyEvent`] to the right one of them, and fires the
//! realtime notification (§4.8) for whichever outcome the store reports —
//! but only when the store reports the effect was actually applied for the
//! first time, never on an idempotent redelivery.
//!
//! This split mirrors the teacher's own kernel/handler boundary: `submit`
//! validates, dispatches to the handler that owns the mutation, and emits
//! exactly one event per accepted command, while the mutation itself stays
//! out of the dispatch layer.

use std::sync::Arc;

use chrono::{DateTime, Utc};
use orderflow_events::RealtimeNotifier;
use orderflow_store_core::{Applied, SagaRepository, SagaTransactions, StoreError};
use orderflow_types::{Order, ReplyEvent, ReplyStep, SagaState, SagaStep};
use tracing::{debug, warn};
use uuid::Uuid;

/// Errors surfaced by the saga orchestrator; currently a thin pass-through
/// over the backing store's errors.
#[derive(Debug, thiserror::Error)]
pub enum SagaError {
    /// The backing store rejected the call.
    #[error(transparent)]
    Store(#[from] StoreError),
}

/// Orchestrates the order-fulfillment saga over a backend implementing both
/// [`SagaTransactions`] (the four atomic entry points) and [`SagaRepository`]
/// (plain reads), firing [`RealtimeNotifier`] notifications on genuinely
/// applied transitions.
pub struct SagaOrchestrator<S> {
    store: Arc<S>,
    notifier: RealtimeNotifier,
}

impl<S> SagaOrchestrator<S>
where
    S: SagaTransactions + SagaRepository,
{
    /// Build an orchestrator over `store`, broadcasting through `notifier`.
    pub fn new(store: Arc<S>, notifier: RealtimeNotifier) -> Self {
        Self { store, notifier }
    }

    /// Fetch the current saga state for `saga_id`.
    pub async fn get(&self, saga_id: Uuid) -> Result<SagaState, SagaError> {
        Ok(self.store.get(saga_id).await?)
    }

    /// Fetch the saga driving `order_id`, if one has been started.
    pub async fn get_by_order(&self, order_id: Uuid) -> Result<Option<SagaState>, SagaError> {
        Ok(self.store.get_by_order(order_id).await?)
    }

    /// `startSaga` (§4.6): create the saga in `PaymentPending` and emit a
    /// payment command. Idempotent on `event_id`.
    pub async fn start_saga(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        order: Order,
        now: DateTime<Utc>,
    ) -> Result<SagaState, SagaError> {
        let applied = self.store.start_saga(event_id, saga_id, order, now).await?;
        self.on_outcome(saga_id, applied).await
    }

    /// `onPaymentResult` (§4.6): advances the saga on a payment reply,
    /// success or failure. Idempotent on `event_id`.
    pub async fn on_payment_result(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        success: bool,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<SagaState, SagaError> {
        let applied = self
            .store
            .on_payment_result(event_id, saga_id, success, failure_reason, now)
            .await?;
        self.on_outcome(saga_id, applied).await
    }

    /// `onDeliveryResult` (§4.6): advances the saga on a delivery reply;
    /// failure drives a compensating payment. Idempotent on `event_id`.
    pub async fn on_delivery_result(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        success: bool,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<SagaState, SagaError> {
        let applied = self
            .store
            .on_delivery_result(event_id, saga_id, success, failure_reason, now)
            .await?;
        self.on_outcome(saga_id, applied).await
    }

    /// `onCompensationResult` (§4.6): finishes the compensation path, always
    /// landing on terminal `Failed`. Idempotent on `event_id`.
    pub async fn on_compensation_result(
        &self,
        event_id: Uuid,
        saga_id: Uuid,
        now: DateTime<Utc>,
    ) -> Result<SagaState, SagaError> {
        let applied = self.store.on_compensation_result(event_id, saga_id, now).await?;
        self.on_outcome(saga_id, applied).await
    }

    /// Routes an inbound [`ReplyEvent`] to the matching transactional entry
    /// point. The reply step set is fixed at three variants (§4.6), so a
    /// direct match is the dispatch: there is no extension point here for a
    /// consumer to register a new step kind, because this saga has no such
    /// extension requirement.
    pub async fn handle_reply(
        &self,
        event_id: Uuid,
        reply: ReplyEvent,
        now: DateTime<Utc>,
    ) -> Result<SagaState, SagaError> {
        match reply.step {
            ReplyStep::Payment => {
                self.on_payment_result(event_id, reply.saga_id, reply.success, reply.failure_reason, now)
                    .await
            }
            ReplyStep::Delivery => {
                self.on_delivery_result(event_id, reply.saga_id, reply.success, reply.failure_reason, now)
                    .await
            }
            ReplyStep::PaymentCompensate => {
                self.on_compensation_result(event_id, reply.saga_id, now).await
            }
        }
    }

    /// Translates a transactional outcome into the caller's return value,
    /// firing realtime notifications only when the effect was newly applied.
    async fn on_outcome(
        &self,
        saga_id: Uuid,
        applied: Applied<(SagaState, Order)>,
    ) -> Result<SagaState, SagaError> {
        match applied {
            Applied::Applied((saga, order)) => {
                self.notifier.notify_status_changed(order.id, order.status);
                if saga.step == SagaStep::Failed {
                    if let Some(reason) = &saga.failure_reason {
                        self.notifier.notify_saga_failed(order.id, reason.clone());
                    }
                }
                debug!(saga_id = %saga.saga_id, step = ?saga.step, "saga transition applied");
                Ok(saga)
            }
            Applied::AlreadyProcessed => {
                warn!(saga_id = %saga_id, "ignoring redelivered saga event");
                Ok(self.store.get(saga_id).await?)
            }
        }
    }
}
