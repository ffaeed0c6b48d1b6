//! The admission dequeuer's [`orderflow_admission::OrderProcessor`] hook
//! (§4.7): "release to proceed" for an order whose saga was already started
//! at acceptance time.
//!
//! The saga's own commands were already written to the outbox inside the
//! same transaction that started it (§4.6) — they are not gated on
//! admission. What admission gates is purely the caller's *response
//! shape* (immediate vs. queued), so this hook's job is bookkeeping: confirm
//! the saga still exists and tell any realtime subscriber that this order
//! has cleared the queue.

use std::sync::Arc;

use async_trait::async_trait;
use orderflow_admission::OrderProcessor;
use orderflow_events::RealtimeNotifier;
use orderflow_store_core::{OrderRepository, SagaRepository};
use tracing::debug;
use uuid::Uuid;

/// Default [`OrderProcessor`], grounded on `orderflow_saga::SagaOrchestrator::get_by_order`.
pub struct ReleaseOrderProcessor<S: SagaRepository + OrderRepository> {
    store: Arc<S>,
    notifier: RealtimeNotifier,
}

impl<S: SagaRepository + OrderRepository> ReleaseOrderProcessor<S> {
    /// Builds a processor over `store`, notifying via `notifier` on release.
    pub fn new(store: Arc<S>, notifier: RealtimeNotifier) -> Self {
        Self { store, notifier }
    }
}

#[async_trait]
impl<S: SagaRepository + OrderRepository> OrderProcessor for ReleaseOrderProcessor<S> {
    async fn process_queued_order(&self, order_id: Uuid) -> anyhow::Result<()> {
        let saga = self.store.get_by_order(order_id).await?;
        let Some(saga) = saga else {
            anyhow::bail!("no saga found for released order {order_id}");
        };
        let order = self.store.get(order_id).await?;
        debug!(order_id = %order_id, saga_id = %saga.saga_id, "admission released order to proceed");
        self.notifier.notify_status_changed(order_id, order.status);
        Ok(())
    }
}
