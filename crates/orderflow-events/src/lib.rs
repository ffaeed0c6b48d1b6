#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **orderflow-events** – In-process event bus and realtime notifier.
//!
//! This crate provides the fundamental event bus abstraction used across the
//! orderflow control plane. It sits below the saga and runtime layers and
//! provides lightweight, in-memory broadcasting with no persistence or
//! ordering guarantees of its own — durable, ordered delivery is the outbox
//! relay's job (§4.1), not this crate's.
//!
//! The bus abstraction allows the saga orchestrator, consumers, and the
//! Realtime Notifier (§4.8) to communicate via typed events while remaining
//! independently testable.

use std::sync::Arc;

use anyhow::Result;
use serde::{Deserialize, Serialize};
use tokio::sync::broadcast;
use uuid::Uuid;

use orderflow_types::OrderStatus;

//─────────────────────────────
//  Notification events
//─────────────────────────────

/// A realtime notification about an order's lifecycle, broadcast to anyone
/// watching `GET /orders/{id}/stream` (§6) and to any other in-process
/// subscriber (e.g. the admission dequeuer logging throughput).
///
/// `#[non_exhaustive]` leaves room for future notification kinds (e.g. rider
/// location pings) without a breaking change to subscribers.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
#[non_exhaustive]
pub enum OrderNotification {
    /// An order's status changed.
    StatusChanged {
        /// The order whose status changed.
        order_id: Uuid,
        /// The new status.
        status: OrderStatus,
    },
    /// A saga driving this order reached a terminal failure.
    SagaFailed {
        /// The order whose saga failed.
        order_id: Uuid,
        /// Human-readable failure reason.
        reason: String,
    },
}

impl OrderNotification {
    /// The order this notification concerns, used by subscribers filtering
    /// a broadcast-wide stream down to a single order (§6's SSE endpoint).
    pub fn order_id(&self) -> Uuid {
        match self {
            OrderNotification::StatusChanged { order_id, .. } => *order_id,
            OrderNotification::SagaFailed { order_id, .. } => *order_id,
        }
    }
}

//─────────────────────────────
//  Event bus trait
//─────────────────────────────

/// Core event bus abstraction for publishing and subscribing to order
/// notifications.
///
/// All implementations must be thread-safe and support multiple concurrent
/// subscribers. Delivery is fire-and-forget: a slow or absent subscriber
/// never blocks a publisher, and may simply miss events (§4.8 — realtime
/// notification is a convenience layer, not a correctness mechanism; the
/// authoritative order status is always the one read back from the store).
pub trait EventBus: Send + Sync {
    /// Publish a notification to all current subscribers.
    fn publish(&self, event: &OrderNotification) -> Result<()>;

    /// Subscribe to the live notification stream.
    ///
    /// Returns a receiver that observes notifications published after the
    /// call. A subscriber that falls behind the ring buffer receives
    /// `RecvError::Lagged` rather than silently losing events unnoticed.
    fn subscribe(&self) -> broadcast::Receiver<OrderNotification>;
}

//─────────────────────────────
//  In-memory bus implementation
//─────────────────────────────

/// Broadcast-only, in-memory event bus backed by a Tokio ring buffer.
///
/// This is the only [`EventBus`] implementation the control plane needs: the
/// bus's job is strictly "notify anyone currently listening," never
/// "guarantee delivery" — that guarantee lives in the outbox and idempotent
/// consumer layers instead.
#[derive(Debug, Clone)]
pub struct InMemoryBus {
    tx: Arc<broadcast::Sender<OrderNotification>>,
}

impl Default for InMemoryBus {
    fn default() -> Self {
        Self::new(1024)
    }
}

impl InMemoryBus {
    /// Create a new in-memory bus with the given ring buffer capacity.
    pub fn new(capacity: usize) -> Self {
        let (tx, _rx) = broadcast::channel(capacity);
        Self { tx: Arc::new(tx) }
    }

    /// Current number of active subscribers.
    pub fn subscriber_count(&self) -> usize {
        self.tx.receiver_count()
    }
}

impl EventBus for InMemoryBus {
    fn publish(&self, event: &OrderNotification) -> Result<()> {
        // A send error here only means there are currently no subscribers;
        // that is not a failure the publisher needs to see.
        let _ = self.tx.send(event.clone());
        Ok(())
    }

    fn subscribe(&self) -> broadcast::Receiver<OrderNotification> {
        self.tx.subscribe()
    }
}

//─────────────────────────────
//  Realtime notifier
//─────────────────────────────

/// Thin, named wrapper over an [`EventBus`] that gives the gateway's SSE
/// handler and the saga/consumer layers a single shared notification point
/// (§4.8), instead of every caller constructing its own bus.
#[derive(Debug, Clone)]
pub struct RealtimeNotifier {
    bus: InMemoryBus,
}

impl Default for RealtimeNotifier {
    fn default() -> Self {
        Self { bus: InMemoryBus::default() }
    }
}

impl RealtimeNotifier {
    /// Construct a notifier with the given ring buffer capacity.
    pub fn new(capacity: usize) -> Self {
        Self { bus: InMemoryBus::new(capacity) }
    }

    /// Notify subscribers that an order's status changed.
    pub fn notify_status_changed(&self, order_id: Uuid, status: OrderStatus) {
        let _ = self.bus.publish(&OrderNotification::StatusChanged { order_id, status });
    }

    /// Notify subscribers that a saga failed terminally.
    pub fn notify_saga_failed(&self, order_id: Uuid, reason: impl Into<String>) {
        let _ = self
            .bus
            .publish(&OrderNotification::SagaFailed { order_id, reason: reason.into() });
    }

    /// Subscribe to the full, unfiltered notification stream.
    pub fn subscribe(&self) -> broadcast::Receiver<OrderNotification> {
        self.bus.subscribe()
    }
}

//─────────────────────────────
//  Error types
//─────────────────────────────

/// Errors surfaced by bus operations.
#[derive(Debug, thiserror::Error)]
pub enum BusError {
    /// A publish could not be completed.
    #[error("failed to publish event: {0}")]
    PublishFailed(String),
    /// A subscription could not be established.
    #[error("failed to create subscription: {0}")]
    SubscriptionFailed(String),
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::sync::broadcast::error::RecvError;

    #[tokio::test]
    async fn basic_publish_subscribe_flow() {
        let bus = InMemoryBus::new(16);
        let mut rx = bus.subscribe();

        let order_id = Uuid::new_v4();
        let event = OrderNotification::StatusChanged { order_id, status: OrderStatus::Paid };
        bus.publish(&event).unwrap();

        let received = rx.recv().await.unwrap();
        assert_eq!(received, event);
    }

    #[tokio::test]
    async fn multiple_subscribers_all_receive() {
        let bus = InMemoryBus::new(16);
        let mut rx1 = bus.subscribe();
        let mut rx2 = bus.subscribe();
        assert_eq!(bus.subscriber_count(), 2);

        let event = OrderNotification::SagaFailed {
            order_id: Uuid::new_v4(),
            reason: "payment declined".into(),
        };
        bus.publish(&event).unwrap();

        assert_eq!(rx1.recv().await.unwrap(), event);
        assert_eq!(rx2.recv().await.unwrap(), event);
    }

    #[tokio::test]
    async fn slow_subscriber_observes_lag_not_silent_loss() {
        let bus = InMemoryBus::new(2);
        let mut rx = bus.subscribe();

        for i in 0..5 {
            bus.publish(&OrderNotification::StatusChanged {
                order_id: Uuid::new_v4(),
                status: if i % 2 == 0 { OrderStatus::Created } else { OrderStatus::Paid },
            })
            .unwrap();
        }

        match rx.recv().await {
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => {}
            Err(e) => panic!("unexpected recv error: {e}"),
        }
    }

    #[tokio::test]
    async fn realtime_notifier_filters_by_order_id() {
        let notifier = RealtimeNotifier::new(16);
        let mut rx = notifier.subscribe();
        let order_id = Uuid::new_v4();

        notifier.notify_status_changed(order_id, OrderStatus::Delivering);
        let received = rx.recv().await.unwrap();
        assert_eq!(received.order_id(), order_id);
    }
}
