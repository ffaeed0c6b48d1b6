//! Delivery entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Lifecycle status of a [`Delivery`] (§3):
/// `Waiting → RiderAssigned → PickedUp → Delivering → Delivered | Cancelled`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum DeliveryStatus {
    /// Delivery created, no rider assigned yet.
    Waiting,
    /// A rider has accepted the delivery.
    RiderAssigned,
    /// The rider has picked up the order from the store.
    PickedUp,
    /// The rider is en route to the customer.
    Delivering,
    /// The customer received the order.
    Delivered,
    /// The delivery was cancelled (saga compensation or operational reason).
    Cancelled,
}

/// The Delivery aggregate, owned by the delivery domain.
///
/// `last_fencing_token` backs the guarded conditional write of §4.3: every
/// status mutation that originates from a rider-app call must present a
/// fencing token at least as large as this value.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Delivery {
    /// Unique delivery identifier.
    pub id: Uuid,
    /// Identifier of the order this delivery fulfills; unique per order.
    pub order_id: Uuid,
    /// Current lifecycle status.
    pub status: DeliveryStatus,
    /// Identifier of the assigned rider, if any.
    pub rider_id: Option<Uuid>,
    /// Estimated completion time, set once a rider is assigned.
    pub estimated_completion_at: Option<DateTime<Utc>>,
    /// Last fencing token accepted by a guarded write to this row.
    pub last_fencing_token: Option<u64>,
    /// Optimistic concurrency version.
    pub version: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Delivery {
    /// Construct a new delivery in `Waiting` status for `order_id`.
    pub fn new_waiting(order_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            status: DeliveryStatus::Waiting,
            rider_id: None,
            estimated_completion_at: None,
            last_fencing_token: None,
            version: 0,
            created_at: now,
        }
    }
}
