//! Order entity and line items.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MAX_ORDER_LINE_ITEMS;

/// Lifecycle status of an [`Order`].
///
/// Transitions are driven by the saga orchestrator (§4.6), never set
/// directly by a request handler except for the user-initiated cancel path.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum OrderStatus {
    /// Order accepted, saga not yet started (admission queue only).
    Created,
    /// Saga started, payment command written to the outbox.
    PaymentPending,
    /// Payment confirmed.
    Paid,
    /// Store is preparing the order (reserved for future use by store service).
    Preparing,
    /// Delivery in progress.
    Delivering,
    /// Delivery confirmed complete.
    Delivered,
    /// Order cancelled, either by compensation or by the user.
    Cancelled,
}

impl OrderStatus {
    /// Terminal statuses accept no further saga-driven transition.
    pub fn is_terminal(self) -> bool {
        matches!(self, OrderStatus::Delivered | OrderStatus::Cancelled)
    }
}

/// A single ordered menu line, with the price captured at order time.
///
/// Capturing `unit_price_cents` here breaks the temporal coupling to the
/// store's menu: if the store later changes the price, this order's total
/// remains correct (§9 "cyclic or deeply-referenced data").
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LineItem {
    /// Identifier of the menu item, owned by the store domain.
    pub menu_id: Uuid,
    /// Quantity ordered; must be at least 1.
    pub quantity: u32,
    /// Price per unit, captured at order-creation time, in minor units (cents).
    pub unit_price_cents: i64,
}

impl LineItem {
    /// Line subtotal in minor units.
    pub fn subtotal_cents(&self) -> i64 {
        self.unit_price_cents * self.quantity as i64
    }
}

/// The Order aggregate (§3).
///
/// Owns its line items; references `user_id` and `store_id` by identifier
/// only — there are no cross-service foreign keys.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Order {
    /// Unique order identifier.
    pub id: Uuid,
    /// Identifier of the ordering user, owned by an external domain.
    pub user_id: Uuid,
    /// Identifier of the store, owned by an external domain.
    pub store_id: Uuid,
    /// Ordered line items; non-empty, bounded by [`MAX_ORDER_LINE_ITEMS`].
    pub items: Vec<LineItem>,
    /// Total amount in minor units; always equal to the sum of line subtotals.
    pub total_cents: i64,
    /// Current lifecycle status.
    pub status: OrderStatus,
    /// Free-form delivery address.
    pub delivery_address: String,
    /// Payment method chosen at order time.
    pub payment_method: crate::PaymentMethod,
    /// Caller-supplied `Idempotency-Key` header value, if any; unique across
    /// orders when present (§6, §7 `DuplicateRequest`).
    pub idempotency_key: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Optimistic concurrency version; incremented on every write.
    pub version: i64,
}

impl Order {
    /// Construct a new order in `Created` status, validating structural
    /// invariants and recomputing the total from line items.
    pub fn new(
        user_id: Uuid,
        store_id: Uuid,
        items: Vec<LineItem>,
        delivery_address: String,
        payment_method: crate::PaymentMethod,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<Self, crate::DomainError> {
        if items.is_empty() {
            return Err(crate::DomainError::InvalidInput(
                "order must contain at least one line item".into(),
            ));
        }
        if items.len() > MAX_ORDER_LINE_ITEMS {
            return Err(crate::DomainError::InvalidInput(format!(
                "order exceeds maximum of {MAX_ORDER_LINE_ITEMS} line items"
            )));
        }
        if items.iter().any(|i| i.quantity == 0) {
            return Err(crate::DomainError::InvalidInput(
                "line item quantity must be at least 1".into(),
            ));
        }
        if delivery_address.trim().is_empty() {
            return Err(crate::DomainError::InvalidInput(
                "delivery address cannot be empty".into(),
            ));
        }

        let total_cents = items.iter().map(LineItem::subtotal_cents).sum();

        Ok(Self {
            id: Uuid::new_v4(),
            user_id,
            store_id,
            items,
            total_cents,
            status: OrderStatus::Created,
            delivery_address,
            payment_method,
            idempotency_key,
            created_at: now,
            version: 0,
        })
    }

    /// Apply a saga-driven status transition, bumping the optimistic version.
    pub fn set_status(&mut self, status: OrderStatus) {
        self.status = status;
        self.version += 1;
    }

    /// Whether the user is still allowed to cancel this order directly.
    pub fn is_user_cancellable(&self) -> bool {
        matches!(
            self.status,
            OrderStatus::Created | OrderStatus::PaymentPending
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn item(price: i64, qty: u32) -> LineItem {
        LineItem {
            menu_id: Uuid::new_v4(),
            quantity: qty,
            unit_price_cents: price,
        }
    }

    #[test]
    fn total_is_sum_of_line_subtotals() {
        let order = Order::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![item(5000, 1), item(3000, 1)],
            "A1".into(),
            crate::PaymentMethod::Card,
            None,
            Utc::now(),
        )
        .unwrap();
        assert_eq!(order.total_cents, 8000);
        assert_eq!(order.status, OrderStatus::Created);
    }

    #[test]
    fn rejects_empty_items() {
        let err = Order::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![],
            "A1".into(),
            crate::PaymentMethod::Card,
            None,
            Utc::now(),
        )
        .unwrap_err();
        assert!(matches!(err, crate::DomainError::InvalidInput(_)));
    }

    #[test]
    fn cancellable_only_before_payment_completes() {
        let mut order = Order::new(
            Uuid::new_v4(),
            Uuid::new_v4(),
            vec![item(1000, 1)],
            "A1".into(),
            crate::PaymentMethod::Card,
            None,
            Utc::now(),
        )
        .unwrap();
        assert!(order.is_user_cancellable());
        order.set_status(OrderStatus::Paid);
        assert!(!order.is_user_cancellable());
    }
}
