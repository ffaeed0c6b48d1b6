//! Payment entity.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Payment method captured at order time.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentMethod {
    /// Card payment.
    Card,
    /// Stored-value wallet.
    Wallet,
    /// Cash on delivery.
    Cash,
}

/// Lifecycle status of a [`Payment`] (§3): `Pending → Completed | Failed`,
/// `Completed → Refunded`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentStatus {
    /// Payment requested, awaiting gateway result.
    Pending,
    /// Payment gateway confirmed the charge.
    Completed,
    /// Payment gateway rejected the charge.
    Failed,
    /// A completed payment was later refunded by saga compensation.
    Refunded,
}

impl PaymentStatus {
    /// Validate a proposed transition against the matrix in §3.
    pub fn can_transition_to(self, next: PaymentStatus) -> bool {
        use PaymentStatus::*;
        matches!(
            (self, next),
            (Pending, Completed) | (Pending, Failed) | (Completed, Refunded)
        )
    }
}

/// The Payment aggregate, owned by the payment domain.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Payment {
    /// Unique payment identifier.
    pub id: Uuid,
    /// Identifier of the order this payment belongs to; unique per order.
    pub order_id: Uuid,
    /// Amount charged, in minor units.
    pub amount_cents: i64,
    /// Payment method used.
    pub method: PaymentMethod,
    /// Current lifecycle status.
    pub status: PaymentStatus,
    /// Caller-supplied idempotency key, unique when present.
    pub idempotency_key: Option<String>,
    /// Optimistic concurrency version.
    pub version: i64,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
}

impl Payment {
    /// Construct a new pending payment for `order_id`.
    pub fn new_pending(
        order_id: Uuid,
        amount_cents: i64,
        method: PaymentMethod,
        idempotency_key: Option<String>,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            order_id,
            amount_cents,
            method,
            status: PaymentStatus::Pending,
            idempotency_key,
            version: 0,
            created_at: now,
        }
    }

    /// Apply a validated status transition, bumping the optimistic version.
    ///
    /// Returns [`crate::DomainError::InvalidStateTransition`] if the
    /// transition is not allowed from the current status.
    pub fn transition(&mut self, next: PaymentStatus) -> Result<(), crate::DomainError> {
        if !self.status.can_transition_to(next) {
            return Err(crate::DomainError::InvalidStateTransition {
                from: format!("{:?}", self.status),
                to: format!("{:?}", next),
            });
        }
        self.status = next;
        self.version += 1;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn pending_to_completed_is_allowed() {
        let mut p = Payment::new_pending(Uuid::new_v4(), 8000, PaymentMethod::Card, None, Utc::now());
        p.transition(PaymentStatus::Completed).unwrap();
        assert_eq!(p.status, PaymentStatus::Completed);
        assert_eq!(p.version, 1);
    }

    #[test]
    fn completed_to_pending_is_rejected() {
        let mut p = Payment::new_pending(Uuid::new_v4(), 8000, PaymentMethod::Card, None, Utc::now());
        p.transition(PaymentStatus::Completed).unwrap();
        let err = p.transition(PaymentStatus::Pending).unwrap_err();
        assert!(matches!(err, crate::DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn completed_to_refunded_is_allowed() {
        let mut p = Payment::new_pending(Uuid::new_v4(), 8000, PaymentMethod::Card, None, Utc::now());
        p.transition(PaymentStatus::Completed).unwrap();
        p.transition(PaymentStatus::Refunded).unwrap();
        assert_eq!(p.status, PaymentStatus::Refunded);
    }
}
