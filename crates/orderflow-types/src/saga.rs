//! Saga state machine types (§4.6).

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::MAX_FAILURE_REASON_LEN;

/// Coarse saga status, orthogonal to [`SagaStep`].
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStatus {
    /// Saga started, in its forward path.
    Started,
    /// Saga is unwinding via a compensating transaction.
    Compensating,
    /// Saga reached its successful terminal state.
    Completed,
    /// Saga reached a terminal failure state.
    Failed,
}

/// Fine-grained saga step (§4.6 transition matrix).
///
/// ```text
/// PAYMENT_PENDING      → {PAYMENT_COMPLETED, FAILED}
/// PAYMENT_COMPLETED    → {DELIVERY_PENDING}
/// DELIVERY_PENDING     → {COMPLETED, COMPENSATING_PAYMENT}
/// COMPENSATING_PAYMENT → {FAILED}
/// COMPLETED, FAILED    → {}  (terminal)
/// ```
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum SagaStep {
    /// Payment command emitted, awaiting reply.
    PaymentPending,
    /// Payment reply processed successfully.
    PaymentCompleted,
    /// Delivery command emitted, awaiting reply.
    DeliveryPending,
    /// Delivery failed; a compensating payment command was emitted.
    CompensatingPayment,
    /// Saga finished successfully.
    Completed,
    /// Saga finished in failure (with or without compensation).
    Failed,
}

impl SagaStep {
    /// The set of steps this step may legally transition to.
    ///
    /// Implemented as a direct table rather than a generic graph structure —
    /// the matrix is small, fixed, and the point of this function is that an
    /// illegal transition is a compile-time-obvious `false`, not a lookup
    /// that can silently fall through.
    pub fn allowed_next(self) -> &'static [SagaStep] {
        use SagaStep::*;
        match self {
            PaymentPending => &[PaymentCompleted, Failed],
            PaymentCompleted => &[DeliveryPending],
            DeliveryPending => &[Completed, CompensatingPayment],
            CompensatingPayment => &[Failed],
            Completed | Failed => &[],
        }
    }

    /// Whether `next` is a legal transition target from `self`.
    pub fn can_transition_to(self, next: SagaStep) -> bool {
        self.allowed_next().contains(&next)
    }

    /// Whether this step accepts no further transition.
    pub fn is_terminal(self) -> bool {
        self.allowed_next().is_empty()
    }
}

/// The SagaState aggregate (§3), owned exclusively by the orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SagaState {
    /// Externally generated saga identifier (correlates commands and replies).
    pub saga_id: Uuid,
    /// Saga type tag, e.g. `"order-fulfillment"`. Reserved for multi-saga-type deployments.
    pub saga_type: String,
    /// Identifier of the order this saga drives.
    pub order_id: Uuid,
    /// Coarse status.
    pub status: SagaStatus,
    /// Fine-grained step.
    pub step: SagaStep,
    /// Failure reason, set once the saga enters a failure path.
    pub failure_reason: Option<String>,
    /// Creation timestamp.
    pub created_at: DateTime<Utc>,
    /// Last-update timestamp.
    pub updated_at: DateTime<Utc>,
}

impl SagaState {
    /// Start a new saga in `Started`/`PaymentPending`.
    pub fn start(order_id: Uuid, saga_id: Uuid, now: DateTime<Utc>) -> Self {
        Self {
            saga_id,
            saga_type: "order-fulfillment".to_string(),
            order_id,
            status: SagaStatus::Started,
            step: SagaStep::PaymentPending,
            failure_reason: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Attempt to advance to `next_step`, validating against the transition
    /// matrix and updating `status`/`updated_at` accordingly.
    ///
    /// `status` is derived from `next_step`: `Completed`/`Failed` map
    /// directly, `CompensatingPayment` maps to `Compensating`, everything
    /// else stays `Started`.
    pub fn advance(
        &mut self,
        next_step: SagaStep,
        failure_reason: Option<String>,
        now: DateTime<Utc>,
    ) -> Result<(), crate::DomainError> {
        if !self.step.can_transition_to(next_step) {
            return Err(crate::DomainError::InvalidStateTransition {
                from: format!("{:?}", self.step),
                to: format!("{:?}", next_step),
            });
        }
        if let Some(reason) = &failure_reason {
            if reason.len() > MAX_FAILURE_REASON_LEN {
                return Err(crate::DomainError::InvalidInput(
                    "failure reason exceeds maximum length".into(),
                ));
            }
        }

        self.status = match next_step {
            SagaStep::Completed => SagaStatus::Completed,
            SagaStep::Failed => SagaStatus::Failed,
            SagaStep::CompensatingPayment => SagaStatus::Compensating,
            _ => SagaStatus::Started,
        };
        self.step = next_step;
        self.failure_reason = failure_reason.or_else(|| self.failure_reason.clone());
        self.updated_at = now;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn happy_path_sequence_is_legal() {
        let mut saga = SagaState::start(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        saga.advance(SagaStep::PaymentCompleted, None, Utc::now()).unwrap();
        saga.advance(SagaStep::DeliveryPending, None, Utc::now()).unwrap();
        saga.advance(SagaStep::Completed, None, Utc::now()).unwrap();
        assert_eq!(saga.status, SagaStatus::Completed);
        assert!(saga.step.is_terminal());
    }

    #[test]
    fn compensation_path_is_legal() {
        let mut saga = SagaState::start(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        saga.advance(SagaStep::PaymentCompleted, None, Utc::now()).unwrap();
        saga.advance(SagaStep::DeliveryPending, None, Utc::now()).unwrap();
        saga.advance(SagaStep::CompensatingPayment, Some("delivery failed".into()), Utc::now())
            .unwrap();
        saga.advance(SagaStep::Failed, None, Utc::now()).unwrap();
        assert_eq!(saga.status, SagaStatus::Failed);
        assert_eq!(saga.failure_reason.as_deref(), Some("delivery failed"));
    }

    #[test]
    fn skipping_a_step_is_rejected() {
        let mut saga = SagaState::start(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        let err = saga.advance(SagaStep::DeliveryPending, None, Utc::now()).unwrap_err();
        assert!(matches!(err, crate::DomainError::InvalidStateTransition { .. }));
    }

    #[test]
    fn terminal_states_accept_nothing() {
        let mut saga = SagaState::start(Uuid::new_v4(), Uuid::new_v4(), Utc::now());
        saga.advance(SagaStep::Failed, Some("payment declined".into()), Utc::now())
            .unwrap();
        let err = saga.advance(SagaStep::PaymentCompleted, None, Utc::now()).unwrap_err();
        assert!(matches!(err, crate::DomainError::InvalidStateTransition { .. }));
    }
}
