//! Command/reply event envelopes that cross the outbox (§4.1, §4.6, §6).
//!
//! `CommandEvent` is what the saga orchestrator writes to the outbox;
//! `ReplyEvent` is what the payment/delivery consumers write back. Both are
//! plain serializable payloads — the outbox and broker layers treat them as
//! opaque JSON, these types exist so the saga and consumer crates share one
//! wire shape instead of each inventing their own.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Which payment operation a [`CommandEvent`] requests.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum PaymentCommandKind {
    /// Charge the customer for the order.
    Process,
    /// Refund a previously completed charge (saga compensation).
    Compensate,
}

/// A command written to the outbox by the saga orchestrator, addressed to
/// the payment or delivery consumer.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "SCREAMING_SNAKE_CASE")]
pub enum CommandEvent {
    /// Request the payment consumer to process or compensate a charge.
    Payment {
        /// Correlating saga identifier.
        saga_id: Uuid,
        /// Order this command is for.
        order_id: Uuid,
        /// Amount to charge or refund, in minor units.
        amount_cents: i64,
        /// Which payment operation to perform.
        kind: PaymentCommandKind,
    },
    /// Request the delivery consumer to start delivery for a paid order.
    Delivery {
        /// Correlating saga identifier.
        saga_id: Uuid,
        /// Order this command is for.
        order_id: Uuid,
    },
}

/// Which step a [`ReplyEvent`] is replying to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum ReplyStep {
    /// Reply to a `Payment { kind: Process }` command.
    Payment,
    /// Reply to a `Delivery` command.
    Delivery,
    /// Reply to a `Payment { kind: Compensate }` command.
    PaymentCompensate,
}

/// A reply written to the outbox by the payment or delivery consumer,
/// addressed back to the saga orchestrator.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ReplyEvent {
    /// Correlating saga identifier; the orchestrator looks up the saga by this.
    pub saga_id: Uuid,
    /// Which step this reply answers.
    pub step: ReplyStep,
    /// Whether the requested operation succeeded.
    pub success: bool,
    /// Failure reason, set when `success` is `false`.
    pub failure_reason: Option<String>,
}

impl ReplyEvent {
    /// Construct a successful reply for `step`.
    pub fn success(saga_id: Uuid, step: ReplyStep) -> Self {
        Self { saga_id, step, success: true, failure_reason: None }
    }

    /// Construct a failure reply for `step` with `reason`.
    pub fn failure(saga_id: Uuid, step: ReplyStep, reason: impl Into<String>) -> Self {
        Self { saga_id, step, success: false, failure_reason: Some(reason.into()) }
    }
}
