#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **orderflow-types** – Shared domain types for the orderflow control plane.
//!
//! This crate is dependency-light and sits at the bottom of the crate graph so
//! that every other crate can depend on it without causing cycles. It defines
//! the entities of the data model (§3), the saga transition matrix (§4.6), the
//! command/reply event envelopes that cross the outbox (§4.1/§6), and the
//! error taxonomy that every layer above maps into (§7).
//!
//! It intentionally makes no assumptions about storage engines, brokers, or
//! HTTP frameworks.

//─────────────────────────────
//  Size constants
//─────────────────────────────

/// Maximum number of line items accepted on a single order.
pub const MAX_ORDER_LINE_ITEMS: usize = 100;

/// Maximum length of a free-form failure reason string.
pub const MAX_FAILURE_REASON_LEN: usize = 1024;

pub mod order;
pub mod payment;
pub mod delivery;
pub mod saga;
pub mod outbox;
pub mod events;
pub mod error;

pub use order::{LineItem, Order, OrderStatus};
pub use payment::{Payment, PaymentMethod, PaymentStatus};
pub use delivery::{Delivery, DeliveryStatus};
pub use saga::{SagaState, SagaStatus, SagaStep};
pub use outbox::{OutboxRecord, ProcessedEvent};
pub use events::{CommandEvent, PaymentCommandKind, ReplyEvent, ReplyStep};
pub use error::DomainError;
