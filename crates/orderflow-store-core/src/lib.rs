#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **orderflow-store-core** – Storage trait abstractions for the orderflow
//! control plane.
//!
//! This crate defines the contracts every storage driver must satisfy; it
//! ships no concrete backend. `orderflow-store-memory` and
//! `orderflow-store-postgres` depend on it and provide the actual
//! implementations, the same separation the teacher draws between its
//! storage-core crate and its sled/sqlite drivers.
//!
//! Five families of trait live here:
//! - [`outbox::OutboxStore`] — the transactional outbox (§4.1).
//! - [`idempotency::IdempotencyLedger`] — the processed-event ledger (§4.2).
//! - [`fencing::FencingCounterStore`] — the fencing-token counter (§4.3).
//! - [`lock::LockLeaseStore`] — the advisory lease lock (§4.4, §4.10).
//! - [`repository`] — per-aggregate CRUD plus the saga's four atomic
//!   transactional entry points (§4.6).

pub mod error;
pub mod fencing;
pub mod idempotency;
pub mod lock;
pub mod outbox;
pub mod repository;

pub use error::StoreError;
pub use fencing::FencingCounterStore;
pub use idempotency::IdempotencyLedger;
pub use lock::LockLeaseStore;
pub use outbox::OutboxStore;
pub use repository::{
    Applied, DeliveryRepository, OrderRepository, PaymentRepository, SagaRepository,
    SagaTransactions,
};

/// Convenience glob import for downstream crates.
pub mod prelude {
    pub use super::{
        Applied, DeliveryRepository, FencingCounterStore, IdempotencyLedger, LockLeaseStore,
        OrderRepository, OutboxStore, PaymentRepository, SagaRepository, SagaTransactions,
        StoreError,
    };
}
