#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **orderflow-runtime** – Composition root for the orderflow control plane.
//!
//! This crate owns the layered configuration (§4.11), wires every other
//! crate in the workspace behind one [`Runtime`], and spawns the three
//! background jobs guarded by a [`orderflow_coordination::ScheduledLeaderLock`]
//! (§4.10): the outbox relay (§4.1), the admission dequeuer (§4.7), and the
//! processed-row retention sweep.
//!
//! Grounded on the teacher's `toka-runtime::Runtime` — one struct holding
//! an `Arc` to every collaborator, a top-down `new()` constructor, and a
//! `shutdown()` that tears background tasks down deterministically — kept
//! generic over the storage backend and publish sink the same way the
//! saga and admission crates stay generic over their store type, rather
//! than boxing everything behind `dyn Trait` up front.

pub mod config;
pub mod processor;
pub mod publisher;
pub mod relay;
pub mod retention;
pub mod runtime;
pub mod store;

pub use config::{AppConfig, AppConfigError, CacheConfig, LockConfig, StoreConfig};
pub use processor::ReleaseOrderProcessor;
pub use publisher::{FlakyPublisher, InMemoryPublisher, LoggingPublisher, PublishError, Publisher};
pub use relay::{resolve_binding, OutboxRelay, RelayTickReport};
pub use retention::{RetentionReport, RetentionSweep};
pub use runtime::{test_config, Runtime, RuntimeError};
pub use store::Store;

/// Convenience glob import for downstream crates (the gateway binary in
/// particular).
pub mod prelude {
    pub use super::{
        resolve_binding, AppConfig, AppConfigError, CacheConfig, FlakyPublisher, InMemoryPublisher,
        LockConfig, LoggingPublisher, OutboxRelay, PublishError, Publisher, ReleaseOrderProcessor,
        RelayTickReport, RetentionReport, RetentionSweep, Runtime, RuntimeError, Store, StoreConfig,
    };
}
