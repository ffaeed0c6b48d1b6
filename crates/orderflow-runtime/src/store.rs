//! The combined storage bound the composition root wires everything
//! against (§3, §4.1-§4.4, §4.6).
//!
//! Every concrete backend (`orderflow-store-memory::MemoryStore`,
//! `orderflow-store-postgres::PostgresStore`) already implements each of
//! these traits individually; this is just the one bound [`Runtime`] and
//! the components it wires (`SagaOrchestrator<S>`, `AdmissionDequeuer<S,
//! _>`) need to stay generic over "whichever backend the deployment
//! picked" without naming it nine times.

use orderflow_store_core::{
    DeliveryRepository, FencingCounterStore, IdempotencyLedger, LockLeaseStore, OrderRepository,
    OutboxStore, PaymentRepository, SagaRepository, SagaTransactions,
};

/// A storage backend satisfying every trait the control plane needs.
pub trait Store:
    OutboxStore
    + IdempotencyLedger
    + FencingCounterStore
    + LockLeaseStore
    + OrderRepository
    + PaymentRepository
    + DeliveryRepository
    + SagaRepository
    + SagaTransactions
{
}

impl<T> Store for T where
    T: OutboxStore
        + IdempotencyLedger
        + FencingCounterStore
        + LockLeaseStore
        + OrderRepository
        + PaymentRepository
        + DeliveryRepository
        + SagaRepository
        + SagaTransactions
{
}
