//! Shared fixtures for the orderflow integration suite.
//!
//! Each test binary includes this file with `#[path = "common.rs"] mod common;`
//! since cargo integration tests do not share a crate root.

#![allow(dead_code)]

use std::sync::Arc;

use chrono::{DateTime, Utc};
use uuid::Uuid;

use orderflow_store_memory::MemoryStore;
use orderflow_types::{LineItem, Order, PaymentMethod};

/// Two line items totalling 8000 cents, matching SPEC_FULL.md §8 scenario 1.
pub fn sample_items() -> Vec<LineItem> {
    vec![
        LineItem { menu_id: Uuid::new_v4(), quantity: 1, unit_price_cents: 5000 },
        LineItem { menu_id: Uuid::new_v4(), quantity: 1, unit_price_cents: 3000 },
    ]
}

/// Builds a valid, unpersisted order for `user_id`, optionally keyed by an
/// idempotency key. Does not write anything — callers drive persistence
/// through `SagaTransactions::start_saga`, the only place an `Order` row is
/// actually inserted.
pub fn sample_order(user_id: Uuid, idempotency_key: Option<&str>, now: DateTime<Utc>) -> Order {
    Order::new(
        user_id,
        Uuid::new_v4(),
        sample_items(),
        "221B Baker St".to_string(),
        PaymentMethod::Card,
        idempotency_key.map(str::to_string),
        now,
    )
    .expect("sample order is structurally valid")
}

/// A fresh, empty in-memory store.
pub fn new_store() -> Arc<MemoryStore> {
    Arc::new(MemoryStore::new())
}

pub fn now() -> DateTime<Utc> {
    Utc::now()
}
