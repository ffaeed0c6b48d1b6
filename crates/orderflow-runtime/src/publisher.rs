//! Broker-agnostic publish abstraction for the outbox relay (§4.1
//! supplemental, §1's broker-agnostic non-goal, §6).
//!
//! The relay never speaks a wire protocol directly — it calls
//! [`Publisher::publish`] with a logical binding name, the aggregate id as
//! partition key, and the already-serialized payload. Swapping brokers
//! (or, in tests, swapping in [`InMemoryPublisher`]) never touches
//! [`crate::relay::OutboxRelay`].

use std::sync::Arc;
use tokio::sync::Mutex;

use async_trait::async_trait;
use serde_json::Value;
use uuid::Uuid;

/// A publish attempt failed. The relay treats every variant the same way
/// (break the tick, retry next time) — this type exists for logging, not
/// branching.
#[derive(Debug, thiserror::Error)]
pub enum PublishError {
    /// The broker connection or transport failed.
    #[error("publish to binding {binding} failed: {reason}")]
    Transport {
        /// Logical binding name the publish targeted.
        binding: String,
        /// Human-readable failure detail.
        reason: String,
    },
}

/// Publishes one already-serialized event to a logical broker binding,
/// keyed by the owning aggregate's id so the broker preserves per-aggregate
/// ordering on its partitions (§5 "Ordering guarantees").
#[async_trait]
pub trait Publisher: Send + Sync {
    /// Publish `payload` to `binding`, partitioned by `key`.
    async fn publish(&self, binding: &str, key: Uuid, payload: &Value) -> Result<(), PublishError>;
}

/// A `Publisher` that only logs. Used when no broker is configured yet
/// (e.g. local development, or the relay ticking before a broker client
/// is wired in) — publishing always "succeeds", which is appropriate for a
/// no-op sink but would silently drop events against a real broker, so it
/// must never be the default for a StoreConfig::Postgres deployment.
#[derive(Debug, Clone, Default)]
pub struct LoggingPublisher;

#[async_trait]
impl Publisher for LoggingPublisher {
    async fn publish(&self, binding: &str, key: Uuid, payload: &Value) -> Result<(), PublishError> {
        tracing::info!(binding, %key, payload = %payload, "publish (logging sink)");
        Ok(())
    }
}

/// An in-memory `Publisher` that records every call, for relay tests that
/// need to assert on publish order and binding routing without a broker.
#[derive(Debug, Clone, Default)]
pub struct InMemoryPublisher {
    published: Arc<Mutex<Vec<(String, Uuid, Value)>>>,
}

impl InMemoryPublisher {
    /// Builds an empty recorder.
    pub fn new() -> Self {
        Self::default()
    }

    /// Returns every `(binding, key, payload)` published so far, in call order.
    pub async fn published(&self) -> Vec<(String, Uuid, Value)> {
        self.published.lock().await.clone()
    }
}

#[async_trait]
impl Publisher for InMemoryPublisher {
    async fn publish(&self, binding: &str, key: Uuid, payload: &Value) -> Result<(), PublishError> {
        self.published.lock().await.push((binding.to_string(), key, payload.clone()));
        Ok(())
    }
}

/// An `InMemoryPublisher` variant that fails every call whose binding is in
/// a configured deny-set, for testing the relay's break-on-first-failure
/// semantics (§4.1).
#[derive(Clone, Default)]
pub struct FlakyPublisher {
    inner: InMemoryPublisher,
    fail_bindings: Arc<Mutex<std::collections::HashSet<String>>>,
}

impl FlakyPublisher {
    /// Builds a publisher that fails every publish to any binding in `fail_bindings`.
    pub fn new(fail_bindings: impl IntoIterator<Item = String>) -> Self {
        Self {
            inner: InMemoryPublisher::new(),
            fail_bindings: Arc::new(Mutex::new(fail_bindings.into_iter().collect())),
        }
    }

    /// Returns every successfully published `(binding, key, payload)`.
    pub async fn published(&self) -> Vec<(String, Uuid, Value)> {
        self.inner.published().await
    }

    /// Stops failing `binding` from the next call onward.
    pub async fn allow(&self, binding: &str) {
        self.fail_bindings.lock().await.remove(binding);
    }
}

#[async_trait]
impl Publisher for FlakyPublisher {
    async fn publish(&self, binding: &str, key: Uuid, payload: &Value) -> Result<(), PublishError> {
        if self.fail_bindings.lock().await.contains(binding) {
            return Err(PublishError::Transport {
                binding: binding.to_string(),
                reason: "simulated broker outage".to_string(),
            });
        }
        self.inner.publish(binding, key, payload).await
    }
}
