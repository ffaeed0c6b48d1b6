//! Exponential-backoff retry (§4.5), applied only to idempotent or
//! idempotency-keyed calls — callers opt in explicitly via
//! [`crate::envelope::ResilienceEnvelope::call_idempotent`].

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use orderflow_types::DomainError;
use serde::{Deserialize, Serialize};
use tracing::debug;

/// Tuning for a single [`RetryPolicy`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RetryConfig {
    /// Total attempts, including the first (non-retry) one.
    pub max_attempts: u32,
    /// Delay before the first retry.
    #[serde(with = "duration_millis")]
    pub base_delay: Duration,
    /// Multiplier applied to the delay after every retry.
    pub factor: f64,
}

impl Default for RetryConfig {
    fn default() -> Self {
        Self { max_attempts: 3, base_delay: Duration::from_millis(500), factor: 2.0 }
    }
}

/// A named retry policy. Cheap to clone.
#[derive(Clone)]
pub struct RetryPolicy {
    name: Arc<str>,
    config: RetryConfig,
}

impl RetryPolicy {
    /// Builds a retry policy named `name` (used in logs).
    pub fn new(name: impl Into<Arc<str>>, config: RetryConfig) -> Self {
        Self { name: name.into(), config }
    }

    /// Invokes `f` up to `max_attempts` times, backing off exponentially
    /// between attempts. `f` must be safely re-invocable — the caller is
    /// responsible for ensuring the wrapped call is idempotent.
    pub async fn call<F, Fut, T>(&self, f: &F) -> Result<T, DomainError>
    where
        F: Fn() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let mut attempt = 0u32;
        loop {
            attempt += 1;
            match f().await {
                Ok(value) => return Ok(value),
                Err(err) if attempt >= self.config.max_attempts => return Err(err),
                Err(err) => {
                    let delay = self
                        .config
                        .base_delay
                        .mul_f64(self.config.factor.powi(attempt as i32 - 1));
                    debug!(
                        retry = %self.name,
                        attempt,
                        max_attempts = self.config.max_attempts,
                        error = %err,
                        delay_ms = delay.as_millis() as u64,
                        "retrying after failure"
                    );
                    tokio::time::sleep(delay).await;
                }
            }
        }
    }
}

mod duration_millis {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        (d.as_millis() as u64).serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
