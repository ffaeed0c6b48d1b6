//! The composed resilience pipeline (§4.5):
//! `Timeout(Bulkhead(CircuitBreaker(Retry(call))))`, nested from the call
//! outward — Retry re-invokes the raw call, CircuitBreaker guards one
//! attempt sequence (all retries together), Bulkhead holds a single
//! concurrency slot across that whole sequence, and Timeout bounds the
//! entire thing including bulkhead wait time.

use std::future::Future;
use std::sync::Arc;

use orderflow_types::DomainError;

use crate::bulkhead::Bulkhead;
use crate::circuit_breaker::CircuitBreaker;
use crate::config::{ResilienceConfig, ResilienceConfigError};
use crate::retry::RetryPolicy;

/// A fully composed, reusable, cloneable resilience pipeline for one named
/// downstream dependency (e.g. `"store"`, `"payments"`).
#[derive(Clone)]
pub struct ResilienceEnvelope {
    name: Arc<str>,
    retry: RetryPolicy,
    circuit_breaker: CircuitBreaker,
    bulkhead: Bulkhead,
    timeout: std::time::Duration,
}

impl ResilienceEnvelope {
    /// Builds an envelope named `name`, validating `config` first so a
    /// misconfigured envelope never gets built at all.
    pub fn new(name: impl Into<Arc<str>>, config: ResilienceConfig) -> Result<Self, ResilienceConfigError> {
        config.validate()?;
        let name = name.into();
        Ok(Self {
            name: name.clone(),
            retry: RetryPolicy::new(name.clone(), config.retry),
            circuit_breaker: CircuitBreaker::new(name.clone(), config.circuit_breaker),
            bulkhead: Bulkhead::new(name.clone(), config.bulkhead),
            timeout: config.timeout,
        })
    }

    /// Runs a non-idempotent call through `Timeout(Bulkhead(CircuitBreaker(call)))`
    /// — no retry layer, since re-invoking a non-idempotent call on failure
    /// could duplicate its side effect.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce() -> Fut + Send,
        Fut: Future<Output = Result<T, DomainError>> + Send,
        T: Send,
    {
        let breaker = self.circuit_breaker.clone();
        crate::timeout::call_with_timeout(
            &self.name,
            self.timeout,
            self.bulkhead.call(|| breaker.call(f)),
        )
        .await
    }

    /// Runs an idempotent (or idempotency-keyed) call through the full
    /// `Timeout(Bulkhead(CircuitBreaker(Retry(call))))` pipeline.
    pub async fn call_idempotent<F, Fut, T>(&self, f: F) -> Result<T, DomainError>
    where
        F: Fn() -> Fut + Send + Sync,
        Fut: Future<Output = Result<T, DomainError>> + Send,
        T: Send,
    {
        let breaker = self.circuit_breaker.clone();
        let retry = self.retry.clone();
        crate::timeout::call_with_timeout(
            &self.name,
            self.timeout,
            self.bulkhead.call(|| breaker.call(|| retry.call(&f))),
        )
        .await
    }
}
