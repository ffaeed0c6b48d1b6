//! Typed, eagerly-validated configuration for the resilience envelope (§4.11).

use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::bulkhead::BulkheadConfig;
use crate::circuit_breaker::CircuitBreakerConfig;
use crate::retry::RetryConfig;

/// A config value failed validation at startup.
#[derive(Debug, thiserror::Error)]
pub enum ResilienceConfigError {
    /// `bulkhead.max_concurrent` was zero.
    #[error("resilience config invalid: bulkhead.max_concurrent must be > 0")]
    BulkheadZeroConcurrency,
    /// `circuit_breaker.window_size` was zero.
    #[error("resilience config invalid: circuit_breaker.window_size must be > 0")]
    CircuitBreakerZeroWindow,
    /// `circuit_breaker.failure_rate_threshold` was outside `(0.0, 1.0]`.
    #[error("resilience config invalid: circuit_breaker.failure_rate_threshold must be in (0.0, 1.0]")]
    CircuitBreakerBadThreshold,
    /// `retry.max_attempts` was zero.
    #[error("resilience config invalid: retry.max_attempts must be > 0")]
    RetryZeroAttempts,
    /// `retry.factor` was not greater than 1.0.
    #[error("resilience config invalid: retry.factor must be > 1.0")]
    RetryBadFactor,
    /// `timeout` duration was zero.
    #[error("resilience config invalid: timeout must be > 0")]
    TimeoutZero,
}

/// Per-call-site resilience configuration: one envelope instance is built
/// from one of these and reused (it is cheap to clone).
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ResilienceConfig {
    /// Retry layer configuration (innermost).
    pub retry: RetryConfig,
    /// Circuit breaker layer configuration.
    pub circuit_breaker: CircuitBreakerConfig,
    /// Bulkhead layer configuration.
    pub bulkhead: BulkheadConfig,
    /// Per-attempt-sequence deadline (outermost layer).
    #[serde(with = "humantime_serde_duration")]
    pub timeout: Duration,
}

impl Default for ResilienceConfig {
    fn default() -> Self {
        Self {
            retry: RetryConfig::default(),
            circuit_breaker: CircuitBreakerConfig::default(),
            bulkhead: BulkheadConfig::default(),
            timeout: Duration::from_secs(5),
        }
    }
}

impl ResilienceConfig {
    /// Validates every sub-config, failing process startup loudly rather
    /// than surfacing a misconfiguration as a runtime panic later.
    pub fn validate(&self) -> Result<(), ResilienceConfigError> {
        if self.bulkhead.max_concurrent == 0 {
            return Err(ResilienceConfigError::BulkheadZeroConcurrency);
        }
        if self.circuit_breaker.window_size == 0 {
            return Err(ResilienceConfigError::CircuitBreakerZeroWindow);
        }
        if !(0.0..=1.0).contains(&self.circuit_breaker.failure_rate_threshold)
            || self.circuit_breaker.failure_rate_threshold <= 0.0
        {
            return Err(ResilienceConfigError::CircuitBreakerBadThreshold);
        }
        if self.retry.max_attempts == 0 {
            return Err(ResilienceConfigError::RetryZeroAttempts);
        }
        if self.retry.factor <= 1.0 {
            return Err(ResilienceConfigError::RetryBadFactor);
        }
        if self.timeout.is_zero() {
            return Err(ResilienceConfigError::TimeoutZero);
        }
        Ok(())
    }
}

/// `Duration` has no native serde impl for plain seconds-as-float in TOML,
/// so accept either a `{secs, nanos}` map or a float-seconds scalar.
mod humantime_serde_duration {
    use std::time::Duration;

    use serde::{Deserialize, Deserializer, Serialize, Serializer};

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        d.as_secs_f64().serialize(s)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        let secs = f64::deserialize(d)?;
        Ok(Duration::from_secs_f64(secs))
    }
}
