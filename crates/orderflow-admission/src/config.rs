//! Typed, eagerly validated configuration for the admission queue (§4.11).

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Errors from [`AdmissionConfig::validate`].
#[derive(Debug, thiserror::Error)]
pub enum AdmissionConfigError {
    /// `active_threshold` of zero would make the queue active from the
    /// first accepted order onward, defeating the point of a threshold.
    #[error("admission active_threshold must be at least 1")]
    ZeroThreshold,
    /// A zero processing interval makes the estimated-wait calculation
    /// meaningless (every rank estimates to zero).
    #[error("admission processing_interval must be greater than zero")]
    ZeroProcessingInterval,
    /// A zero dequeue interval would busy-loop the scheduled dequeuer.
    #[error("admission dequeue_interval must be greater than zero")]
    ZeroDequeueInterval,
}

/// Configuration for the admission queue and its scheduled dequeuer.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AdmissionConfig {
    /// In-flight order count at or above which the queue is considered
    /// "active" even if currently empty (§4.7).
    pub active_threshold: usize,
    /// Assumed per-order processing duration, used only to compute the
    /// estimated wait reported to a caller (`rank * processing_interval`).
    #[serde(with = "duration_millis")]
    pub processing_interval: Duration,
    /// How often the scheduled dequeuer ticks.
    #[serde(with = "duration_millis")]
    pub dequeue_interval: Duration,
    /// `lockAtMostFor` passed to the dequeuer's leader lock (§4.10).
    #[serde(with = "duration_millis")]
    pub lock_at_most_for: Duration,
    /// `lockAtLeastFor` passed to the dequeuer's leader lock (§4.10).
    #[serde(with = "duration_millis")]
    pub lock_at_least_for: Duration,
}

impl Default for AdmissionConfig {
    fn default() -> Self {
        Self {
            active_threshold: 50,
            processing_interval: Duration::from_millis(200),
            dequeue_interval: Duration::from_millis(500),
            lock_at_most_for: Duration::from_secs(10),
            lock_at_least_for: Duration::ZERO,
        }
    }
}

impl AdmissionConfig {
    /// Validates the configuration, catching the degenerate cases that
    /// would otherwise surface only as a confusing runtime symptom.
    pub fn validate(&self) -> Result<(), AdmissionConfigError> {
        if self.active_threshold == 0 {
            return Err(AdmissionConfigError::ZeroThreshold);
        }
        if self.processing_interval.is_zero() {
            return Err(AdmissionConfigError::ZeroProcessingInterval);
        }
        if self.dequeue_interval.is_zero() {
            return Err(AdmissionConfigError::ZeroDequeueInterval);
        }
        Ok(())
    }
}

mod duration_millis {
    use serde::{Deserialize, Deserializer, Serializer};
    use std::time::Duration;

    pub fn serialize<S: Serializer>(d: &Duration, s: S) -> Result<S::Ok, S::Error> {
        s.serialize_u64(d.as_millis() as u64)
    }

    pub fn deserialize<'de, D: Deserializer<'de>>(d: D) -> Result<Duration, D::Error> {
        Ok(Duration::from_millis(u64::deserialize(d)?))
    }
}
