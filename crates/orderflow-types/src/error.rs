//! Shared error taxonomy (§7).
//!
//! Every layer above this crate maps its own errors into a [`DomainError`]
//! (or wraps one) before it crosses a crate boundary, so that the gateway's
//! problem-details mapping (§4.12) has exactly one enum to match on.

use thiserror::Error;

/// The domain-level error taxonomy shared by every crate in the workspace.
///
/// The doc comment on each variant carries the HTTP status the gateway maps
/// it to (§4.12); this crate itself has no HTTP dependency.
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum DomainError {
    /// 400 — the request failed structural or semantic validation.
    #[error("invalid input: {0}")]
    InvalidInput(String),

    /// 404 — the referenced entity does not exist.
    #[error("{entity} {id} not found")]
    EntityNotFound {
        /// Entity type name, e.g. `"order"`.
        entity: String,
        /// Entity identifier as rendered text.
        id: String,
    },

    /// 400 — a state machine rejected the requested transition.
    #[error("cannot transition from {from} to {to}")]
    InvalidStateTransition {
        /// Source state, rendered as debug text.
        from: String,
        /// Rejected target state, rendered as debug text.
        to: String,
    },

    /// 409 — a request with this idempotency key was already processed.
    #[error("duplicate request for idempotency key {0}")]
    DuplicateRequest(String),

    /// 409 — a conditional write lost a fencing-token race.
    #[error("stale fencing token on resource {resource}: presented {presented}, current {current}")]
    StaleLock {
        /// Resource key the conditional write targeted.
        resource: String,
        /// Token the caller presented.
        presented: u64,
        /// Token currently recorded for the resource.
        current: u64,
    },

    /// 429 — the caller exceeded its rate limit.
    #[error("rate limit exceeded for {0}")]
    RateLimitExceeded(String),

    /// 503 — a bulkhead's concurrent-call budget is exhausted.
    #[error("bulkhead {0} is full")]
    BulkheadFull(String),

    /// 503 — a circuit breaker is open and rejecting calls.
    #[error("circuit breaker {0} is open")]
    CircuitBreakerOpen(String),

    /// 503 — a downstream dependency is unavailable after retries.
    #[error("service unavailable: {0}")]
    ServiceUnavailable(String),

    /// 504 — a call exceeded its timeout budget.
    #[error("request timed out: {0}")]
    RequestTimeout(String),
}

impl DomainError {
    /// Stable machine-readable error code, used as the `code` field of the
    /// gateway's problem-details body (§4.12) and for log correlation.
    pub fn code(&self) -> &'static str {
        match self {
            DomainError::InvalidInput(_) => "INVALID_INPUT",
            DomainError::EntityNotFound { .. } => "ENTITY_NOT_FOUND",
            DomainError::InvalidStateTransition { .. } => "INVALID_STATE_TRANSITION",
            DomainError::DuplicateRequest(_) => "DUPLICATE_REQUEST",
            DomainError::StaleLock { .. } => "STALE_LOCK",
            DomainError::RateLimitExceeded(_) => "RATE_LIMIT_EXCEEDED",
            DomainError::BulkheadFull(_) => "BULKHEAD_FULL",
            DomainError::CircuitBreakerOpen(_) => "CIRCUIT_BREAKER_OPEN",
            DomainError::ServiceUnavailable(_) => "SERVICE_UNAVAILABLE",
            DomainError::RequestTimeout(_) => "REQUEST_TIMEOUT",
        }
    }

    /// The HTTP status code this error maps to at the gateway boundary.
    pub fn http_status(&self) -> u16 {
        match self {
            DomainError::InvalidInput(_) => 400,
            DomainError::InvalidStateTransition { .. } => 400,
            DomainError::EntityNotFound { .. } => 404,
            DomainError::DuplicateRequest(_) => 409,
            DomainError::StaleLock { .. } => 409,
            DomainError::RateLimitExceeded(_) => 429,
            DomainError::BulkheadFull(_) => 503,
            DomainError::CircuitBreakerOpen(_) => 503,
            DomainError::ServiceUnavailable(_) => 503,
            DomainError::RequestTimeout(_) => 504,
        }
    }
}
