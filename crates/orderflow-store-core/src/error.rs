//! Storage-layer error type.

use orderflow_types::DomainError;

/// Errors a storage backend can raise.
///
/// Wraps [`DomainError`] for the cases a backend can decide on its own
/// (not-found, stale version) and adds a catch-all for genuine backend
/// failures (connection loss, constraint violation) that upper layers treat
/// opaquely.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// A domain-level error a caller should map directly to its HTTP status.
    #[error(transparent)]
    Domain(#[from] DomainError),

    /// The backend itself failed (connection, serialization, constraint).
    #[error("storage backend error: {0}")]
    Backend(#[from] anyhow::Error),
}

impl StoreError {
    /// Construct a [`StoreError::Domain(DomainError::EntityNotFound)`].
    pub fn not_found(entity: impl Into<String>, id: impl Into<String>) -> Self {
        StoreError::Domain(DomainError::EntityNotFound { entity: entity.into(), id: id.into() })
    }

    /// Construct a [`StoreError::Domain(DomainError::StaleLock)`] for an
    /// optimistic-concurrency conflict presented as a fencing mismatch.
    pub fn stale_version(resource: impl Into<String>, presented: i64, current: i64) -> Self {
        StoreError::Domain(DomainError::StaleLock {
            resource: resource.into(),
            presented: presented.max(0) as u64,
            current: current.max(0) as u64,
        })
    }
}
