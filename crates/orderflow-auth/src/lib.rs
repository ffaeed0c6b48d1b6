#![forbid(unsafe_code)]
#![deny(missing_docs)]

//! **orderflow-auth** – Trusted caller-identity extraction for internal services.
//!
//! Bearer-token verification and JWT issuance happen once, at the edge
//! gateway, which is explicitly out of scope for this workspace (§6 "Auth
//! contract"). Every service behind the edge trusts a single propagated
//! header instead of re-verifying a token on every hop. This crate defines
//! that trust boundary as a pluggable trait, the same way the rest of the
//! workspace keeps its seams behind a trait rather than a concrete type.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use thiserror::Error;
use uuid::Uuid;

/// Name of the header the edge gateway is required to set.
pub const TRUSTED_USER_HEADER: &str = "x-user-id";

/// The authenticated caller, as trusted from the edge-propagated header.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CallerIdentity {
    /// The user identifier the edge gateway vouched for.
    pub user_id: Uuid,
}

/// Errors raised while establishing a [`CallerIdentity`].
#[derive(Debug, Error, Clone, PartialEq, Eq)]
pub enum AuthError {
    /// The trusted header was absent entirely.
    #[error("missing {TRUSTED_USER_HEADER} header")]
    MissingIdentity,
    /// The header was present but not a well-formed user id.
    #[error("malformed caller identity: {0}")]
    Malformed(String),
}

/// Validates a raw header value into a [`CallerIdentity`].
///
/// Kept as a trait — rather than a free function — so integration tests and
/// the gateway's request-scoped extractor can swap in a fixed identity
/// without going through real header parsing.
#[async_trait]
pub trait IdentityValidator: Send + Sync {
    /// Validate `raw` (the verbatim header value) and return the identity it
    /// encodes.
    async fn validate(&self, raw: &str) -> Result<CallerIdentity, AuthError>;
}

/// The only [`IdentityValidator`] this workspace ships: the header is
/// trusted as-is because the edge gateway already verified the bearer token
/// before setting it (§6). Downstream services parse, they do not
/// re-authenticate.
#[derive(Debug, Clone, Copy, Default)]
pub struct TrustedHeaderValidator;

#[async_trait]
impl IdentityValidator for TrustedHeaderValidator {
    async fn validate(&self, raw: &str) -> Result<CallerIdentity, AuthError> {
        if raw.trim().is_empty() {
            return Err(AuthError::MissingIdentity);
        }
        let user_id = Uuid::parse_str(raw.trim())
            .map_err(|e| AuthError::Malformed(e.to_string()))?;
        Ok(CallerIdentity { user_id })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn valid_uuid_header_is_accepted() {
        let validator = TrustedHeaderValidator;
        let id = Uuid::new_v4();
        let identity = validator.validate(&id.to_string()).await.unwrap();
        assert_eq!(identity.user_id, id);
    }

    #[tokio::test]
    async fn empty_header_is_rejected() {
        let validator = TrustedHeaderValidator;
        let err = validator.validate("").await.unwrap_err();
        assert_eq!(err, AuthError::MissingIdentity);
    }

    #[tokio::test]
    async fn non_uuid_header_is_rejected() {
        let validator = TrustedHeaderValidator;
        let err = validator.validate("not-a-uuid").await.unwrap_err();
        assert!(matches!(err, AuthError::Malformed(_)));
    }
}
