//! Problem-details error mapping (§4.12, §6, §7): every handler error
//! collapses to one [`DomainError`], which this module renders as
//! `{type, status, detail}` JSON with the matching HTTP status.

use axum::http::StatusCode;
use axum::response::{IntoResponse, Response};
use axum::Json;
use orderflow_auth::AuthError;
use orderflow_saga::SagaError;
use orderflow_store_core::StoreError;
use orderflow_types::DomainError;
use serde::Serialize;

#[derive(Debug, Serialize)]
struct ProblemDetails {
    #[serde(rename = "type")]
    kind: String,
    status: u16,
    detail: String,
}

/// Wraps a [`DomainError`] for use as an axum handler error type.
#[derive(Debug)]
pub struct ApiError(pub DomainError);

impl From<DomainError> for ApiError {
    fn from(err: DomainError) -> Self {
        ApiError(err)
    }
}

impl From<StoreError> for ApiError {
    fn from(err: StoreError) -> Self {
        match err {
            StoreError::Domain(domain) => ApiError(domain),
            StoreError::Backend(err) => ApiError(DomainError::ServiceUnavailable(err.to_string())),
        }
    }
}

impl From<SagaError> for ApiError {
    fn from(err: SagaError) -> Self {
        let SagaError::Store(store_err) = err;
        ApiError::from(store_err)
    }
}

impl From<AuthError> for ApiError {
    fn from(err: AuthError) -> Self {
        ApiError(DomainError::InvalidInput(err.to_string()))
    }
}

impl From<orderflow_cache::CacheError> for ApiError {
    fn from(err: orderflow_cache::CacheError) -> Self {
        ApiError(DomainError::ServiceUnavailable(err.to_string()))
    }
}

impl IntoResponse for ApiError {
    fn into_response(self) -> Response {
        let status = StatusCode::from_u16(self.0.http_status()).unwrap_or(StatusCode::INTERNAL_SERVER_ERROR);
        let body = ProblemDetails {
            kind: format!("urn:orderflow:error:{}", self.0.code().to_lowercase().replace('_', "-")),
            status: status.as_u16(),
            detail: self.0.to_string(),
        };
        (status, Json(body)).into_response()
    }
}
