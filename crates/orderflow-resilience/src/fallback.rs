//! Per-call-site fallback (§4.5): the only envelope layer that is never
//! baked into [`crate::envelope::ResilienceEnvelope`] itself, since what
//! counts as a reasonable degraded response is specific to each call site
//! (e.g. the read-path cache chain's L3 stale-entry fallback in
//! `orderflow-cache` versus a typed failure elsewhere).

use std::future::Future;

use orderflow_types::DomainError;

/// Runs `primary`; on failure, hands the error to `fallback`, which may
/// either recover with a degraded value or return its own typed error.
pub async fn with_fallback<T, Fut, F>(primary: Fut, fallback: F) -> Result<T, DomainError>
where
    Fut: Future<Output = Result<T, DomainError>>,
    F: FnOnce(DomainError) -> Result<T, DomainError>,
{
    match primary.await {
        Ok(value) => Ok(value),
        Err(err) => fallback(err),
    }
}
