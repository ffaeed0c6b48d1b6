//! Per-attempt-sequence deadline (§4.5) — the outermost envelope layer, so
//! it bounds bulkhead waiting plus every retry attempt combined. Honoring
//! the cascading-timeout invariant (edge budget > service budget >
//! downstream call budget) is the caller's responsibility: pick each
//! layer's `timeout` so callers further from the edge get a smaller
//! budget than the callers wrapping them.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use orderflow_types::DomainError;

/// Runs `fut` under a deadline, translating an elapsed deadline into
/// `DomainError::RequestTimeout(name)`.
pub async fn call_with_timeout<Fut, T>(
    name: &Arc<str>,
    duration: Duration,
    fut: Fut,
) -> Result<T, DomainError>
where
    Fut: Future<Output = Result<T, DomainError>>,
{
    match tokio::time::timeout(duration, fut).await {
        Ok(result) => result,
        Err(_) => Err(DomainError::RequestTimeout(name.to_string())),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn returns_inner_result_when_it_completes_in_time() {
        let name: Arc<str> = Arc::from("store");
        let result =
            call_with_timeout(&name, Duration::from_millis(50), async { Ok::<_, DomainError>(1) })
                .await;
        assert_eq!(result.unwrap(), 1);
    }

    #[tokio::test]
    async fn times_out_a_call_that_runs_too_long() {
        let name: Arc<str> = Arc::from("store");
        let result = call_with_timeout(&name, Duration::from_millis(10), async {
            tokio::time::sleep(Duration::from_millis(100)).await;
            Ok::<_, DomainError>(1)
        })
        .await;
        assert!(matches!(result, Err(DomainError::RequestTimeout(_))));
    }
}
