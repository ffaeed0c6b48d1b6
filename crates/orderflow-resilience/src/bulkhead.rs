//! Bounded-concurrency bulkhead (§4.5): isolates one call site's concurrency
//! budget from every other call site sharing the process.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use orderflow_types::DomainError;
use serde::{Deserialize, Serialize};
use tokio::sync::Semaphore;

/// Tuning for a single [`Bulkhead`].
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BulkheadConfig {
    /// Maximum number of calls allowed in flight at once.
    pub max_concurrent: usize,
    /// How long an excess call waits for a slot before failing fast.
    #[serde(with = "duration_millis")]
    pub wait_budget: Duration,
}

impl Default for BulkheadConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 20,
            wait_budget: Duration::from_millis(500),
        }
    }
}

/// A named concurrency limiter. Cheap to clone — the semaphore is shared
/// via `Arc` across clones.
#[derive(Clone)]
pub struct Bulkhead {
    name: Arc<str>,
    semaphore: Arc<Semaphore>,
    wait_budget: Duration,
}

impl Bulkhead {
    /// Builds a bulkhead named `name` with `config.max_concurrent` permits.
    pub fn new(name: impl Into<Arc<str>>, config: BulkheadConfig) -> Self {
        Self {
            name: name.into(),
            semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
            wait_budget: config.wait_budget,
        }
    }

    /// Acquires a slot (waiting up to `wait_budget`) and runs `f`, releasing
    /// the slot once `f` resolves. Fails fast with
    /// `DomainError::BulkheadFull` if no slot frees up in time.
    pub async fn call<F, Fut, T>(&self, f: F) -> Result<T, DomainError>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<T, DomainError>>,
    {
        let permit = tokio::time::timeout(self.wait_budget, self.semaphore.clone().acquire_owned())
            .await
            .map_err(|_| DomainError::BulkheadFull(self.name.to_string()))?
            .map_err(|_| DomainError::BulkheadFull(self.name.to_string()))?;

        let result = f().await;
        drop(permit);
        result
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

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    #[tokio::test]
    async fn allows_calls_up_to_the_concurrency_limit() {
        let bulkhead = Bulkhead::new(
            "store",
            BulkheadConfig { max_concurrent: 2, wait_budget: Duration::from_millis(50) },
        );

        let inflight = Arc::new(AtomicUsize::new(0));
        let max_seen = Arc::new(AtomicUsize::new(0));

        let mut handles = Vec::new();
        for _ in 0..2 {
            let bulkhead = bulkhead.clone();
            let inflight = inflight.clone();
            let max_seen = max_seen.clone();
            handles.push(tokio::spawn(async move {
                bulkhead
                    .call(|| async {
                        let now = inflight.fetch_add(1, Ordering::SeqCst) + 1;
                        max_seen.fetch_max(now, Ordering::SeqCst);
                        tokio::time::sleep(Duration::from_millis(20)).await;
                        inflight.fetch_sub(1, Ordering::SeqCst);
                        Ok::<_, DomainError>(())
                    })
                    .await
            }));
        }
        for h in handles {
            h.await.unwrap().unwrap();
        }
        assert_eq!(max_seen.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn excess_call_fails_fast_after_wait_budget() {
        let bulkhead = Bulkhead::new(
            "store",
            BulkheadConfig { max_concurrent: 1, wait_budget: Duration::from_millis(20) },
        );

        let holder = bulkhead.clone();
        let held = tokio::spawn(async move {
            holder
                .call(|| async {
                    tokio::time::sleep(Duration::from_millis(200)).await;
                    Ok::<_, DomainError>(())
                })
                .await
        });
        tokio::time::sleep(Duration::from_millis(10)).await;

        let err = bulkhead
            .call(|| async { Ok::<_, DomainError>(()) })
            .await
            .unwrap_err();
        assert!(matches!(err, DomainError::BulkheadFull(_)));

        held.await.unwrap().unwrap();
    }
}
