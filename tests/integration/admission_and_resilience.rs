//! Admission queue activation and resilience envelope scenarios (§4.5, §4.7, §8).

#[path = "common.rs"]
mod common;

use std::sync::atomic::{AtomicU32, Ordering};
use std::sync::Arc;
use std::time::Duration;

use chrono::{Duration as ChronoDuration, Utc};
use uuid::Uuid;

use orderflow_admission::{AdmissionConfig, AdmissionQueue};
use orderflow_resilience::algorithms::TokenBucketLimiter;
use orderflow_resilience::circuit_breaker::CircuitBreakerConfig;
use orderflow_resilience::config::ResilienceConfig;
use orderflow_resilience::envelope::ResilienceEnvelope;
use orderflow_resilience::storage::MemoryRateLimitStorage;
use orderflow_resilience::{AuthRateLimitContext, RateLimitConfig, RateLimiter};
use orderflow_types::DomainError;

/// Scenario 7: once in-flight orders reach `active_threshold`, the 51st
/// (here, the Nth-plus-one) accepted order gets a defined rank, and ranks
/// assigned thereafter strictly follow submission order.
#[tokio::test]
async fn admission_queue_activates_at_threshold_and_ranks_in_submission_order() {
    let threshold = 50;
    let queue = AdmissionQueue::new(AdmissionConfig { active_threshold: threshold, ..AdmissionConfig::default() });
    let t0 = Utc::now();

    for i in 0..threshold {
        let status = queue.accept(Uuid::new_v4(), t0 + ChronoDuration::milliseconds(i as i64)).await;
        assert!(status.is_none(), "orders below the threshold bypass the queue");
    }

    // The (threshold + 1)th order observes in_flight == threshold and is enqueued.
    let overflow_order = Uuid::new_v4();
    let status = queue
        .accept(overflow_order, t0 + ChronoDuration::milliseconds(threshold as i64))
        .await
        .expect("queue must be active once in-flight reaches the threshold");
    assert_eq!(status.rank, 1);
    assert_eq!(status.queue_size, 1);

    // A later submission ranks behind it.
    let next_order = Uuid::new_v4();
    let next_status = queue
        .accept(next_order, t0 + ChronoDuration::milliseconds(threshold as i64 + 1))
        .await
        .unwrap();
    assert_eq!(next_status.rank, 2);

    // Dequeuing releases the earliest-ranked order first, in submission order.
    let (_, popped) = queue.dequeue_min().await.unwrap();
    assert_eq!(popped, overflow_order);
    let remaining = queue.status_of(next_order).await.unwrap();
    assert_eq!(remaining.rank, 1, "rank decreases as the dequeuer drains earlier entries");
}

fn rate_limit_config(limit: u64) -> RateLimitConfig {
    RateLimitConfig { limit, window: chrono::Duration::minutes(1), burst_capacity: None, ..RateLimitConfig::default() }
}

/// Rate limiter fairness (supplemental, §8): one caller exhausting their
/// token bucket must never affect a second caller's independent budget.
#[tokio::test]
async fn rate_limiter_exhaustion_is_isolated_per_caller() {
    let limiter = TokenBucketLimiter::new(Arc::new(MemoryRateLimitStorage::new()), rate_limit_config(3)).unwrap();

    let caller_a = Uuid::new_v4().to_string();
    let caller_b = Uuid::new_v4().to_string();

    let mut context_a = AuthRateLimitContext::new();
    context_a.user_id = Some(caller_a.clone());

    for _ in 0..3 {
        let result = limiter.check_rate_limit(&context_a).await.unwrap();
        assert!(result.is_allowed());
    }
    // A's 4th call within the window is rejected.
    let exhausted = limiter.check_rate_limit(&context_a).await.unwrap();
    assert!(!exhausted.is_allowed());

    // B's budget is untouched by A's exhaustion.
    let mut context_b = AuthRateLimitContext::new();
    context_b.user_id = Some(caller_b);
    let result_b = limiter.check_rate_limit(&context_b).await.unwrap();
    assert!(result_b.is_allowed());
}

fn breaker_config() -> ResilienceConfig {
    ResilienceConfig {
        circuit_breaker: CircuitBreakerConfig {
            window_size: 10,
            failure_rate_threshold: 0.5,
            open_duration: Duration::from_millis(50),
        },
        ..ResilienceConfig::default()
    }
}

/// Scenario 8: within a 10-call window at a 50%-failure threshold, a
/// string of failures that fills the window at or above that rate trips
/// the breaker; while open, calls are rejected without invoking the
/// wrapped closure; after `open_duration` it allows exactly one half-open
/// probe, which — on success — closes the breaker again.
#[tokio::test]
async fn circuit_breaker_trips_and_recovers_through_half_open_probe() {
    let envelope = ResilienceEnvelope::new("downstream", breaker_config()).unwrap();
    let calls = Arc::new(AtomicU32::new(0));

    // The breaker only evaluates its failure rate once the window has
    // filled to `window_size` outcomes, so 10 failing calls are needed to
    // both fill the window and push its failure rate over the threshold.
    for _ in 0..10 {
        let calls = calls.clone();
        let result = envelope
            .call(|| {
                calls.fetch_add(1, Ordering::SeqCst);
                async { Err::<(), _>(DomainError::ServiceUnavailable("downstream down".into())) }
            })
            .await;
        assert!(result.is_err());
    }
    assert_eq!(calls.load(Ordering::SeqCst), 10);

    // The breaker is now open: the call is rejected without touching the closure.
    let calls_while_open = calls.clone();
    let rejected = envelope
        .call(|| {
            calls_while_open.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, DomainError>(()) }
        })
        .await;
    assert!(matches!(rejected, Err(DomainError::CircuitBreakerOpen(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 10, "the wrapped call must not run while the breaker is open");

    tokio::time::sleep(Duration::from_millis(60)).await;

    // The half-open probe succeeds, closing the breaker again.
    let probe_calls = calls.clone();
    let probe_result = envelope
        .call(|| {
            probe_calls.fetch_add(1, Ordering::SeqCst);
            async { Ok::<_, DomainError>(42) }
        })
        .await;
    assert_eq!(probe_result.unwrap(), 42);
    assert_eq!(calls.load(Ordering::SeqCst), 11);

    // Breaker is closed again: a normal failing call runs and fails, rather
    // than being rejected fast.
    let post_recovery_calls = calls.clone();
    let post_recovery = envelope
        .call(|| {
            post_recovery_calls.fetch_add(1, Ordering::SeqCst);
            async { Err::<(), _>(DomainError::ServiceUnavailable("blip".into())) }
        })
        .await;
    assert!(matches!(post_recovery, Err(DomainError::ServiceUnavailable(_))));
    assert_eq!(calls.load(Ordering::SeqCst), 12);
}
