//! The composition root (§4.11, §4.13): wires every crate together behind
//! one [`Runtime`] and spawns the three leader-locked scheduled jobs.
//!
//! Grounded on the teacher's `Runtime::new()`/`shutdown()` shape — one
//! struct holding an `Arc` to every collaborator, a constructor that wires
//! bottom-up (storage → cache → resilience → saga → admission → scheduled
//! jobs), and a `shutdown()` that aborts and awaits every background task
//! — generalized from "kernel + storage + bus" to this workspace's wider
//! set of collaborators.

use std::sync::Arc;

use tokio::task::JoinHandle;
use uuid::Uuid;

use orderflow_admission::{AdmissionDequeuer, AdmissionQueue};
use orderflow_auth::TrustedHeaderValidator;
use orderflow_cache::SledCache;
use orderflow_events::RealtimeNotifier;
use orderflow_resilience::algorithms::TokenBucketLimiter;
use orderflow_resilience::config::ResilienceConfig;
use orderflow_resilience::envelope::ResilienceEnvelope;
use orderflow_resilience::storage::MemoryRateLimitStorage;
use orderflow_resilience::{AuthRateLimitContext, RateLimitError, RateLimitResult, RateLimiter};
use orderflow_saga::SagaOrchestrator;
use orderflow_store_memory::MemoryStore;
use orderflow_store_postgres::PostgresStore;

use crate::config::{AppConfig, AppConfigError, CacheConfig, StoreConfig};
use crate::processor::ReleaseOrderProcessor;
use crate::publisher::{LoggingPublisher, Publisher};
use crate::relay::OutboxRelay;
use crate::retention::RetentionSweep;
use crate::store::Store;

/// Errors that can prevent the runtime from starting.
#[derive(Debug, thiserror::Error)]
pub enum RuntimeError {
    /// The layered configuration failed to load or validate.
    #[error(transparent)]
    Config(#[from] AppConfigError),
    /// A resilience envelope failed to build from an already-validated config.
    #[error(transparent)]
    Resilience(#[from] orderflow_resilience::config::ResilienceConfigError),
    /// The storage backend failed to connect/migrate.
    #[error("storage backend failed to initialize: {0}")]
    Storage(#[from] anyhow::Error),
    /// The embedded cache failed to open.
    #[error("cache failed to open: {0}")]
    Cache(#[from] orderflow_cache::CacheError),
    /// The ingress rate limiter failed to build from an already-validated config.
    #[error("rate limit config: {0}")]
    RateLimit(#[from] RateLimitError),
}

/// Everything the gateway binary (or a test harness) needs to serve
/// requests and keep the background jobs running, generic over the chosen
/// [`Store`] backend and [`Publisher`] sink.
pub struct Runtime<S: Store, P: Publisher> {
    /// The wired storage backend.
    pub store: Arc<S>,
    /// The read-path cache (§4.9).
    pub cache: Arc<SledCache>,
    /// The saga orchestrator (§4.6).
    pub saga: Arc<SagaOrchestrator<S>>,
    /// The admission queue (§4.7) — the gateway consults this directly on
    /// `POST /orders` and `GET /orders/queue/status`.
    pub admission_queue: Arc<AdmissionQueue>,
    /// The realtime notifier (§4.8) — the gateway's SSE handler subscribes here.
    pub notifier: RealtimeNotifier,
    /// Trusted-header identity extraction (§6 "Auth contract").
    pub identity_validator: Arc<TrustedHeaderValidator>,
    /// Default resilience envelope wrapping calls into `store`.
    pub store_envelope: ResilienceEnvelope,
    /// Default TTL `read_through` callers should pass for `cache`, taken
    /// from [`CacheConfig::default_ttl`].
    pub cache_default_ttl: std::time::Duration,
    /// Ingress rate limiter (§4.5), keyed per authenticated caller identity.
    rate_limiter: TokenBucketLimiter<MemoryRateLimitStorage>,

    background: Vec<JoinHandle<()>>,
}

impl<S: Store + 'static, P: Publisher + 'static> Runtime<S, P> {
    /// Wires every collaborator over an already-constructed `store`, then
    /// spawns the outbox relay, admission dequeuer, and retention sweep as
    /// background tasks.
    pub async fn new(config: AppConfig, store: Arc<S>, publisher: Arc<P>) -> Result<Self, RuntimeError> {
        config.validate()?;

        let cache_default_ttl = config.cache.default_ttl;
        let cache = Arc::new(open_cache(&config.cache)?);
        let notifier = RealtimeNotifier::default();
        let identity_validator = Arc::new(TrustedHeaderValidator);

        let store_envelope = ResilienceEnvelope::new("store", config.resilience.clone())?;
        let rate_limiter = TokenBucketLimiter::new(
            Arc::new(MemoryRateLimitStorage::new()),
            config.rate_limit.clone(),
        )?;

        let saga = Arc::new(SagaOrchestrator::new(store.clone(), notifier.clone()));

        let admission_queue = Arc::new(AdmissionQueue::new(config.admission.clone()));
        let holder = process_holder(&config.lock.holder_prefix);

        let processor = Arc::new(ReleaseOrderProcessor::new(store.clone(), notifier.clone()));
        let dequeuer = Arc::new(AdmissionDequeuer::new(
            admission_queue.clone(),
            store.clone(),
            holder.clone(),
            processor,
            config.admission.clone(),
        ));

        let relay = Arc::new(OutboxRelay::new(
            store.clone(),
            publisher,
            store.clone(),
            holder.clone(),
            config.lock.relay_batch_size,
        ));

        let retention = Arc::new(RetentionSweep::new(
            store.clone(),
            store.clone(),
            holder,
            config.lock.retention_retain_for,
        ));

        let mut background = Vec::new();
        background.push(tokio::spawn({
            let dequeuer = dequeuer.clone();
            let interval = config.admission.dequeue_interval;
            async move { dequeuer.run(interval).await }
        }));
        background.push(tokio::spawn({
            let relay = relay.clone();
            let interval = config.lock.relay_interval;
            let at_most = config.lock.relay_lock_at_most_for;
            let at_least = config.lock.relay_lock_at_least_for;
            async move { relay.run(interval, at_most, at_least).await }
        }));
        background.push(tokio::spawn({
            let retention = retention.clone();
            let interval = config.lock.retention_interval;
            let at_most = config.lock.retention_lock_at_most_for;
            let at_least = config.lock.retention_lock_at_least_for;
            async move { retention.run(interval, at_most, at_least).await }
        }));
        background.push(tokio::spawn(release_in_flight_on_terminal_notification(
            admission_queue.clone(),
            notifier.subscribe(),
        )));

        Ok(Self {
            store,
            cache,
            saga,
            admission_queue,
            notifier,
            identity_validator,
            store_envelope,
            cache_default_ttl,
            rate_limiter,
            background,
        })
    }

    /// Checks the ingress rate limit for `caller` (§4.5). Each distinct
    /// caller identity gets its own token bucket, so one caller exhausting
    /// their budget never affects another's.
    pub async fn check_rate_limit(&self, caller: Uuid) -> Result<(), orderflow_types::DomainError> {
        let mut context = AuthRateLimitContext::new();
        context.user_id = Some(caller.to_string());
        match self.rate_limiter.check_rate_limit(&context).await {
            Ok(RateLimitResult::Allowed { .. }) => Ok(()),
            Ok(RateLimitResult::Limited { .. }) => {
                Err(orderflow_types::DomainError::RateLimitExceeded(caller.to_string()))
            }
            Err(err) => Err(orderflow_types::DomainError::ServiceUnavailable(err.to_string())),
        }
    }

    /// Aborts every background task and awaits their teardown.
    pub async fn shutdown(mut self) {
        for handle in self.background.drain(..) {
            handle.abort();
            let _ = handle.await;
        }
    }
}

impl Runtime<MemoryStore, LoggingPublisher> {
    /// Builds a runtime over the in-memory store and a logging publisher —
    /// local development and tests. Equivalent to the teacher's `test_config`
    /// + in-memory storage backend combination.
    pub async fn in_memory(config: AppConfig) -> Result<Self, RuntimeError> {
        let store = Arc::new(MemoryStore::new());
        Runtime::new(config, store, Arc::new(LoggingPublisher)).await
    }
}

impl Runtime<PostgresStore, LoggingPublisher> {
    /// Builds a runtime over a connected Postgres store (§4.11's
    /// `StoreConfig::Postgres`) and a logging publisher, for deployments
    /// that have not yet wired a real broker client.
    pub async fn postgres(config: AppConfig) -> Result<Self, RuntimeError> {
        let StoreConfig::Postgres { database_url, max_connections } = &config.store else {
            return Err(RuntimeError::Storage(anyhow::anyhow!(
                "Runtime::postgres called with a non-postgres StoreConfig"
            )));
        };
        let store = Arc::new(PostgresStore::connect(database_url, *max_connections).await?);
        Runtime::new(config, store, Arc::new(LoggingPublisher)).await
    }
}

fn open_cache(config: &CacheConfig) -> Result<SledCache, orderflow_cache::CacheError> {
    match &config.path {
        Some(path) => SledCache::open(path),
        None => SledCache::temporary(),
    }
}

fn process_holder(prefix: &str) -> String {
    format!("{prefix}-{}", Uuid::new_v4())
}

/// Releases the admission queue's in-flight slot for every order whose
/// saga reaches a terminal outcome (§4.7). Every order accepted via
/// `AdmissionQueue::accept` increments in-flight unconditionally, including
/// when it bypasses the queue entirely, so this is the only place that
/// decrements it back.
async fn release_in_flight_on_terminal_notification(
    admission_queue: Arc<AdmissionQueue>,
    mut notifications: tokio::sync::broadcast::Receiver<orderflow_events::OrderNotification>,
) {
    use orderflow_events::OrderNotification;
    use tokio::sync::broadcast::error::RecvError;

    // Every failure path sets the order's status to `Cancelled` before
    // notifying, so `StatusChanged` alone covers both success and failure
    // termination; `SagaFailed` always accompanies one and would double-
    // release the same order's in-flight slot if handled too.
    loop {
        match notifications.recv().await {
            Ok(OrderNotification::StatusChanged { status, .. }) if status.is_terminal() => {
                admission_queue.release_in_flight().await;
            }
            Ok(_) => {}
            Err(RecvError::Lagged(_)) => continue,
            Err(RecvError::Closed) => return,
        }
    }
}

/// A validated [`AppConfig`] plus a ready-to-use in-memory [`ResilienceConfig`]
/// default, for tests that want a runtime without going through
/// [`AppConfig::load`]'s environment/file layering.
pub fn test_config() -> AppConfig {
    AppConfig { resilience: ResilienceConfig::default(), ..AppConfig::test_config() }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn in_memory_runtime_wires_and_shuts_down_cleanly() {
        let runtime = Runtime::in_memory(test_config()).await.unwrap();
        assert_eq!(runtime.admission_queue.queue_size().await, 0);
        runtime.shutdown().await;
    }
}
