//! The transactional outbox relay (§4.1): leader-locked, per-aggregate-type
//! poll-publish-mark loop.
//!
//! Grounded on the same shape as `orderflow_admission::AdmissionDequeuer` —
//! a scheduled body wrapped in `ScheduledLeaderLock::acquire`, run on a
//! fixed interval by the composition root — generalized from "drain one
//! queue" to "drain the unpublished rows of every known aggregate type".

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orderflow_coordination::{LeaderLockError, ScheduledLeaderLock};
use orderflow_store_core::{LockLeaseStore, OutboxStore};
use tracing::{info, warn};

use crate::publisher::Publisher;

const JOB_NAME: &str = "outbox-relay";

/// Aggregate types the relay sweeps each tick. `order.created` is included
/// for completeness with §6's binding table even though no writer in this
/// workspace currently produces it (order/payment/delivery edge services
/// that would are out of scope per §1).
const AGGREGATE_TYPES: &[&str] = &["order", "payment", "delivery"];

/// Maps an outbox record's `event_type` to the logical broker binding it
/// publishes to (§6). Unknown types route to `unknownEvents` for monitoring
/// rather than being dropped.
pub fn resolve_binding(event_type: &str) -> &'static str {
    match event_type {
        "order.created" => "orderEvents-out-0",
        "payment.completed" => "paymentEvents-out-0",
        "payment.failed" => "paymentFailedEvents-out-0",
        "delivery.status" => "deliveryEvents-out-0",
        "payment.process" | "payment.compensate" => "paymentCommands-out-0",
        "delivery.create" => "deliveryCommands-out-0",
        "saga.reply" => "sagaReplies-out-0",
        _ => "unknownEvents",
    }
}

/// Outcome of one relay tick, for logging and tests.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RelayTickReport {
    /// Records successfully published and marked this tick, across all
    /// aggregate types.
    pub published: usize,
    /// Whether any aggregate type's batch stopped early on a publish failure.
    pub had_failure: bool,
}

/// The outbox relay: one per process, spawned as a background task by the
/// composition root.
pub struct OutboxRelay<S: LockLeaseStore + OutboxStore, P: Publisher> {
    store: Arc<S>,
    publisher: Arc<P>,
    lock: ScheduledLeaderLock<S>,
    batch_size: usize,
}

impl<S: LockLeaseStore + OutboxStore, P: Publisher> OutboxRelay<S, P> {
    /// Builds a relay over `store`, publishing through `publisher`,
    /// identifying itself as `holder` when acquiring the leader lock.
    pub fn new(store: Arc<S>, publisher: Arc<P>, lock_store: Arc<S>, holder: impl Into<String>, batch_size: usize) -> Self {
        Self { store, publisher, lock: ScheduledLeaderLock::new(lock_store, holder), batch_size }
    }

    /// Runs one tick under the leader lock (§4.1 algorithm): for each known
    /// aggregate type, fetch its unpublished records in commit order and
    /// publish them in order, stopping that aggregate type's batch at the
    /// first failure (a later success could reorder the failed record's
    /// successors on the wire) but continuing on to the next, unrelated
    /// aggregate type. Returns `Ok(None)` if the lease was held elsewhere.
    pub async fn tick(&self, lock_at_most_for: Duration, lock_at_least_for: Duration) -> Result<Option<RelayTickReport>, LeaderLockError> {
        let store = self.store.clone();
        let publisher = self.publisher.clone();
        let batch_size = self.batch_size;
        let report = Arc::new(tokio::sync::Mutex::new(RelayTickReport::default()));
        let report_for_body = report.clone();

        let ran = self
            .lock
            .acquire(JOB_NAME, lock_at_most_for, lock_at_least_for, move || {
                let store = store.clone();
                let publisher = publisher.clone();
                let report = report_for_body.clone();
                async move {
                    for &aggregate_type in AGGREGATE_TYPES {
                        let records = store.fetch_unpublished(aggregate_type, batch_size).await?;
                        let mut published_this_type = 0usize;
                        for record in records {
                            let binding = resolve_binding(&record.event_type);
                            match publisher.publish(binding, record.aggregate_id, &record.payload).await {
                                Ok(()) => {
                                    store.mark_published(record.id, Utc::now()).await?;
                                    published_this_type += 1;
                                }
                                Err(err) => {
                                    warn!(
                                        aggregate_type = %aggregate_type,
                                        record_id = record.id,
                                        binding,
                                        error = %err,
                                        "outbox publish failed, stopping this aggregate type's batch"
                                    );
                                    let mut report = report.lock().await;
                                    report.published += published_this_type;
                                    report.had_failure = true;
                                    return Ok(());
                                }
                            }
                        }
                        if published_this_type > 0 {
                            info!(aggregate_type = %aggregate_type, published = published_this_type, "outbox relay published batch");
                        }
                        report.lock().await.published += published_this_type;
                    }
                    Ok(())
                }
            })
            .await?;

        if !ran {
            return Ok(None);
        }
        Ok(Some(*report.lock().await))
    }

    /// Runs [`Self::tick`] on a fixed interval until the process exits.
    pub async fn run(&self, interval: Duration, lock_at_most_for: Duration, lock_at_least_for: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick(lock_at_most_for, lock_at_least_for).await {
                warn!(error = %err, "outbox relay tick failed");
            }
        }
    }
}
