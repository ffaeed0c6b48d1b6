//! The scheduled, leader-locked dequeuer (§4.7, §4.10).

use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use orderflow_coordination::{LeaderLockError, ScheduledLeaderLock};
use orderflow_store_core::LockLeaseStore;
use tracing::warn;
use uuid::Uuid;

use crate::config::AdmissionConfig;
use crate::queue::AdmissionQueue;

/// Drives the already-started saga for a dequeued order forward. The saga
/// itself was started at acceptance time; this call is the "release to
/// proceed" barrier the admission queue exists to enforce (§4.7) — whatever
/// downstream work was gated on admission (e.g. kicking the outbox relay to
/// publish this order's payment command) happens inside this call.
#[async_trait]
pub trait OrderProcessor: Send + Sync {
    /// Process the dequeued order, returning an error to trigger a requeue.
    async fn process_queued_order(&self, order_id: Uuid) -> anyhow::Result<()>;
}

/// Wraps one [`AdmissionQueue::dequeue_min`] + [`OrderProcessor`] call per
/// tick in a [`ScheduledLeaderLock`], so only one process in the group
/// drains the queue at a time.
pub struct AdmissionDequeuer<S: LockLeaseStore, P: OrderProcessor> {
    queue: Arc<AdmissionQueue>,
    lock: ScheduledLeaderLock<S>,
    processor: Arc<P>,
    config: AdmissionConfig,
}

const JOB_NAME: &str = "admission-dequeue";

impl<S: LockLeaseStore, P: OrderProcessor> AdmissionDequeuer<S, P> {
    /// Builds a dequeuer over `queue`, guarded by a leader lock backed by
    /// `lock_store` and identifying itself as `holder`.
    pub fn new(
        queue: Arc<AdmissionQueue>,
        lock_store: Arc<S>,
        holder: impl Into<String>,
        processor: Arc<P>,
        config: AdmissionConfig,
    ) -> Self {
        Self { queue, lock: ScheduledLeaderLock::new(lock_store, holder), processor, config }
    }

    /// Runs one tick: under the leader lock, pops the earliest queued order
    /// (if any) and processes it, re-enqueueing at its original rank on
    /// failure. Returns `Ok(true)` if this process held the lock for the
    /// tick (whether or not an order was available to pop).
    pub async fn tick(&self) -> Result<bool, LeaderLockError> {
        let queue = self.queue.clone();
        let processor = self.processor.clone();
        self.lock
            .acquire(JOB_NAME, self.config.lock_at_most_for, self.config.lock_at_least_for, || async move {
                let Some((timestamp, order_id)) = queue.dequeue_min().await else {
                    return Ok(());
                };
                if let Err(err) = processor.process_queued_order(order_id).await {
                    warn!(order_id = %order_id, error = %err, "failed to process queued order, re-enqueueing");
                    queue.requeue(timestamp, order_id).await;
                    return Err(err);
                }
                Ok(())
            })
            .await
    }

    /// Runs [`Self::tick`] on a fixed interval until the process exits.
    /// Intended to be spawned as a background task by the composition root.
    pub async fn run(&self, interval: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick().await {
                warn!(error = %err, "admission dequeuer tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use orderflow_store_memory::MemoryStore;
    use std::sync::atomic::{AtomicUsize, Ordering};

    struct CountingProcessor {
        calls: AtomicUsize,
        fail_next: std::sync::atomic::AtomicBool,
    }

    #[async_trait]
    impl OrderProcessor for CountingProcessor {
        async fn process_queued_order(&self, _order_id: Uuid) -> anyhow::Result<()> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_next.swap(false, Ordering::SeqCst) {
                anyhow::bail!("simulated downstream failure");
            }
            Ok(())
        }
    }

    fn config() -> AdmissionConfig {
        AdmissionConfig {
            active_threshold: 1,
            lock_at_most_for: Duration::from_secs(5),
            lock_at_least_for: Duration::ZERO,
            ..AdmissionConfig::default()
        }
    }

    #[tokio::test]
    async fn tick_processes_the_earliest_queued_order() {
        let queue = Arc::new(AdmissionQueue::new(config()));
        let lock_store = Arc::new(MemoryStore::new());
        let processor =
            Arc::new(CountingProcessor { calls: AtomicUsize::new(0), fail_next: std::sync::atomic::AtomicBool::new(false) });
        let dequeuer = AdmissionDequeuer::new(queue.clone(), lock_store, "worker-a", processor.clone(), config());

        let now = Utc::now();
        queue.accept(Uuid::new_v4(), now).await;
        let order_id = Uuid::new_v4();
        queue.accept(order_id, now).await;

        let ran = dequeuer.tick().await.unwrap();
        assert!(ran);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.queue_size().await, 0);
    }

    #[tokio::test]
    async fn failed_processing_requeues_the_order() {
        let queue = Arc::new(AdmissionQueue::new(config()));
        let lock_store = Arc::new(MemoryStore::new());
        let processor =
            Arc::new(CountingProcessor { calls: AtomicUsize::new(0), fail_next: std::sync::atomic::AtomicBool::new(true) });
        let dequeuer = AdmissionDequeuer::new(queue.clone(), lock_store, "worker-a", processor.clone(), config());

        let now = Utc::now();
        queue.accept(Uuid::new_v4(), now).await;
        queue.accept(Uuid::new_v4(), now).await;

        dequeuer.tick().await.unwrap();
        assert_eq!(processor.calls.load(Ordering::SeqCst), 1);
        assert_eq!(queue.queue_size().await, 1);
    }

    #[tokio::test]
    async fn empty_queue_tick_still_holds_the_lock_briefly() {
        let queue = Arc::new(AdmissionQueue::new(config()));
        let lock_store = Arc::new(MemoryStore::new());
        let processor =
            Arc::new(CountingProcessor { calls: AtomicUsize::new(0), fail_next: std::sync::atomic::AtomicBool::new(false) });
        let dequeuer = AdmissionDequeuer::new(queue, lock_store, "worker-a", processor.clone(), config());

        let ran = dequeuer.tick().await.unwrap();
        assert!(ran);
        assert_eq!(processor.calls.load(Ordering::SeqCst), 0);
    }
}
