//! Processed-event and published-outbox-row retention sweep (§4.1 "Edge
//! cases: Retention", §4.2, §9).
//!
//! Grounded on the same leader-locked scheduled-body shape as
//! [`crate::relay::OutboxRelay`] and `orderflow_admission::AdmissionDequeuer`
//! — this is the third job that shares the §4.10 `ScheduledLeaderLock`.

use std::sync::Arc;
use std::time::Duration;

use chrono::Utc;
use orderflow_coordination::{LeaderLockError, ScheduledLeaderLock};
use orderflow_store_core::{IdempotencyLedger, LockLeaseStore, OutboxStore};
use tracing::info;

const JOB_NAME: &str = "retention-sweep";

/// Rows removed by one [`RetentionSweep::tick`].
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct RetentionReport {
    /// Published outbox rows deleted.
    pub outbox_rows: u64,
    /// Processed-event ledger rows deleted.
    pub processed_event_rows: u64,
}

/// Periodically purges `published=true` outbox rows and processed-event
/// ledger rows older than a configured retention window, under the leader
/// lock so only one process in the deployment runs the sweep at a time.
pub struct RetentionSweep<S: LockLeaseStore + OutboxStore + IdempotencyLedger> {
    store: Arc<S>,
    lock: ScheduledLeaderLock<S>,
    retain_for: Duration,
}

impl<S: LockLeaseStore + OutboxStore + IdempotencyLedger> RetentionSweep<S> {
    /// Builds a sweep over `store`, identifying itself as `holder`.
    pub fn new(store: Arc<S>, lock_store: Arc<S>, holder: impl Into<String>, retain_for: Duration) -> Self {
        Self { store, lock: ScheduledLeaderLock::new(lock_store, holder), retain_for }
    }

    /// Runs one sweep under the leader lock. Returns `Ok(None)` if the
    /// lease was held elsewhere.
    pub async fn tick(&self, lock_at_most_for: Duration, lock_at_least_for: Duration) -> Result<Option<RetentionReport>, LeaderLockError> {
        let store = self.store.clone();
        let retain_for = self.retain_for;
        let report = Arc::new(tokio::sync::Mutex::new(RetentionReport::default()));
        let report_for_body = report.clone();

        let ran = self
            .lock
            .acquire(JOB_NAME, lock_at_most_for, lock_at_least_for, move || {
                let store = store.clone();
                let report = report_for_body.clone();
                async move {
                    let cutoff = Utc::now() - chrono::Duration::from_std(retain_for).unwrap_or(chrono::Duration::zero());
                    let outbox_rows = store.delete_published_older_than(cutoff).await?;
                    let processed_event_rows = store.sweep_older_than(cutoff).await?;
                    let mut report = report.lock().await;
                    report.outbox_rows = outbox_rows;
                    report.processed_event_rows = processed_event_rows;
                    Ok(())
                }
            })
            .await?;

        if !ran {
            return Ok(None);
        }
        let report = *report.lock().await;
        if report.outbox_rows > 0 || report.processed_event_rows > 0 {
            info!(
                outbox_rows = report.outbox_rows,
                processed_event_rows = report.processed_event_rows,
                "retention sweep purged old rows"
            );
        }
        Ok(Some(report))
    }

    /// Runs [`Self::tick`] on a fixed interval until the process exits.
    pub async fn run(&self, interval: Duration, lock_at_most_for: Duration, lock_at_least_for: Duration) {
        let mut ticker = tokio::time::interval(interval);
        loop {
            ticker.tick().await;
            if let Err(err) = self.tick(lock_at_most_for, lock_at_least_for).await {
                tracing::warn!(error = %err, "retention sweep tick failed");
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use orderflow_store_memory::MemoryStore;
    use orderflow_types::OutboxRecord;
    use serde_json::json;
    use uuid::Uuid;

    #[tokio::test]
    async fn sweep_removes_only_published_rows_older_than_cutoff() {
        let store = Arc::new(MemoryStore::new());
        let old_record = OutboxRecord::new_unpublished(
            "payment",
            Uuid::new_v4(),
            "payment.process",
            json!({}),
            Utc::now() - chrono::Duration::days(10),
        );
        let inserted = store.append(old_record).await.unwrap();
        store.mark_published(inserted.id, Utc::now() - chrono::Duration::days(10)).await.unwrap();

        let sweep = RetentionSweep::new(store.clone(), store.clone(), "worker-a", Duration::from_secs(7 * 24 * 3600));
        let report = sweep.tick(Duration::from_secs(5), Duration::ZERO).await.unwrap().unwrap();
        assert_eq!(report.outbox_rows, 1);

        assert!(store.fetch_unpublished("payment", 100).await.unwrap().is_empty());
    }
}
