//! The ordered admission set (§4.7): an in-memory set keyed by
//! `(submission timestamp, orderId)`, ascending order giving strict FIFO.

use std::collections::{BTreeSet, HashMap};
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::sync::Mutex;
use uuid::Uuid;

use crate::config::AdmissionConfig;

/// Rank, queue size, and estimated wait reported back to a caller whose
/// order was enqueued (§4.7, `GET /orders/queue/status`).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct QueueStatus {
    /// 1-based position in the queue, log-time (FIFO) order.
    pub rank: usize,
    /// Current queue size.
    pub queue_size: usize,
    /// `rank * processing_interval`.
    pub estimated_wait: Duration,
}

struct Inner {
    entries: BTreeSet<(DateTime<Utc>, Uuid)>,
    index: HashMap<Uuid, DateTime<Utc>>,
    in_flight: usize,
}

/// The admission queue: tracks in-flight order count and, once "active",
/// the ordered set of orders awaiting release by the scheduled dequeuer.
pub struct AdmissionQueue {
    config: AdmissionConfig,
    inner: Mutex<Inner>,
}

impl AdmissionQueue {
    /// Builds an empty queue under `config`.
    pub fn new(config: AdmissionConfig) -> Self {
        Self {
            config,
            inner: Mutex::new(Inner { entries: BTreeSet::new(), index: HashMap::new(), in_flight: 0 }),
        }
    }

    /// Whether the queue is currently "active" (§4.7): in-flight count at
    /// or above the configured threshold, or the set is non-empty.
    pub async fn is_active(&self) -> bool {
        let inner = self.inner.lock().await;
        Self::active_locked(&inner, &self.config)
    }

    fn active_locked(inner: &Inner, config: &AdmissionConfig) -> bool {
        inner.in_flight >= config.active_threshold || !inner.entries.is_empty()
    }

    /// Records acceptance of `order_id` (incrementing the in-flight
    /// counter), and — if the queue is active — enqueues it, returning its
    /// rank/queue-size/estimated-wait. Returns `None` when the queue was
    /// not active at acceptance time, meaning the caller proceeds without
    /// queueing.
    pub async fn accept(&self, order_id: Uuid, now: DateTime<Utc>) -> Option<QueueStatus> {
        let mut inner = self.inner.lock().await;
        let active = Self::active_locked(&inner, &self.config);
        inner.in_flight += 1;
        if !active {
            return None;
        }
        inner.entries.insert((now, order_id));
        inner.index.insert(order_id, now);
        Some(Self::status_locked(&inner, &self.config, now, order_id))
    }

    /// Looks up the current status of an already-enqueued order, without
    /// mutating anything. Returns `None` if the order is not (or is no
    /// longer) enqueued.
    pub async fn status_of(&self, order_id: Uuid) -> Option<QueueStatus> {
        let inner = self.inner.lock().await;
        let timestamp = *inner.index.get(&order_id)?;
        Some(Self::status_locked(&inner, &self.config, timestamp, order_id))
    }

    fn status_locked(inner: &Inner, config: &AdmissionConfig, timestamp: DateTime<Utc>, order_id: Uuid) -> QueueStatus {
        let ahead = inner.entries.range(..(timestamp, order_id)).count();
        let rank = ahead + 1;
        QueueStatus {
            rank,
            queue_size: inner.entries.len(),
            estimated_wait: config.processing_interval * rank as u32,
        }
    }

    /// Atomically pops the minimum-score (earliest) entry, for the
    /// scheduled dequeuer to drive `processQueuedOrder`.
    pub async fn dequeue_min(&self) -> Option<(DateTime<Utc>, Uuid)> {
        let mut inner = self.inner.lock().await;
        let entry = inner.entries.iter().next().copied()?;
        inner.entries.remove(&entry);
        inner.index.remove(&entry.1);
        Some(entry)
    }

    /// Re-enqueues an entry the dequeuer failed to process, at its
    /// original score so it keeps its place in line rather than being
    /// pushed to the back.
    pub async fn requeue(&self, timestamp: DateTime<Utc>, order_id: Uuid) {
        let mut inner = self.inner.lock().await;
        inner.entries.insert((timestamp, order_id));
        inner.index.insert(order_id, timestamp);
    }

    /// Decrements the in-flight counter on saga completion (§4.7). Safe to
    /// call once per order that was previously accepted.
    pub async fn release_in_flight(&self) {
        let mut inner = self.inner.lock().await;
        inner.in_flight = inner.in_flight.saturating_sub(1);
    }

    /// Current queue size, for `GET /orders/queue/status` responses that
    /// don't name a specific order.
    pub async fn queue_size(&self) -> usize {
        self.inner.lock().await.entries.len()
    }
}
