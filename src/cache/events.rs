//! Cache event system.
//!
//! The store publishes an event whenever an entry's observable state
//! changes; projections such as the client mirror drain the queue and
//! re-derive themselves from the store.

use std::collections::VecDeque;
use std::sync::Mutex;
use std::sync::atomic::{AtomicU64, Ordering};

use metrics::{counter, gauge};
use time::OffsetDateTime;
use tracing::{debug, warn};
use uuid::Uuid;

use super::keys::ResourceKey;
use super::lock::mutex_lock;

const SOURCE: &str = "cache::events";
const DEFAULT_QUEUE_LIMIT: usize = 1024;

pub(crate) const METRIC_EVENT_QUEUE_LEN: &str = "examdash_event_queue_len";
pub(crate) const METRIC_EVENT_DROPPED: &str = "examdash_event_dropped_total";

/// Monotonic epoch for ordering events published by one queue.
pub type Epoch = u64;

/// Cache event with idempotency and ordering support.
#[derive(Debug, Clone)]
pub struct CacheEvent {
    /// Unique identifier for idempotency.
    pub id: Uuid,
    /// Monotonic epoch for ordering within this process.
    pub epoch: Epoch,
    pub kind: EventKind,
    pub timestamp: OffsetDateTime,
}

impl CacheEvent {
    pub fn new(kind: EventKind, epoch: Epoch) -> Self {
        Self {
            id: Uuid::new_v4(),
            epoch,
            kind,
            timestamp: OffsetDateTime::now_utc(),
        }
    }
}

/// What happened to a cache entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum EventKind {
    /// A fetch succeeded and the entry's data was replaced.
    Updated { key: ResourceKey },
    /// The entry was marked stale; data is still held.
    Invalidated { key: ResourceKey },
    /// The entry's data was discarded after disuse.
    Evicted { key: ResourceKey },
    /// A fetch failed; any previous data is still held.
    FetchFailed { key: ResourceKey, message: String },
}

impl EventKind {
    pub fn key(&self) -> &ResourceKey {
        match self {
            EventKind::Updated { key }
            | EventKind::Invalidated { key }
            | EventKind::Evicted { key }
            | EventKind::FetchFailed { key, .. } => key,
        }
    }
}

/// Bounded in-memory queue of cache events.
///
/// When the queue is full the oldest event is dropped; consumers re-derive
/// from the store rather than replaying history, so losing an old event
/// only costs a redundant sync.
pub struct EventQueue {
    queue: Mutex<VecDeque<CacheEvent>>,
    epoch_counter: AtomicU64,
    limit: usize,
}

impl EventQueue {
    pub fn new() -> Self {
        Self::new_with_limit(DEFAULT_QUEUE_LIMIT)
    }

    /// Create a queue holding at most `limit` events (minimum 1).
    pub fn new_with_limit(limit: usize) -> Self {
        Self {
            queue: Mutex::new(VecDeque::new()),
            epoch_counter: AtomicU64::new(0),
            limit: limit.max(1),
        }
    }

    pub fn next_epoch(&self) -> Epoch {
        self.epoch_counter.fetch_add(1, Ordering::SeqCst)
    }

    pub fn publish(&self, kind: EventKind) {
        let epoch = self.next_epoch();
        let event = CacheEvent::new(kind, epoch);

        debug!(
            event_id = %event.id,
            event_epoch = event.epoch,
            event_kind = ?event.kind,
            "Cache event enqueued"
        );

        let mut queue = mutex_lock(&self.queue, SOURCE, "publish");
        if queue.len() >= self.limit {
            if let Some(dropped) = queue.pop_front() {
                warn!(
                    event_id = %dropped.id,
                    event_kind = ?dropped.kind,
                    limit = self.limit,
                    "Cache event queue full; dropping oldest event"
                );
                counter!(METRIC_EVENT_DROPPED).increment(1);
            }
        }
        queue.push_back(event);
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
    }

    /// Drain up to `limit` events in FIFO order.
    pub fn drain(&self, limit: usize) -> Vec<CacheEvent> {
        let mut queue = mutex_lock(&self.queue, SOURCE, "drain");
        let count = limit.min(queue.len());
        let drained: Vec<CacheEvent> = queue.drain(..count).collect();
        gauge!(METRIC_EVENT_QUEUE_LEN).set(queue.len() as f64);
        drained
    }

    pub fn len(&self) -> usize {
        mutex_lock(&self.queue, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn clear(&self) {
        mutex_lock(&self.queue, SOURCE, "clear").clear();
    }
}

impl Default for EventQueue {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updated(name: &str) -> EventKind {
        EventKind::Updated {
            key: ResourceKey::new(name),
        }
    }

    #[test]
    fn epoch_monotonicity() {
        let queue = EventQueue::new();
        let e1 = queue.next_epoch();
        let e2 = queue.next_epoch();
        assert!(e1 < e2);
    }

    #[test]
    fn publish_and_drain_fifo() {
        let queue = EventQueue::new();
        queue.publish(updated("students"));
        queue.publish(EventKind::Invalidated {
            key: ResourceKey::new("classes"),
        });
        queue.publish(updated("rooms"));

        let events = queue.drain(2);
        assert_eq!(events.len(), 2);
        assert_eq!(queue.len(), 1);
        assert_eq!(events[0].kind, updated("students"));
        assert_eq!(events[1].kind.key().as_str(), "classes");
        assert!(events[0].epoch < events[1].epoch);
    }

    #[test]
    fn full_queue_drops_oldest() {
        let queue = EventQueue::new_with_limit(2);
        queue.publish(updated("a"));
        queue.publish(updated("b"));
        queue.publish(updated("c"));

        let events = queue.drain(10);
        let keys: Vec<&str> = events.iter().map(|e| e.kind.key().as_str()).collect();
        assert_eq!(keys, vec!["b", "c"]);
        assert!(queue.is_empty());
    }

    #[test]
    fn clear_queue() {
        let queue = EventQueue::new();
        queue.publish(updated("a"));
        queue.clear();
        assert!(queue.is_empty());
    }
}
