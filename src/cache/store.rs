//! Keyed server-state cache.
//!
//! `CacheStore` is the single owner of every cache entry. Readers get
//! immutable snapshots; the only ways to change an entry are
//! `ensure_fresh`/`revalidate` (fetch), `invalidate` and eviction.
//!
//! Fetches run as spawned tasks that settle the entry themselves, so a
//! caller that stops waiting never strands an in-flight fetch that other
//! callers have joined.

use std::collections::HashMap;
use std::panic::AssertUnwindSafe;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, RwLock};

use futures::FutureExt;
use metrics::{counter, histogram};
use tokio::time::Instant;
use tracing::{debug, info, warn};

use crate::domain::error::RemoteError;

use super::entry::{CacheEntry, EntrySnapshot, EntryStatus, InFlight, PendingFetch};
use super::error::FetchError;
use super::events::{EventKind, EventQueue};
use super::keys::ResourceKey;
use super::lock::{rw_read, rw_write};
use super::registry::{Record, ResourcePolicy};

const SOURCE: &str = "cache::store";

pub(crate) const METRIC_FETCH_TOTAL: &str = "examdash_cache_fetch_total";
pub(crate) const METRIC_DEDUP_TOTAL: &str = "examdash_cache_dedup_total";
pub(crate) const METRIC_FETCH_ERROR_TOTAL: &str = "examdash_cache_fetch_error_total";
pub(crate) const METRIC_INVALIDATE_TOTAL: &str = "examdash_cache_invalidate_total";
pub(crate) const METRIC_EVICT_TOTAL: &str = "examdash_cache_evict_total";
pub(crate) const METRIC_FETCH_MS: &str = "examdash_cache_fetch_ms";

struct StoreInner {
    entries: RwLock<HashMap<ResourceKey, CacheEntry>>,
    events: Arc<EventQueue>,
    fetch_seq: AtomicU64,
}

/// Handle to a shared cache. Clones refer to the same entries.
#[derive(Clone)]
pub struct CacheStore {
    inner: Arc<StoreInner>,
}

impl CacheStore {
    pub fn new(events: Arc<EventQueue>) -> Self {
        Self {
            inner: Arc::new(StoreInner {
                entries: RwLock::new(HashMap::new()),
                events,
                fetch_seq: AtomicU64::new(0),
            }),
        }
    }

    pub fn events(&self) -> &Arc<EventQueue> {
        &self.inner.events
    }

    /// Return the entry for `policy`, creating an idle one on first use.
    pub fn get(&self, policy: &ResourcePolicy) -> EntrySnapshot {
        let now = Instant::now();
        let mut entries = rw_write(&self.inner.entries, SOURCE, "get");
        let entry = entries
            .entry(policy.key().clone())
            .or_insert_with(|| CacheEntry::new(policy, now));
        entry.last_read = now;
        entry.snapshot(now)
    }

    /// Cache-read interface: current state of `key`, never touching the network.
    pub fn read(&self, key: &str) -> EntrySnapshot {
        let now = Instant::now();
        let mut entries = rw_write(&self.inner.entries, SOURCE, "read");
        match entries.get_mut(key) {
            Some(entry) => {
                entry.last_read = now;
                entry.snapshot(now)
            }
            None => EntrySnapshot::idle(ResourceKey::new(key)),
        }
    }

    /// Like `read`, but does not count as a use for eviction purposes.
    pub fn peek(&self, key: &str) -> EntrySnapshot {
        let now = Instant::now();
        match rw_read(&self.inner.entries, SOURCE, "peek").get(key) {
            Some(entry) => entry.snapshot(now),
            None => EntrySnapshot::idle(ResourceKey::new(key)),
        }
    }

    /// The fetch currently running for `key`, if any.
    pub fn in_flight(&self, key: &str) -> Option<PendingFetch> {
        rw_read(&self.inner.entries, SOURCE, "in_flight")
            .get(key)
            .and_then(|entry| entry.in_flight.as_ref())
            .map(|in_flight| in_flight.shared.clone())
    }

    /// Bring the entry up to date and return it.
    ///
    /// Never fails: a fetch error is recorded on the entry and any earlier
    /// data is still returned.
    pub async fn ensure_fresh(&self, policy: &ResourcePolicy) -> EntrySnapshot {
        match self.revalidate(policy) {
            Some(pending) => pending.await,
            None => self.read(policy.key().as_str()),
        }
    }

    /// Start a fetch if the entry is idle or stale, without waiting for it.
    ///
    /// Returns the in-flight fetch (new or already running) to join, or
    /// `None` when the cached data is fresh. Must be called from within a
    /// tokio runtime.
    pub fn revalidate(&self, policy: &ResourcePolicy) -> Option<PendingFetch> {
        let now = Instant::now();
        let key = policy.key().clone();
        let mut entries = rw_write(&self.inner.entries, SOURCE, "revalidate");
        let entry = entries
            .entry(key.clone())
            .or_insert_with(|| CacheEntry::new(policy, now));
        entry.last_read = now;

        if let Some(in_flight) = &entry.in_flight {
            debug!(resource = %key, fetch_id = in_flight.id, "Joining in-flight fetch");
            counter!(METRIC_DEDUP_TOTAL, "resource" => key.to_string()).increment(1);
            return Some(in_flight.shared.clone());
        }

        if !entry.is_stale(now) {
            debug!(resource = %key, "Cache entry fresh");
            return None;
        }

        let fetch_id = self.inner.fetch_seq.fetch_add(1, Ordering::SeqCst);
        let shared = self.spawn_fetch(key.clone(), fetch_id, policy);
        entry.status = EntryStatus::Loading;
        entry.invalidated = false;
        entry.in_flight = Some(InFlight {
            id: fetch_id,
            shared: shared.clone(),
        });

        debug!(
            resource = %key,
            fetch_id,
            had_data = entry.data.is_some(),
            "Cache fetch started"
        );
        counter!(METRIC_FETCH_TOTAL, "resource" => key.to_string()).increment(1);

        Some(shared)
    }

    fn spawn_fetch(&self, key: ResourceKey, fetch_id: u64, policy: &ResourcePolicy) -> PendingFetch {
        let fetch = policy.start_fetch();
        let task_inner = Arc::clone(&self.inner);
        let task_key = key.clone();

        let handle = tokio::spawn(async move {
            let started_at = Instant::now();
            let result = AssertUnwindSafe(fetch)
                .catch_unwind()
                .await
                .unwrap_or_else(|_| Err(RemoteError::aborted("fetch task panicked")));
            histogram!(METRIC_FETCH_MS, "resource" => task_key.to_string())
                .record(started_at.elapsed().as_secs_f64() * 1000.0);
            task_inner.settle(&task_key, fetch_id, result)
        });

        let join_inner = Arc::clone(&self.inner);
        async move {
            match handle.await {
                Ok(snapshot) => snapshot,
                Err(join_error) => join_inner.settle(
                    &key,
                    fetch_id,
                    Err(RemoteError::aborted(join_error.to_string())),
                ),
            }
        }
        .boxed()
        .shared()
    }

    /// Mark `key` stale without discarding its data.
    ///
    /// Returns `true` if the entry changed; repeated calls are no-ops.
    pub fn invalidate(&self, key: &str) -> bool {
        let mut entries = rw_write(&self.inner.entries, SOURCE, "invalidate");
        match entries.get_mut(key) {
            Some(entry) => self.inner.mark_invalidated(entry),
            None => false,
        }
    }

    /// Invalidate every entry. Returns how many entries changed.
    pub fn invalidate_all(&self) -> usize {
        let mut entries = rw_write(&self.inner.entries, SOURCE, "invalidate_all");
        entries
            .values_mut()
            .filter_map(|entry| self.inner.mark_invalidated(entry).then_some(()))
            .count()
    }

    /// Discard `key`'s data if nobody has read it within its eviction window.
    pub fn evict_if_unused(&self, key: &str) -> bool {
        let now = Instant::now();
        let mut entries = rw_write(&self.inner.entries, SOURCE, "evict_if_unused");
        match entries.get_mut(key) {
            Some(entry) => self.inner.evict(entry, now),
            None => false,
        }
    }

    /// Run `evict_if_unused` over every entry. Returns the number evicted.
    pub fn sweep(&self) -> usize {
        let now = Instant::now();
        let mut entries = rw_write(&self.inner.entries, SOURCE, "sweep");
        entries
            .values_mut()
            .filter_map(|entry| self.inner.evict(entry, now).then_some(()))
            .count()
    }

    /// Register an active consumer of `policy`'s key.
    ///
    /// Entries with consumers are never evicted. Dropping the guard counts
    /// as a final read.
    pub fn attach(&self, policy: &ResourcePolicy) -> ConsumerGuard {
        let now = Instant::now();
        let mut entries = rw_write(&self.inner.entries, SOURCE, "attach");
        let entry = entries
            .entry(policy.key().clone())
            .or_insert_with(|| CacheEntry::new(policy, now));
        entry.consumers += 1;
        entry.last_read = now;
        ConsumerGuard {
            store: self.clone(),
            key: policy.key().clone(),
        }
    }

    fn detach(&self, key: &ResourceKey) {
        let now = Instant::now();
        let mut entries = rw_write(&self.inner.entries, SOURCE, "detach");
        if let Some(entry) = entries.get_mut(key.as_str()) {
            entry.consumers = entry.consumers.saturating_sub(1);
            entry.last_read = now;
        }
    }

    pub fn has_consumers(&self, key: &str) -> bool {
        rw_read(&self.inner.entries, SOURCE, "has_consumers")
            .get(key)
            .is_some_and(|entry| entry.consumers > 0)
    }

    /// Keys that currently have at least one consumer.
    pub fn observed_keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = rw_read(&self.inner.entries, SOURCE, "observed_keys")
            .values()
            .filter(|entry| entry.consumers > 0)
            .map(|entry| entry.key.clone())
            .collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        rw_read(&self.inner.entries, SOURCE, "len").len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl StoreInner {
    fn settle(
        &self,
        key: &ResourceKey,
        fetch_id: u64,
        result: Result<Vec<Record>, RemoteError>,
    ) -> EntrySnapshot {
        let now = Instant::now();
        let mut entries = rw_write(&self.entries, SOURCE, "settle");
        let Some(entry) = entries.get_mut(key.as_str()) else {
            return EntrySnapshot::idle(key.clone());
        };

        let is_current = entry
            .in_flight
            .as_ref()
            .is_some_and(|in_flight| in_flight.id == fetch_id);
        if !is_current {
            return entry.snapshot(now);
        }
        entry.in_flight = None;

        match result {
            Ok(rows) => {
                let count = rows.len();
                entry.data = Some(Arc::from(rows));
                entry.fetched_at = Some(now);
                entry.status = EntryStatus::Success;
                entry.error = None;
                info!(resource = %key, fetch_id, count, "Cache entry updated");
                self.events.publish(EventKind::Updated { key: key.clone() });
            }
            Err(source) => {
                let error = FetchError::new(key.clone(), source);
                warn!(
                    resource = %key,
                    fetch_id,
                    kept_data = entry.data.is_some(),
                    error = %error,
                    "Cache fetch failed"
                );
                counter!(METRIC_FETCH_ERROR_TOTAL, "resource" => key.to_string()).increment(1);
                self.events.publish(EventKind::FetchFailed {
                    key: key.clone(),
                    message: error.to_string(),
                });
                entry.status = EntryStatus::Error;
                entry.error = Some(error);
                entry.invalidated = true;
            }
        }

        entry.snapshot(now)
    }

    fn mark_invalidated(&self, entry: &mut CacheEntry) -> bool {
        if entry.invalidated {
            return false;
        }
        entry.invalidated = true;
        debug!(resource = %entry.key, "Cache entry invalidated");
        counter!(METRIC_INVALIDATE_TOTAL, "resource" => entry.key.to_string()).increment(1);
        self.events.publish(EventKind::Invalidated {
            key: entry.key.clone(),
        });
        true
    }

    fn evict(&self, entry: &mut CacheEntry, now: Instant) -> bool {
        if !entry.is_evictable(now) {
            return false;
        }
        entry.reset();
        info!(resource = %entry.key, "Cache entry evicted after disuse");
        counter!(METRIC_EVICT_TOTAL, "resource" => entry.key.to_string()).increment(1);
        self.events.publish(EventKind::Evicted {
            key: entry.key.clone(),
        });
        true
    }
}

/// Marks one active consumer of a resource; released on drop.
pub struct ConsumerGuard {
    store: CacheStore,
    key: ResourceKey,
}

impl ConsumerGuard {
    pub fn key(&self) -> &ResourceKey {
        &self.key
    }
}

impl Drop for ConsumerGuard {
    fn drop(&mut self) {
        self.store.detach(&self.key);
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::AtomicUsize;
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;

    /// Policy whose fetch waits for `gate` (when given) and then answers
    /// with the next scripted response.
    fn scripted_policy(
        name: &str,
        calls: Arc<AtomicUsize>,
        gate: Option<Arc<Notify>>,
        responses: Vec<Result<Vec<Record>, RemoteError>>,
    ) -> ResourcePolicy {
        let responses = Arc::new(std::sync::Mutex::new(responses.into_iter()));
        ResourcePolicy::new(
            name,
            Duration::from_secs(60),
            Duration::from_secs(300),
            move || {
                let calls = Arc::clone(&calls);
                let gate = gate.clone();
                let responses = Arc::clone(&responses);
                async move {
                    calls.fetch_add(1, Ordering::SeqCst);
                    if let Some(gate) = gate {
                        gate.notified().await;
                    }
                    responses
                        .lock()
                        .expect("responses lock")
                        .next()
                        .unwrap_or_else(|| Err(RemoteError::transport("script exhausted")))
                }
            },
        )
    }

    fn store() -> CacheStore {
        CacheStore::new(Arc::new(EventQueue::new()))
    }

    #[tokio::test]
    async fn concurrent_ensure_fresh_fetches_once() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let policy = scripted_policy(
            "students",
            Arc::clone(&calls),
            Some(Arc::clone(&gate)),
            vec![Ok(vec![json!({"id": 1})])],
        );
        let store = store();

        let first = store.revalidate(&policy).expect("first call starts a fetch");
        let second = store.revalidate(&policy).expect("second call joins it");
        gate.notify_one();

        let (a, b) = tokio::join!(first, second);
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert_eq!(a.status, EntryStatus::Success);
        assert_eq!(a.records(), b.records());
        assert_eq!(a.records(), &[json!({"id": 1})]);
    }

    #[tokio::test]
    async fn fresh_entry_is_served_without_fetching() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = scripted_policy(
            "classes",
            Arc::clone(&calls),
            None,
            vec![Ok(vec![json!({"id": "c1"})])],
        );
        let store = store();

        store.ensure_fresh(&policy).await;
        let again = store.ensure_fresh(&policy).await;
        assert_eq!(calls.load(Ordering::SeqCst), 1);
        assert!(!again.is_stale);
        assert_eq!(again.records().len(), 1);
    }

    #[tokio::test]
    async fn failed_refresh_keeps_previous_data() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = scripted_policy(
            "students",
            Arc::clone(&calls),
            None,
            vec![
                Ok(vec![json!("a"), json!("b")]),
                Err(RemoteError::status(500, Some("database down".to_string()))),
            ],
        );
        let store = store();

        let first = store.ensure_fresh(&policy).await;
        assert_eq!(first.status, EntryStatus::Success);

        store.invalidate("students");
        let second = store.ensure_fresh(&policy).await;
        assert_eq!(second.status, EntryStatus::Error);
        assert_eq!(second.records(), &[json!("a"), json!("b")]);
        let error = second.error.expect("error recorded");
        assert_eq!(error.server_message(), Some("database down"));
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn first_failure_has_no_data() {
        let policy = scripted_policy(
            "rooms",
            Arc::new(AtomicUsize::new(0)),
            None,
            vec![Err(RemoteError::Timeout)],
        );
        let store = store();

        let snapshot = store.ensure_fresh(&policy).await;
        assert_eq!(snapshot.status, EntryStatus::Error);
        assert!(snapshot.data.is_none());
        assert!(snapshot.is_stale, "failed entry retries on next read");
    }

    #[tokio::test]
    async fn invalidate_is_idempotent() {
        let policy = scripted_policy(
            "exams",
            Arc::new(AtomicUsize::new(0)),
            None,
            vec![Ok(vec![json!({"id": 7})])],
        );
        let store = store();
        store.ensure_fresh(&policy).await;
        store.events().clear();

        assert!(store.invalidate("exams"));
        let once = store.read("exams");
        assert!(!store.invalidate("exams"));
        let twice = store.read("exams");

        assert!(once.is_stale && twice.is_stale);
        assert_eq!(once.status, twice.status);
        assert_eq!(once.records(), twice.records());
        assert_eq!(store.events().len(), 1, "only the first call publishes");
    }

    #[tokio::test]
    async fn invalidation_during_fetch_forces_another_fetch() {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());
        let policy = scripted_policy(
            "students",
            Arc::clone(&calls),
            Some(Arc::clone(&gate)),
            vec![Ok(vec![json!("old")]), Ok(vec![json!("new")])],
        );
        let store = store();

        let pending = store.revalidate(&policy).expect("fetch starts");
        store.invalidate("students");
        gate.notify_one();
        let settled = pending.await;
        assert_eq!(settled.records(), &[json!("old")]);
        assert!(settled.is_stale);

        gate.notify_one();
        let refreshed = store.ensure_fresh(&policy).await;
        assert_eq!(refreshed.records(), &[json!("new")]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn dropped_waiter_does_not_strand_fetch() {
        let gate = Arc::new(Notify::new());
        let policy = scripted_policy(
            "roles",
            Arc::new(AtomicUsize::new(0)),
            Some(Arc::clone(&gate)),
            vec![Ok(vec![json!({"id": "admin"})])],
        );
        let store = store();

        drop(store.revalidate(&policy));
        gate.notify_one();
        // Yield until the spawned fetch has settled the entry.
        for _ in 0..100 {
            if store.read("roles").status == EntryStatus::Success {
                break;
            }
            tokio::task::yield_now().await;
        }
        assert_eq!(store.read("roles").records(), &[json!({"id": "admin"})]);
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_evicts_only_unobserved_idle_entries() {
        let calls = Arc::new(AtomicUsize::new(0));
        let policy = scripted_policy(
            "schedules",
            Arc::clone(&calls),
            None,
            vec![Ok(vec![json!(1)]), Ok(vec![json!(2)])],
        );
        let store = store();
        store.ensure_fresh(&policy).await;

        let guard = store.attach(&policy);
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(store.sweep(), 0, "observed entries stay resident");

        drop(guard);
        assert_eq!(store.sweep(), 0, "dropping the guard counts as a read");
        tokio::time::advance(Duration::from_secs(301)).await;
        assert_eq!(store.sweep(), 1);

        let evicted = store.read("schedules");
        assert_eq!(evicted.status, EntryStatus::Idle);
        assert!(evicted.data.is_none());

        let refetched = store.ensure_fresh(&policy).await;
        assert_eq!(refetched.records(), &[json!(2)]);
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn events_follow_entry_changes() {
        let policy = scripted_policy(
            "accounts",
            Arc::new(AtomicUsize::new(0)),
            None,
            vec![Ok(vec![json!({"id": 1})])],
        );
        let store = store();
        store.ensure_fresh(&policy).await;
        store.invalidate("accounts");

        let kinds: Vec<EventKind> = store.events().drain(10).into_iter().map(|e| e.kind).collect();
        assert_eq!(
            kinds,
            vec![
                EventKind::Updated {
                    key: ResourceKey::new("accounts")
                },
                EventKind::Invalidated {
                    key: ResourceKey::new("accounts")
                },
            ]
        );
    }

    #[test]
    fn read_of_unknown_key_is_idle() {
        let snapshot = store().read("questions");
        assert_eq!(snapshot.status, EntryStatus::Idle);
        assert!(snapshot.is_stale);
    }
}
