//! Query coordination over many cache keys.
//!
//! A `ResourceQuery` is one consumer's mount over a set of keys: it keeps
//! the keys resident while alive, starts fetches for anything stale, and
//! folds the per-key entries into a single loading/error view.

use std::sync::Arc;

use futures::future::join_all;
use tracing::{debug, warn};

use crate::cache::{
    CacheError, CacheStore, ConsumerGuard, EntrySnapshot, EntryStatus, Record, ResourceKey,
    ResourcePolicy, ResourceRegistry, unique_keys,
};

/// Entry point for reading and invalidating cached resources.
#[derive(Clone)]
pub struct QueryCoordinator {
    store: CacheStore,
    registry: Arc<ResourceRegistry>,
}

impl QueryCoordinator {
    pub fn new(store: CacheStore, registry: Arc<ResourceRegistry>) -> Self {
        Self { store, registry }
    }

    pub fn store(&self) -> &CacheStore {
        &self.store
    }

    pub fn registry(&self) -> &Arc<ResourceRegistry> {
        &self.registry
    }

    /// Mount a query over `keys` and start fetching whatever is stale.
    ///
    /// Duplicate keys are mounted once. Unknown keys are reported per key
    /// in the view and never affect the other keys.
    pub fn use_resources<I, K>(&self, keys: I) -> ResourceQuery
    where
        I: IntoIterator<Item = K>,
        K: Into<ResourceKey>,
    {
        let mounts = self.mount(unique_keys(keys));
        ResourceQuery {
            coordinator: self.clone(),
            mounts,
        }
    }

    /// Cache-read interface; never touches the network.
    pub fn read(&self, key: &str) -> EntrySnapshot {
        self.store.read(key)
    }

    /// Fetch `key` if stale and wait for the result.
    pub async fn ensure_fresh(&self, key: &str) -> Result<EntrySnapshot, CacheError> {
        let policy = self.registry.require(&ResourceKey::new(key))?;
        Ok(self.store.ensure_fresh(&policy).await)
    }

    /// Mark `key` stale and refetch it if anyone is currently showing it.
    ///
    /// Returns `true` if the entry changed. Must be called from within a
    /// tokio runtime.
    pub fn invalidate(&self, key: &str) -> bool {
        let changed = self.store.invalidate(key);
        if self.store.has_consumers(key) {
            if let Some(policy) = self.registry.get(key) {
                self.refetch_observed(policy);
            }
        }
        changed
    }

    /// Invalidate every entry, refetching the observed ones.
    pub fn invalidate_all(&self) -> usize {
        let changed = self.store.invalidate_all();
        for key in self.store.observed_keys() {
            if let Some(policy) = self.registry.get(key.as_str()) {
                self.refetch_observed(policy);
            }
        }
        debug!(changed, "Invalidated all cache entries");
        changed
    }

    /// Start (or join) a fetch for an observed key. If the key was
    /// invalidated again while that fetch was running, fetch once more so
    /// observers end up with post-invalidation data.
    fn refetch_observed(&self, policy: Arc<ResourcePolicy>) {
        let Some(pending) = self.store.revalidate(&policy) else {
            return;
        };
        let store = self.store.clone();
        tokio::spawn(async move {
            let settled = pending.await;
            if settled.status == EntryStatus::Success
                && settled.is_stale
                && store.has_consumers(policy.key().as_str())
            {
                debug!(resource = %policy.key(), "Refetching entry invalidated mid-flight");
                drop(store.revalidate(&policy));
            }
        });
    }

    fn mount(&self, keys: Vec<ResourceKey>) -> Vec<Mount> {
        keys.into_iter()
            .map(|key| match self.registry.require(&key) {
                Ok(policy) => {
                    let guard = self.store.attach(&policy);
                    drop(self.store.revalidate(&policy));
                    Mount::Registered { policy, guard }
                }
                Err(error) => {
                    warn!(resource = %key, error = %error, "Query over unregistered resource");
                    Mount::Unregistered(key)
                }
            })
            .collect()
    }
}

enum Mount {
    Registered {
        policy: Arc<ResourcePolicy>,
        guard: ConsumerGuard,
    },
    Unregistered(ResourceKey),
}

impl Mount {
    fn key(&self) -> &ResourceKey {
        match self {
            Mount::Registered { guard, .. } => guard.key(),
            Mount::Unregistered(key) => key,
        }
    }
}

/// One consumer's live query over a set of keys.
///
/// Dropping the query releases the keys; their entries become eligible for
/// eviction once their windows lapse.
pub struct ResourceQuery {
    coordinator: QueryCoordinator,
    mounts: Vec<Mount>,
}

impl ResourceQuery {
    pub fn keys(&self) -> Vec<ResourceKey> {
        self.mounts.iter().map(|mount| mount.key().clone()).collect()
    }

    /// Current combined state of all mounted keys.
    ///
    /// Reading through the query refetches keys that went stale or were
    /// evicted since the last look, the same way a re-render would.
    pub fn view(&self) -> ResourcesView {
        let store = &self.coordinator.store;
        let entries = self
            .mounts
            .iter()
            .map(|mount| match mount {
                Mount::Registered { policy, .. } => {
                    let snapshot = store.read(policy.key().as_str());
                    let settled = matches!(snapshot.status, EntryStatus::Idle | EntryStatus::Success);
                    if snapshot.is_stale && settled {
                        drop(store.revalidate(policy));
                        KeyView::Entry(store.peek(policy.key().as_str()))
                    } else {
                        KeyView::Entry(snapshot)
                    }
                }
                Mount::Unregistered(key) => KeyView::Unregistered(key.clone()),
            })
            .collect();
        ResourcesView::new(entries)
    }

    /// Wait for every fetch currently running for the mounted keys, then
    /// return the resulting view.
    pub async fn settled(&self) -> ResourcesView {
        let store = &self.coordinator.store;
        let pending: Vec<_> = self
            .mounts
            .iter()
            .filter_map(|mount| store.in_flight(mount.key().as_str()))
            .collect();
        join_all(pending).await;

        let entries = self
            .mounts
            .iter()
            .map(|mount| match mount {
                Mount::Registered { policy, .. } => {
                    KeyView::Entry(store.read(policy.key().as_str()))
                }
                Mount::Unregistered(key) => KeyView::Unregistered(key.clone()),
            })
            .collect();
        ResourcesView::new(entries)
    }

    /// Remount over a different key set.
    pub fn set_keys<I, K>(&mut self, keys: I)
    where
        I: IntoIterator<Item = K>,
        K: Into<ResourceKey>,
    {
        let mounts = self.coordinator.mount(unique_keys(keys));
        // New guards are taken before the old ones drop so shared keys
        // never look unobserved.
        self.mounts = mounts;
    }

    /// Refetch every mounted key regardless of freshness.
    pub fn refresh(&self) {
        for mount in &self.mounts {
            if let Mount::Registered { policy, .. } = mount {
                self.coordinator.invalidate(policy.key().as_str());
            }
        }
    }
}

#[derive(Debug, Clone)]
enum KeyView {
    Entry(EntrySnapshot),
    Unregistered(ResourceKey),
}

/// Aggregated state of a query, in mount order.
#[derive(Debug, Clone)]
pub struct ResourcesView {
    entries: Vec<KeyView>,
    /// At least one key is in its first load (no data yet).
    pub is_loading: bool,
    /// At least one key failed its last fetch or is not registered.
    pub has_error: bool,
}

impl ResourcesView {
    fn new(entries: Vec<KeyView>) -> Self {
        let is_loading = entries.iter().any(|entry| match entry {
            KeyView::Entry(snapshot) => snapshot.is_initial_load(),
            KeyView::Unregistered(_) => false,
        });
        let has_error = entries.iter().any(|entry| match entry {
            KeyView::Entry(snapshot) => snapshot.has_error(),
            KeyView::Unregistered(_) => true,
        });
        Self {
            entries,
            is_loading,
            has_error,
        }
    }

    /// Snapshot for `key`, or `None` if it is unmounted or unregistered.
    pub fn get(&self, key: &str) -> Option<&EntrySnapshot> {
        self.entries.iter().find_map(|entry| match entry {
            KeyView::Entry(snapshot) if snapshot.key.as_str() == key => Some(snapshot),
            _ => None,
        })
    }

    /// Cached rows for `key`; empty while loading, failed without prior
    /// data, or unknown.
    pub fn data(&self, key: &str) -> &[Record] {
        self.get(key).map(EntrySnapshot::records).unwrap_or(&[])
    }

    pub fn snapshots(&self) -> impl Iterator<Item = &EntrySnapshot> {
        self.entries.iter().filter_map(|entry| match entry {
            KeyView::Entry(snapshot) => Some(snapshot),
            KeyView::Unregistered(_) => None,
        })
    }

    pub fn unregistered(&self) -> impl Iterator<Item = &ResourceKey> {
        self.entries.iter().filter_map(|entry| match entry {
            KeyView::Unregistered(key) => Some(key),
            KeyView::Entry(_) => None,
        })
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use serde_json::json;
    use tokio::sync::Notify;

    use super::*;
    use crate::cache::EventQueue;
    use crate::domain::error::RemoteError;

    struct Fixture {
        queries: QueryCoordinator,
        calls: Arc<AtomicUsize>,
        gate: Arc<Notify>,
    }

    /// `students` succeeds once `gate` is notified; `classes` answers at
    /// once; `rooms` always fails.
    fn fixture() -> Fixture {
        let calls = Arc::new(AtomicUsize::new(0));
        let gate = Arc::new(Notify::new());

        let students_calls = Arc::clone(&calls);
        let students_gate = Arc::clone(&gate);
        let students = ResourcePolicy::new(
            "students",
            Duration::from_secs(60),
            Duration::from_secs(300),
            move || {
                let calls = Arc::clone(&students_calls);
                let gate = Arc::clone(&students_gate);
                async move {
                    let call = calls.fetch_add(1, Ordering::SeqCst);
                    gate.notified().await;
                    Ok(vec![json!({"id": "s1", "call": call})])
                }
            },
        );
        let classes = ResourcePolicy::new(
            "classes",
            Duration::from_secs(60),
            Duration::from_secs(300),
            || async { Ok(vec![json!({"id": "c1"})]) },
        );
        let rooms = ResourcePolicy::new(
            "rooms",
            Duration::from_secs(60),
            Duration::from_secs(300),
            || async { Err(RemoteError::status(503, None)) },
        );

        let registry = ResourceRegistry::builder()
            .register(students)
            .and_then(|b| b.register(classes))
            .and_then(|b| b.register(rooms))
            .expect("registry builds")
            .build();
        let store = CacheStore::new(Arc::new(EventQueue::new()));

        Fixture {
            queries: QueryCoordinator::new(store, Arc::new(registry)),
            calls,
            gate,
        }
    }

    #[tokio::test]
    async fn loading_until_every_key_has_data() {
        let fx = fixture();
        let query = fx.queries.use_resources(["students", "classes"]);

        let view = query.view();
        assert!(view.is_loading);
        assert!(!view.has_error);

        fx.gate.notify_one();
        let view = query.settled().await;
        assert!(!view.is_loading);
        assert_eq!(view.data("students").len(), 1);
        assert_eq!(view.data("classes"), &[json!({"id": "c1"})]);
    }

    #[tokio::test]
    async fn background_revalidation_does_not_flip_loading() {
        let fx = fixture();
        let query = fx.queries.use_resources(["students"]);
        fx.gate.notify_one();
        query.settled().await;

        fx.queries.invalidate("students");
        let view = query.view();
        let students = view.get("students").expect("mounted");
        assert_eq!(students.status, EntryStatus::Loading);
        assert!(!view.is_loading, "data is already on screen");
        assert_eq!(view.data("students").len(), 1);

        fx.gate.notify_one();
        let view = query.settled().await;
        assert_eq!(view.data("students"), &[json!({"id": "s1", "call": 1})]);
        assert_eq!(fx.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn one_failing_key_does_not_block_the_others() {
        let fx = fixture();
        let query = fx.queries.use_resources(["classes", "rooms"]);
        let view = query.settled().await;

        assert!(view.has_error);
        assert!(!view.is_loading);
        assert_eq!(view.data("classes").len(), 1);
        assert!(view.data("rooms").is_empty());
        let rooms = view.get("rooms").expect("mounted");
        assert_eq!(rooms.status, EntryStatus::Error);
    }

    #[tokio::test]
    async fn unknown_keys_surface_as_errors() {
        let fx = fixture();
        let query = fx.queries.use_resources(["classes", "grades", "classes"]);
        let view = query.settled().await;

        assert_eq!(query.keys().len(), 2);
        assert!(view.has_error);
        let unknown: Vec<&str> = view.unregistered().map(ResourceKey::as_str).collect();
        assert_eq!(unknown, vec!["grades"]);
        assert_eq!(view.data("classes").len(), 1);
    }

    #[tokio::test]
    async fn dropping_the_query_releases_its_keys() {
        let fx = fixture();
        let mut query = fx.queries.use_resources(["classes"]);
        query.settled().await;
        assert!(fx.queries.store().has_consumers("classes"));

        query.set_keys(["rooms"]);
        assert!(!fx.queries.store().has_consumers("classes"));
        assert!(fx.queries.store().has_consumers("rooms"));

        drop(query);
        assert!(fx.queries.store().observed_keys().is_empty());
    }

    #[tokio::test]
    async fn invalidate_without_consumers_only_marks_stale() {
        let fx = fixture();
        fx.queries.ensure_fresh("classes").await.expect("registered");

        assert!(fx.queries.invalidate("classes"));
        let snapshot = fx.queries.read("classes");
        assert!(snapshot.is_stale);
        assert_eq!(snapshot.status, EntryStatus::Success);
        assert!(fx.queries.store().in_flight("classes").is_none());
    }

    #[tokio::test]
    async fn ensure_fresh_rejects_unknown_key() {
        let fx = fixture();
        let err = fx
            .queries
            .ensure_fresh("grades")
            .await
            .expect_err("not registered");
        assert!(matches!(err, CacheError::UnknownResource(_)));
    }
}
