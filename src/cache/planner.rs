//! Sync plan generation.
//!
//! Merges a batch of cache events into the set of changes a projection has
//! to apply, keeping only the latest event per key.

use std::collections::{BTreeSet, HashMap, HashSet};
use std::fmt;

use super::events::{CacheEvent, EventKind};
use super::keys::ResourceKey;

/// What a projection must do to catch up with the store.
#[derive(Debug, Default)]
pub struct SyncPlan {
    /// Keys whose data was replaced; re-derive from the store.
    pub refresh: BTreeSet<ResourceKey>,
    /// Keys whose data was evicted; drop the projected slice.
    pub clear: BTreeSet<ResourceKey>,
    /// Keys now stale but still holding data (invalidated or failed refresh).
    pub stale: BTreeSet<ResourceKey>,
}

impl fmt::Display for SyncPlan {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "SyncPlan {{ refresh: {}, clear: {}, stale: {} }}",
            self.refresh.len(),
            self.clear.len(),
            self.stale.len(),
        )
    }
}

impl SyncPlan {
    /// Merge events into a plan.
    ///
    /// - Deduplicates by event ID
    /// - Keeps the latest epoch per key
    pub fn from_events(events: Vec<CacheEvent>) -> Self {
        let mut plan = Self::default();
        let mut seen_ids = HashSet::new();
        let mut latest: HashMap<ResourceKey, (u64, EventKind)> = HashMap::new();

        for event in events.into_iter().filter(|e| seen_ids.insert(e.id)) {
            latest
                .entry(event.kind.key().clone())
                .and_modify(|(epoch, kind)| {
                    if event.epoch > *epoch {
                        *epoch = event.epoch;
                        *kind = event.kind.clone();
                    }
                })
                .or_insert((event.epoch, event.kind));
        }

        for (key, (_, kind)) in latest {
            match kind {
                EventKind::Updated { .. } => {
                    plan.refresh.insert(key);
                }
                EventKind::Evicted { .. } => {
                    plan.clear.insert(key);
                }
                EventKind::Invalidated { .. } | EventKind::FetchFailed { .. } => {
                    plan.stale.insert(key);
                }
            }
        }

        plan
    }

    pub fn is_empty(&self) -> bool {
        self.refresh.is_empty() && self.clear.is_empty() && self.stale.is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn updated(name: &str, epoch: u64) -> CacheEvent {
        CacheEvent::new(
            EventKind::Updated {
                key: ResourceKey::new(name),
            },
            epoch,
        )
    }

    fn evicted(name: &str, epoch: u64) -> CacheEvent {
        CacheEvent::new(
            EventKind::Evicted {
                key: ResourceKey::new(name),
            },
            epoch,
        )
    }

    #[test]
    fn groups_events_by_outcome() {
        let events = vec![
            updated("students", 0),
            evicted("rooms", 1),
            CacheEvent::new(
                EventKind::FetchFailed {
                    key: ResourceKey::new("classes"),
                    message: "boom".to_string(),
                },
                2,
            ),
        ];
        let plan = SyncPlan::from_events(events);

        assert!(plan.refresh.contains("students"));
        assert!(plan.clear.contains("rooms"));
        assert!(plan.stale.contains("classes"));
    }

    #[test]
    fn keeps_latest_epoch_per_key() {
        // Evicted after an update: the slice goes away.
        let plan = SyncPlan::from_events(vec![updated("students", 0), evicted("students", 1)]);
        assert!(plan.clear.contains("students"));
        assert!(plan.refresh.is_empty());

        // Arrival order does not matter, the epoch does.
        let plan = SyncPlan::from_events(vec![updated("students", 5), evicted("students", 3)]);
        assert!(plan.refresh.contains("students"));
        assert!(plan.clear.is_empty());
    }

    #[test]
    fn dedupe_by_event_id() {
        let event = updated("exams", 0);
        let plan = SyncPlan::from_events(vec![event.clone(), event]);
        assert_eq!(plan.refresh.len(), 1);
    }

    #[test]
    fn display_and_empty() {
        let plan = SyncPlan::default();
        assert!(plan.is_empty());
        assert_eq!(plan.to_string(), "SyncPlan { refresh: 0, clear: 0, stale: 0 }");
    }
}
