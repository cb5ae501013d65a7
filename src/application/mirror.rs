//! Normalized client store, kept as a projection of the cache.
//!
//! The mirror never fetches and never writes back to the cache. It drains
//! cache events, merges them into a `SyncPlan` and re-derives each touched
//! slice from the store's current snapshot. Selection state lives only
//! here and is pruned to the ids that survive a re-derivation.

use std::collections::{BTreeSet, HashMap};
use std::sync::{Arc, RwLock};
use std::time::Duration;

use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

use crate::cache::{CacheStore, Record, ResourceKey, SyncPlan, rw_read, rw_write};

const SOURCE: &str = "application::mirror";
const ID_FIELD: &str = "id";

/// Writes to the client store issued by the dashboard.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum StoreAction {
    Select { resource: ResourceKey, id: String },
    Deselect { resource: ResourceKey, id: String },
    ClearSelection { resource: ResourceKey },
    /// A write to `resource` succeeded; catch up with the cache.
    Mutated { resource: ResourceKey },
}

pub trait Dispatcher: Send + Sync {
    fn dispatch(&self, action: StoreAction);
}

#[derive(Debug, Default)]
struct Slice {
    order: Vec<String>,
    by_id: HashMap<String, Record>,
    selected: BTreeSet<String>,
    stale: bool,
}

pub struct ClientMirror {
    store: CacheStore,
    slices: RwLock<HashMap<ResourceKey, Slice>>,
    batch_limit: usize,
}

impl ClientMirror {
    pub fn new(store: CacheStore, batch_limit: usize) -> Self {
        Self {
            store,
            slices: RwLock::new(HashMap::new()),
            batch_limit: batch_limit.max(1),
        }
    }

    /// Drain pending cache events and apply them.
    pub fn sync(&self) -> SyncPlan {
        let events = self.store.events().drain(self.batch_limit);
        if events.is_empty() {
            return SyncPlan::default();
        }
        let plan = SyncPlan::from_events(events);

        let mut slices = rw_write(&self.slices, SOURCE, "sync");
        for key in &plan.refresh {
            let snapshot = self.store.peek(key.as_str());
            let slice = slices.entry(key.clone()).or_default();
            derive_slice(key, slice, snapshot.records());
            slice.stale = snapshot.is_stale;
        }
        for key in &plan.clear {
            slices.remove(key.as_str());
        }
        for key in &plan.stale {
            if let Some(slice) = slices.get_mut(key.as_str()) {
                slice.stale = true;
            }
        }
        drop(slices);

        debug!(plan = %plan, "Client mirror synced");
        plan
    }

    /// Run `sync` on a fixed cadence until the handle is aborted.
    pub fn spawn_sync(self: Arc<Self>, interval: Duration) -> JoinHandle<()> {
        info!(interval_ms = interval.as_millis() as u64, "Client mirror sync started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            loop {
                ticker.tick().await;
                self.sync();
            }
        })
    }

    /// Record `id` of `resource`, if mirrored.
    pub fn get(&self, resource: &str, id: &str) -> Option<Record> {
        rw_read(&self.slices, SOURCE, "get")
            .get(resource)
            .and_then(|slice| slice.by_id.get(id).cloned())
    }

    /// Mirrored records of `resource`, in server order.
    pub fn records(&self, resource: &str) -> Vec<Record> {
        rw_read(&self.slices, SOURCE, "records")
            .get(resource)
            .map(|slice| {
                slice
                    .order
                    .iter()
                    .filter_map(|id| slice.by_id.get(id).cloned())
                    .collect()
            })
            .unwrap_or_default()
    }

    pub fn ids(&self, resource: &str) -> Vec<String> {
        rw_read(&self.slices, SOURCE, "ids")
            .get(resource)
            .map(|slice| slice.order.clone())
            .unwrap_or_default()
    }

    pub fn selected(&self, resource: &str) -> Vec<String> {
        rw_read(&self.slices, SOURCE, "selected")
            .get(resource)
            .map(|slice| slice.selected.iter().cloned().collect())
            .unwrap_or_default()
    }

    pub fn contains(&self, resource: &str) -> bool {
        rw_read(&self.slices, SOURCE, "contains").contains_key(resource)
    }

    pub fn is_stale(&self, resource: &str) -> bool {
        rw_read(&self.slices, SOURCE, "is_stale")
            .get(resource)
            .is_some_and(|slice| slice.stale)
    }
}

impl Dispatcher for ClientMirror {
    fn dispatch(&self, action: StoreAction) {
        debug!(action = ?action, "Client store action");
        match action {
            StoreAction::Select { resource, id } => {
                let mut slices = rw_write(&self.slices, SOURCE, "select");
                match slices.get_mut(resource.as_str()) {
                    Some(slice) if slice.by_id.contains_key(&id) => {
                        slice.selected.insert(id);
                    }
                    _ => debug!(resource = %resource, id = %id, "Ignoring selection of unknown record"),
                }
            }
            StoreAction::Deselect { resource, id } => {
                if let Some(slice) = rw_write(&self.slices, SOURCE, "deselect").get_mut(resource.as_str()) {
                    slice.selected.remove(&id);
                }
            }
            StoreAction::ClearSelection { resource } => {
                if let Some(slice) = rw_write(&self.slices, SOURCE, "clear_selection").get_mut(resource.as_str()) {
                    slice.selected.clear();
                }
            }
            StoreAction::Mutated { .. } => {
                self.sync();
            }
        }
    }
}

fn derive_slice(key: &ResourceKey, slice: &mut Slice, records: &[Record]) {
    let mut order = Vec::with_capacity(records.len());
    let mut by_id = HashMap::with_capacity(records.len());
    let mut skipped = 0usize;

    for record in records {
        match record_id(record) {
            Some(id) => {
                if by_id.insert(id.clone(), record.clone()).is_none() {
                    order.push(id);
                }
            }
            None => skipped += 1,
        }
    }
    if skipped > 0 {
        warn!(resource = %key, skipped, "Records without an id left out of the client store");
    }

    slice.selected.retain(|id| by_id.contains_key(id));
    slice.order = order;
    slice.by_id = by_id;
}

fn record_id(record: &Record) -> Option<String> {
    match record.get(ID_FIELD)? {
        Value::String(id) if !id.is_empty() => Some(id.clone()),
        Value::Number(id) => Some(id.to_string()),
        _ => None,
    }
}
