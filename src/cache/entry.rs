//! Per-key cache entry and the read-only snapshot handed to consumers.

use std::time::Duration;

use futures::future::{BoxFuture, Shared};
use serde::de::DeserializeOwned;
use tokio::time::Instant;

use super::error::{CacheError, FetchError};
use super::keys::ResourceKey;
use super::registry::{Collection, Record, ResourcePolicy};

/// Lifecycle state of a cache entry.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum EntryStatus {
    Idle,
    Loading,
    Success,
    Error,
}

impl EntryStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            EntryStatus::Idle => "idle",
            EntryStatus::Loading => "loading",
            EntryStatus::Success => "success",
            EntryStatus::Error => "error",
        }
    }
}

/// A fetch that callers can join; resolves to the entry as settled by that fetch.
pub type PendingFetch = Shared<BoxFuture<'static, EntrySnapshot>>;

pub(crate) struct InFlight {
    pub(crate) id: u64,
    pub(crate) shared: PendingFetch,
}

pub(crate) struct CacheEntry {
    pub(crate) key: ResourceKey,
    pub(crate) data: Option<Collection>,
    pub(crate) fetched_at: Option<Instant>,
    pub(crate) stale_after: Duration,
    pub(crate) evict_after: Duration,
    pub(crate) status: EntryStatus,
    pub(crate) error: Option<FetchError>,
    pub(crate) in_flight: Option<InFlight>,
    /// Set by invalidation or a failed fetch; cleared when a fetch starts.
    pub(crate) invalidated: bool,
    pub(crate) last_read: Instant,
    pub(crate) consumers: usize,
}

impl CacheEntry {
    pub(crate) fn new(policy: &ResourcePolicy, now: Instant) -> Self {
        Self {
            key: policy.key().clone(),
            data: None,
            fetched_at: None,
            stale_after: policy.stale_after(),
            evict_after: policy.evict_after(),
            status: EntryStatus::Idle,
            error: None,
            in_flight: None,
            invalidated: false,
            last_read: now,
            consumers: 0,
        }
    }

    pub(crate) fn is_stale(&self, now: Instant) -> bool {
        if self.invalidated {
            return true;
        }
        match self.fetched_at {
            Some(fetched_at) => now.saturating_duration_since(fetched_at) > self.stale_after,
            None => true,
        }
    }

    pub(crate) fn is_evictable(&self, now: Instant) -> bool {
        self.in_flight.is_none()
            && self.consumers == 0
            && (self.data.is_some() || self.status != EntryStatus::Idle)
            && now.saturating_duration_since(self.last_read) >= self.evict_after
    }

    pub(crate) fn reset(&mut self) {
        self.data = None;
        self.fetched_at = None;
        self.status = EntryStatus::Idle;
        self.error = None;
        self.invalidated = false;
    }

    pub(crate) fn snapshot(&self, now: Instant) -> EntrySnapshot {
        EntrySnapshot {
            key: self.key.clone(),
            data: self.data.clone(),
            status: self.status,
            error: self.error.clone(),
            is_stale: self.is_stale(now),
            fetched_at: self.fetched_at,
        }
    }
}

/// Point-in-time view of one cache entry.
///
/// `data` survives failed refreshes: an entry in `Error` status may still
/// carry the last good collection.
#[derive(Debug, Clone)]
pub struct EntrySnapshot {
    pub key: ResourceKey,
    pub data: Option<Collection>,
    pub status: EntryStatus,
    pub error: Option<FetchError>,
    pub is_stale: bool,
    pub fetched_at: Option<Instant>,
}

impl EntrySnapshot {
    /// Snapshot for a key the store has never seen.
    pub fn idle(key: ResourceKey) -> Self {
        Self {
            key,
            data: None,
            status: EntryStatus::Idle,
            error: None,
            is_stale: true,
            fetched_at: None,
        }
    }

    pub fn is_loading(&self) -> bool {
        self.status == EntryStatus::Loading
    }

    /// Loading with nothing to show yet, as opposed to a background refresh.
    pub fn is_initial_load(&self) -> bool {
        self.is_loading() && self.data.is_none()
    }

    pub fn has_error(&self) -> bool {
        self.error.is_some()
    }

    /// Cached rows, or an empty slice before the first successful fetch.
    pub fn records(&self) -> &[Record] {
        self.data.as_deref().unwrap_or(&[])
    }

    /// Decode the cached rows into typed records.
    pub fn decode<T: DeserializeOwned>(&self) -> Result<Vec<T>, CacheError> {
        let data = self
            .data
            .as_ref()
            .ok_or_else(|| CacheError::NotLoaded(self.key.clone()))?;
        data.iter()
            .map(|record| {
                serde_json::from_value(record.clone()).map_err(|source| CacheError::Decode {
                    resource: self.key.clone(),
                    source,
                })
            })
            .collect()
    }
}
