//! Server-state cache.
//!
//! Keyed collections fetched from the API, with stale-while-revalidate
//! semantics:
//!
//! - **Registry**: static table of resource keys and their fetch policies
//! - **Store**: the single owner of cached data; de-duplicates concurrent
//!   fetches and keeps the last good data across failed refreshes
//! - **Events**: every observable change is published for projections
//!
//! ## Configuration
//!
//! Freshness and eviction windows are controlled via `examdash.toml`:
//!
//! ```toml
//! [cache]
//! default_stale_seconds = 60
//! default_evict_seconds = 300
//! sweep_interval_ms = 30000
//! # ... see config.rs for all options
//! ```

mod config;
mod entry;
mod error;
mod events;
mod keys;
mod lock;
mod planner;
mod registry;
mod store;
mod sweeper;

pub use config::CacheConfig;
pub use entry::{EntrySnapshot, EntryStatus, PendingFetch};
pub use error::{CacheError, FetchError};
pub use events::{CacheEvent, Epoch, EventKind, EventQueue};
pub use keys::{ResourceKey, unique_keys};
pub use planner::SyncPlan;
pub use registry::{
    Collection, FetchFuture, Record, RegistryBuilder, ResourceFetcher, ResourcePolicy,
    ResourceRegistry,
};
pub use store::{CacheStore, ConsumerGuard};
pub use sweeper::CacheSweeper;

pub(crate) use lock::{mutex_lock, rw_read, rw_write};
pub(crate) use events::{METRIC_EVENT_DROPPED, METRIC_EVENT_QUEUE_LEN};
pub(crate) use store::{
    METRIC_DEDUP_TOTAL, METRIC_EVICT_TOTAL, METRIC_FETCH_ERROR_TOTAL, METRIC_FETCH_MS,
    METRIC_FETCH_TOTAL, METRIC_INVALIDATE_TOTAL,
};
