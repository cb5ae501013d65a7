//! Cache configuration.
//!
//! Defaults for freshness, eviction and the background loops. Per-resource
//! policies may override the freshness windows.

use std::time::Duration;

use serde::Deserialize;

const DEFAULT_STALE_AFTER_MS: u64 = 60_000;
const DEFAULT_EVICT_AFTER_MS: u64 = 5 * 60_000;
const DEFAULT_SWEEP_INTERVAL_MS: u64 = 30_000;
const DEFAULT_MIRROR_SYNC_INTERVAL_MS: u64 = 1_000;
const DEFAULT_SEARCH_DEBOUNCE_MS: u64 = 300;
const DEFAULT_EVENT_QUEUE_LIMIT: usize = 1024;
const DEFAULT_SYNC_BATCH_LIMIT: usize = 256;

#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct CacheConfig {
    /// Age after which data is refetched on the next read (ms).
    pub default_stale_after_ms: u64,
    /// Idle time after which unread data is discarded (ms).
    pub default_evict_after_ms: u64,
    /// Cadence of the eviction sweep (ms).
    pub sweep_interval_ms: u64,
    /// Cadence of the client mirror's event drain (ms).
    pub mirror_sync_interval_ms: u64,
    /// Quiet period before a search input is committed (ms).
    pub search_debounce_ms: u64,
    /// Maximum pending cache events before the oldest are dropped.
    pub event_queue_limit: usize,
    /// Maximum events handled per mirror sync.
    pub sync_batch_limit: usize,
}

impl Default for CacheConfig {
    fn default() -> Self {
        Self {
            default_stale_after_ms: DEFAULT_STALE_AFTER_MS,
            default_evict_after_ms: DEFAULT_EVICT_AFTER_MS,
            sweep_interval_ms: DEFAULT_SWEEP_INTERVAL_MS,
            mirror_sync_interval_ms: DEFAULT_MIRROR_SYNC_INTERVAL_MS,
            search_debounce_ms: DEFAULT_SEARCH_DEBOUNCE_MS,
            event_queue_limit: DEFAULT_EVENT_QUEUE_LIMIT,
            sync_batch_limit: DEFAULT_SYNC_BATCH_LIMIT,
        }
    }
}

impl From<&crate::config::CacheSettings> for CacheConfig {
    fn from(settings: &crate::config::CacheSettings) -> Self {
        Self {
            default_stale_after_ms: duration_ms(settings.default_stale_after),
            default_evict_after_ms: duration_ms(settings.default_evict_after),
            sweep_interval_ms: duration_ms(settings.sweep_interval),
            mirror_sync_interval_ms: duration_ms(settings.mirror_sync_interval),
            search_debounce_ms: duration_ms(settings.search_debounce),
            event_queue_limit: settings.event_queue_limit.get(),
            sync_batch_limit: DEFAULT_SYNC_BATCH_LIMIT,
        }
    }
}

impl CacheConfig {
    pub fn default_stale_after(&self) -> Duration {
        Duration::from_millis(self.default_stale_after_ms)
    }

    pub fn default_evict_after(&self) -> Duration {
        Duration::from_millis(self.default_evict_after_ms)
    }

    /// Sweep cadence, clamped to at least one millisecond.
    pub fn sweep_interval(&self) -> Duration {
        Duration::from_millis(self.sweep_interval_ms.max(1))
    }

    /// Mirror sync cadence, clamped to at least one millisecond.
    pub fn mirror_sync_interval(&self) -> Duration {
        Duration::from_millis(self.mirror_sync_interval_ms.max(1))
    }

    pub fn search_debounce(&self) -> Duration {
        Duration::from_millis(self.search_debounce_ms)
    }
}

fn duration_ms(value: Duration) -> u64 {
    u64::try_from(value.as_millis()).unwrap_or(u64::MAX)
}
