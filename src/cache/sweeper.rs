//! Periodic eviction of unread cache entries.

use std::time::Duration;

use tokio::task::JoinHandle;
use tracing::{debug, info};

use super::store::CacheStore;

/// Background task running `CacheStore::sweep` on a fixed cadence.
pub struct CacheSweeper;

impl CacheSweeper {
    /// Spawn the sweep loop. Abort the returned handle to stop it.
    pub fn spawn(store: CacheStore, interval: Duration) -> JoinHandle<()> {
        info!(interval_ms = interval.as_millis() as u64, "Cache sweeper started");
        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(interval);
            ticker.tick().await; // Skip the first immediate tick
            loop {
                ticker.tick().await;
                let evicted = store.sweep();
                if evicted > 0 {
                    debug!(evicted, "Cache sweep finished");
                }
            }
        })
    }
}
