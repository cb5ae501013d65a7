//! Wiring of the cache, coordinators and client mirror for one dashboard
//! session.

use std::sync::Arc;

use tokio::task::JoinHandle;
use tracing::info;

use crate::cache::{
    CacheConfig, CacheError, CacheStore, CacheSweeper, EventQueue, ResourceFetcher, ResourceKey,
    ResourcePolicy, ResourceRegistry, unique_keys,
};
use crate::domain::resources::Resource;

use super::filter::SearchFilter;
use super::mirror::ClientMirror;
use super::mutation::MutationCoordinator;
use super::notify::Notifier;
use super::query::QueryCoordinator;
use super::reload::{ReloadError, Reloader};

/// Registry of every catalog resource, fetched through `fetcher`.
pub fn catalog_registry(
    fetcher: Arc<dyn ResourceFetcher>,
    config: &CacheConfig,
) -> Result<ResourceRegistry, CacheError> {
    Resource::ALL
        .into_iter()
        .try_fold(ResourceRegistry::builder(), |builder, resource| {
            builder.register(ResourcePolicy::from_fetcher(
                resource.key(),
                resource
                    .stale_after()
                    .unwrap_or_else(|| config.default_stale_after()),
                config.default_evict_after(),
                Arc::clone(&fetcher),
            ))
        })
        .map(|builder| builder.build())
}

pub struct Dashboard {
    queries: QueryCoordinator,
    mutations: MutationCoordinator,
    mirror: Arc<ClientMirror>,
    config: CacheConfig,
}

impl Dashboard {
    pub fn new(
        fetcher: Arc<dyn ResourceFetcher>,
        config: CacheConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Result<Self, CacheError> {
        let registry = catalog_registry(fetcher, &config)?;
        Ok(Self::with_registry(registry, config, notifier))
    }

    pub fn with_registry(
        registry: ResourceRegistry,
        config: CacheConfig,
        notifier: Arc<dyn Notifier>,
    ) -> Self {
        let events = Arc::new(EventQueue::new_with_limit(config.event_queue_limit));
        let store = CacheStore::new(events);
        let queries = QueryCoordinator::new(store.clone(), Arc::new(registry));
        let mirror = Arc::new(ClientMirror::new(store, config.sync_batch_limit));
        let mutations =
            MutationCoordinator::new(queries.clone(), notifier).with_dispatcher(mirror.clone());

        Self {
            queries,
            mutations,
            mirror,
            config,
        }
    }

    pub fn queries(&self) -> &QueryCoordinator {
        &self.queries
    }

    pub fn mutations(&self) -> &MutationCoordinator {
        &self.mutations
    }

    pub fn mirror(&self) -> &Arc<ClientMirror> {
        &self.mirror
    }

    pub fn config(&self) -> &CacheConfig {
        &self.config
    }

    /// Search filter using the configured debounce window.
    pub fn search<T, I, K>(&self, keys: I) -> SearchFilter<T>
    where
        I: IntoIterator<Item = K>,
        K: Into<String>,
    {
        SearchFilter::new(keys, self.config.search_debounce())
    }

    /// Reloader that invalidates `keys` and waits for fresh data.
    ///
    /// A key whose refetch fails turns the reload into a failure; the
    /// previous data stays cached either way.
    pub fn reloader<I, K>(&self, keys: I) -> Reloader
    where
        I: IntoIterator<Item = K>,
        K: Into<ResourceKey>,
    {
        let keys = unique_keys(keys);
        let queries = self.queries.clone();
        Reloader::new(move || {
            let queries = queries.clone();
            let keys = keys.clone();
            async move {
                for key in &keys {
                    queries.invalidate(key.as_str());
                }
                for key in &keys {
                    let snapshot = queries.ensure_fresh(key.as_str()).await?;
                    if let Some(error) = snapshot.error {
                        return Err(ReloadError::from(CacheError::from(error)));
                    }
                }
                Ok(())
            }
        })
    }

    /// Spawn the eviction sweep and the mirror sync loop.
    pub fn start_background(&self) -> BackgroundTasks {
        let sweeper = CacheSweeper::spawn(
            self.queries.store().clone(),
            self.config.sweep_interval(),
        );
        let mirror_sync = Arc::clone(&self.mirror).spawn_sync(self.config.mirror_sync_interval());
        info!("Dashboard background tasks started");
        BackgroundTasks {
            handles: vec![sweeper, mirror_sync],
        }
    }
}

/// Background loops of a dashboard; stopped on drop.
pub struct BackgroundTasks {
    handles: Vec<JoinHandle<()>>,
}

impl Drop for BackgroundTasks {
    fn drop(&mut self) {
        for handle in &self.handles {
            handle.abort();
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    use async_trait::async_trait;
    use serde_json::json;

    use super::*;
    use crate::application::notify::TracingNotifier;
    use crate::application::reload::ReloadOutcome;
    use crate::cache::Record;
    use crate::domain::error::RemoteError;

    #[derive(Default)]
    struct CountingFetcher {
        calls: AtomicUsize,
        fail_rooms: bool,
    }

    #[async_trait]
    impl ResourceFetcher for CountingFetcher {
        async fn fetch(&self, key: &ResourceKey) -> Result<Vec<Record>, RemoteError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if self.fail_rooms && key.as_str() == "rooms" {
                return Err(RemoteError::status(500, Some("rooms offline".to_string())));
            }
            Ok(vec![json!({"id": key.as_str()})])
        }
    }

    #[test]
    fn catalog_uses_resource_overrides() {
        let config = CacheConfig::default();
        let registry =
            catalog_registry(Arc::new(CountingFetcher::default()), &config).expect("builds");

        assert_eq!(registry.len(), Resource::ALL.len());
        let roles = registry.get("roles").expect("roles registered");
        assert_eq!(roles.stale_after(), Duration::from_secs(600));
        let students = registry.get("students").expect("students registered");
        assert_eq!(students.stale_after(), config.default_stale_after());
    }

    #[tokio::test]
    async fn reloader_refetches_listed_keys() {
        let fetcher = Arc::new(CountingFetcher::default());
        let dashboard = Dashboard::new(
            fetcher.clone(),
            CacheConfig::default(),
            Arc::new(TracingNotifier),
        )
        .expect("dashboard builds");
        dashboard
            .queries()
            .ensure_fresh("students")
            .await
            .expect("registered");

        let reloader = dashboard.reloader(["students", "classes"]);
        assert!(matches!(reloader.handle_reload().await, ReloadOutcome::Completed));
        assert_eq!(fetcher.calls.load(Ordering::SeqCst), 3);
        assert!(!dashboard.queries().read("students").is_stale);
    }

    #[tokio::test]
    async fn reloader_reports_fetch_failures() {
        let fetcher = Arc::new(CountingFetcher {
            fail_rooms: true,
            ..Default::default()
        });
        let dashboard = Dashboard::new(fetcher, CacheConfig::default(), Arc::new(TracingNotifier))
            .expect("dashboard builds");

        let outcome = dashboard.reloader(["rooms"]).handle_reload().await;
        match outcome {
            ReloadOutcome::Failed(ReloadError::Cache(CacheError::Fetch(error))) => {
                assert_eq!(error.server_message(), Some("rooms offline"));
            }
            other => panic!("unexpected outcome: {other:?}"),
        }
    }
}
