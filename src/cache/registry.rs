//! Resource registry.
//!
//! Static table mapping each resource key to how it is fetched and how long
//! its data stays fresh and resident. Frozen once built.

use std::collections::HashMap;
use std::fmt;
use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use async_trait::async_trait;
use futures::FutureExt;
use futures::future::BoxFuture;

use crate::domain::error::RemoteError;

use super::error::CacheError;
use super::keys::ResourceKey;

/// One row of a cached collection, as delivered by the API.
pub type Record = serde_json::Value;

/// An immutable cached collection. Shared between readers; nobody can
/// mutate a collection another reader holds.
pub type Collection = Arc<[Record]>;

pub type FetchFuture = BoxFuture<'static, Result<Vec<Record>, RemoteError>>;

type FetchFn = Arc<dyn Fn() -> FetchFuture + Send + Sync>;

/// Source of collections for the cache.
#[async_trait]
pub trait ResourceFetcher: Send + Sync {
    async fn fetch(&self, key: &ResourceKey) -> Result<Vec<Record>, RemoteError>;
}

/// Fetch function plus freshness windows for one resource.
#[derive(Clone)]
pub struct ResourcePolicy {
    key: ResourceKey,
    fetch: FetchFn,
    stale_after: Duration,
    evict_after: Duration,
}

impl ResourcePolicy {
    pub fn new<F, Fut>(
        key: impl Into<ResourceKey>,
        stale_after: Duration,
        evict_after: Duration,
        fetch: F,
    ) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<Vec<Record>, RemoteError>> + Send + 'static,
    {
        Self {
            key: key.into(),
            fetch: Arc::new(move || fetch().boxed()),
            stale_after,
            evict_after,
        }
    }

    /// Build a policy that fetches through a shared `ResourceFetcher`.
    pub fn from_fetcher(
        key: impl Into<ResourceKey>,
        stale_after: Duration,
        evict_after: Duration,
        fetcher: Arc<dyn ResourceFetcher>,
    ) -> Self {
        let key = key.into();
        let fetch_key = key.clone();
        Self::new(key, stale_after, evict_after, move || {
            let fetcher = Arc::clone(&fetcher);
            let key = fetch_key.clone();
            async move { fetcher.fetch(&key).await }
        })
    }

    pub fn key(&self) -> &ResourceKey {
        &self.key
    }

    pub fn stale_after(&self) -> Duration {
        self.stale_after
    }

    pub fn evict_after(&self) -> Duration {
        self.evict_after
    }

    pub(crate) fn start_fetch(&self) -> FetchFuture {
        (self.fetch)()
    }
}

impl fmt::Debug for ResourcePolicy {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("ResourcePolicy")
            .field("key", &self.key)
            .field("stale_after", &self.stale_after)
            .field("evict_after", &self.evict_after)
            .finish_non_exhaustive()
    }
}

/// Frozen key → policy table.
#[derive(Debug, Default)]
pub struct ResourceRegistry {
    policies: HashMap<ResourceKey, Arc<ResourcePolicy>>,
}

impl ResourceRegistry {
    pub fn builder() -> RegistryBuilder {
        RegistryBuilder::default()
    }

    pub fn get(&self, key: &str) -> Option<Arc<ResourcePolicy>> {
        self.policies.get(key).cloned()
    }

    pub fn require(&self, key: &ResourceKey) -> Result<Arc<ResourcePolicy>, CacheError> {
        self.get(key.as_str())
            .ok_or_else(|| CacheError::UnknownResource(key.clone()))
    }

    pub fn contains(&self, key: &str) -> bool {
        self.policies.contains_key(key)
    }

    /// Registered keys, sorted for stable output.
    pub fn keys(&self) -> Vec<ResourceKey> {
        let mut keys: Vec<ResourceKey> = self.policies.keys().cloned().collect();
        keys.sort();
        keys
    }

    pub fn len(&self) -> usize {
        self.policies.len()
    }

    pub fn is_empty(&self) -> bool {
        self.policies.is_empty()
    }
}

#[derive(Default)]
pub struct RegistryBuilder {
    policies: HashMap<ResourceKey, Arc<ResourcePolicy>>,
}

impl RegistryBuilder {
    /// Add a policy. Registering the same key twice is an error.
    pub fn register(mut self, policy: ResourcePolicy) -> Result<Self, CacheError> {
        let key = policy.key().clone();
        if self.policies.contains_key(&key) {
            return Err(CacheError::DuplicateResource(key));
        }
        self.policies.insert(key, Arc::new(policy));
        Ok(self)
    }

    pub fn build(self) -> ResourceRegistry {
        ResourceRegistry {
            policies: self.policies,
        }
    }
}
