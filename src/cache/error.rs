use thiserror::Error;

use crate::domain::error::RemoteError;

use super::keys::ResourceKey;

/// A read against the remote API failed.
///
/// Recorded on the cache entry next to whatever data the entry still holds;
/// never thrown out of the store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("failed to fetch `{resource}`: {source}")]
pub struct FetchError {
    pub resource: ResourceKey,
    #[source]
    pub source: RemoteError,
}

impl FetchError {
    pub fn new(resource: ResourceKey, source: RemoteError) -> Self {
        Self { resource, source }
    }

    pub fn server_message(&self) -> Option<&str> {
        self.source.server_message()
    }
}

#[derive(Debug, Error)]
pub enum CacheError {
    #[error("resource `{0}` is not registered")]
    UnknownResource(ResourceKey),
    #[error("resource `{0}` is registered more than once")]
    DuplicateResource(ResourceKey),
    #[error("resource `{0}` has no cached data")]
    NotLoaded(ResourceKey),
    #[error("failed to decode `{resource}` records: {source}")]
    Decode {
        resource: ResourceKey,
        #[source]
        source: serde_json::Error,
    },
    #[error(transparent)]
    Fetch(#[from] FetchError),
}
