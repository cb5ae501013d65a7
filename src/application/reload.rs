//! Single-flight manual refresh.

use std::future::Future;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::FutureExt;
use futures::future::BoxFuture;
use thiserror::Error;
use tracing::{debug, info, warn};

use crate::cache::CacheError;
use crate::domain::error::RemoteError;

use super::mutation::MutationError;

#[derive(Debug, Error)]
pub enum ReloadError {
    #[error(transparent)]
    Remote(#[from] RemoteError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error("reload failed: {0}")]
    Failed(String),
}

type ReloadFn = Arc<dyn Fn() -> BoxFuture<'static, Result<(), ReloadError>> + Send + Sync>;
type SuccessFn = Arc<dyn Fn() + Send + Sync>;
type ErrorFn = Arc<dyn Fn(&ReloadError) + Send + Sync>;

#[derive(Debug)]
pub enum ReloadOutcome {
    Completed,
    Failed(ReloadError),
    /// A reload was already running; nothing was started.
    Skipped,
}

/// Wraps an async refresh so at most one runs at a time.
pub struct Reloader {
    on_reload: ReloadFn,
    on_success: Option<SuccessFn>,
    on_error: Option<ErrorFn>,
    reloading: AtomicBool,
}

pub fn use_reload<F, Fut>(on_reload: F) -> Reloader
where
    F: Fn() -> Fut + Send + Sync + 'static,
    Fut: Future<Output = Result<(), ReloadError>> + Send + 'static,
{
    Reloader::new(on_reload)
}

impl Reloader {
    pub fn new<F, Fut>(on_reload: F) -> Self
    where
        F: Fn() -> Fut + Send + Sync + 'static,
        Fut: Future<Output = Result<(), ReloadError>> + Send + 'static,
    {
        Self {
            on_reload: Arc::new(move || on_reload().boxed()),
            on_success: None,
            on_error: None,
            reloading: AtomicBool::new(false),
        }
    }

    pub fn on_success(mut self, callback: impl Fn() + Send + Sync + 'static) -> Self {
        self.on_success = Some(Arc::new(callback));
        self
    }

    pub fn on_error(mut self, callback: impl Fn(&ReloadError) + Send + Sync + 'static) -> Self {
        self.on_error = Some(Arc::new(callback));
        self
    }

    pub fn is_reloading(&self) -> bool {
        self.reloading.load(Ordering::Acquire)
    }

    /// Run the refresh unless one is already in progress.
    pub async fn handle_reload(&self) -> ReloadOutcome {
        if self
            .reloading
            .compare_exchange(false, true, Ordering::AcqRel, Ordering::Acquire)
            .is_err()
        {
            debug!("Reload already in progress; skipping");
            return ReloadOutcome::Skipped;
        }
        let _reset = ResetOnDrop(&self.reloading);

        match (self.on_reload)().await {
            Ok(()) => {
                info!("Reload completed");
                if let Some(callback) = &self.on_success {
                    callback();
                }
                ReloadOutcome::Completed
            }
            Err(error) => {
                warn!(error = %error, "Reload failed");
                if let Some(callback) = &self.on_error {
                    callback(&error);
                }
                ReloadOutcome::Failed(error)
            }
        }
    }
}

/// Clears the reloading flag even if the caller drops `handle_reload`
/// mid-flight.
struct ResetOnDrop<'a>(&'a AtomicBool);

impl Drop for ResetOnDrop<'_> {
    fn drop(&mut self) {
        self.0.store(false, Ordering::Release);
    }
}
