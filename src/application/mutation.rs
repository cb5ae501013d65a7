//! Remote writes followed by cache invalidation.
//!
//! Each request names the cached resources its write affects. On success
//! those keys are invalidated (observed ones refetch), an optional client
//! store action is dispatched and the operator is notified. On failure
//! nothing is invalidated and the error goes back to the caller after a
//! destructive notification.

use std::future::Future;
use std::sync::Arc;

use futures::FutureExt;
use futures::future::BoxFuture;
use metrics::{counter, histogram};
use thiserror::Error;
use tokio::time::Instant;
use tracing::{info, warn};

use crate::cache::{ResourceKey, unique_keys};
use crate::domain::error::RemoteError;
use crate::domain::mutations::MutationKind;

use super::mirror::{Dispatcher, StoreAction};
use super::notify::{Notification, Notifier};
use super::query::QueryCoordinator;

pub(crate) const METRIC_MUTATION_TOTAL: &str = "examdash_mutation_total";
pub(crate) const METRIC_MUTATION_MS: &str = "examdash_mutation_ms";

const SUCCESS_TITLE: &str = "Success";
const ERROR_TITLE: &str = "Error";
const GENERIC_ERROR_MESSAGE: &str = "Something went wrong. Please try again.";

#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("mutation `{label}` failed: {source}")]
pub struct MutationError {
    pub label: String,
    #[source]
    pub source: RemoteError,
}

impl MutationError {
    pub fn server_message(&self) -> Option<&str> {
        self.source.server_message()
    }
}

/// One remote write and the cache keys it affects.
pub struct MutationRequest<R> {
    label: String,
    op: BoxFuture<'static, Result<R, RemoteError>>,
    invalidates: Vec<ResourceKey>,
    success_message: String,
    action: Option<StoreAction>,
}

impl<R> MutationRequest<R> {
    pub fn new<F>(label: impl Into<String>, op: F) -> Self
    where
        F: Future<Output = Result<R, RemoteError>> + Send + 'static,
    {
        let label = label.into();
        Self {
            success_message: format!("{label} completed"),
            label,
            op: op.boxed(),
            invalidates: Vec::new(),
            action: None,
        }
    }

    /// Request for one of the dashboard's known writes, with its
    /// invalidation set and message.
    pub fn for_kind<F>(kind: MutationKind, op: F) -> Self
    where
        F: Future<Output = Result<R, RemoteError>> + Send + 'static,
    {
        Self::new(kind.to_string(), op)
            .invalidates(kind.invalidates().iter().map(|resource| resource.key()))
            .success_message(kind.success_message())
            .dispatch(StoreAction::Mutated {
                resource: kind.target().key(),
            })
    }

    /// Add keys to invalidate on success. Duplicates are ignored.
    pub fn invalidates<I, K>(mut self, keys: I) -> Self
    where
        I: IntoIterator<Item = K>,
        K: Into<ResourceKey>,
    {
        let existing = std::mem::take(&mut self.invalidates);
        self.invalidates = unique_keys(existing.into_iter().chain(keys.into_iter().map(Into::into)));
        self
    }

    pub fn success_message(mut self, message: impl Into<String>) -> Self {
        self.success_message = message.into();
        self
    }

    /// Client store action to dispatch after a successful write.
    pub fn dispatch(mut self, action: StoreAction) -> Self {
        self.action = Some(action);
        self
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn invalidated_keys(&self) -> &[ResourceKey] {
        &self.invalidates
    }
}

pub struct MutationCoordinator {
    queries: QueryCoordinator,
    notifier: Arc<dyn Notifier>,
    dispatcher: Option<Arc<dyn Dispatcher>>,
}

impl MutationCoordinator {
    pub fn new(queries: QueryCoordinator, notifier: Arc<dyn Notifier>) -> Self {
        Self {
            queries,
            notifier,
            dispatcher: None,
        }
    }

    pub fn with_dispatcher(mut self, dispatcher: Arc<dyn Dispatcher>) -> Self {
        self.dispatcher = Some(dispatcher);
        self
    }

    /// Execute the write, then invalidate, dispatch and notify.
    ///
    /// Concurrent runs need no ordering between them: invalidation is
    /// idempotent and every observed key ends up refetched.
    pub async fn run<R>(&self, request: MutationRequest<R>) -> Result<R, MutationError> {
        let MutationRequest {
            label,
            op,
            invalidates,
            success_message,
            action,
        } = request;

        let started_at = Instant::now();
        let result = op.await;
        histogram!(METRIC_MUTATION_MS, "mutation" => label.clone())
            .record(started_at.elapsed().as_secs_f64() * 1000.0);

        match result {
            Ok(value) => {
                for key in &invalidates {
                    self.queries.invalidate(key.as_str());
                }
                if let (Some(action), Some(dispatcher)) = (action, &self.dispatcher) {
                    dispatcher.dispatch(action);
                }
                self.notifier
                    .notify(Notification::success(SUCCESS_TITLE, success_message));

                counter!(METRIC_MUTATION_TOTAL, "mutation" => label.clone(), "outcome" => "success")
                    .increment(1);
                info!(
                    mutation = %label,
                    invalidated = ?invalidates.iter().map(ResourceKey::as_str).collect::<Vec<_>>(),
                    "Mutation succeeded"
                );
                Ok(value)
            }
            Err(source) => {
                let description = source
                    .server_message()
                    .unwrap_or(GENERIC_ERROR_MESSAGE)
                    .to_string();
                self.notifier
                    .notify(Notification::destructive(ERROR_TITLE, description));

                counter!(METRIC_MUTATION_TOTAL, "mutation" => label.clone(), "outcome" => "error")
                    .increment(1);
                warn!(mutation = %label, error = %source, "Mutation failed");
                Err(MutationError { label, source })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use std::time::Duration;

    use serde_json::json;

    use super::*;
    use crate::application::notify::{MemoryNotifier, NotificationVariant};
    use crate::cache::{CacheStore, EventQueue, ResourcePolicy, ResourceRegistry};
    use crate::domain::resources::Resource;

    fn coordinator() -> (QueryCoordinator, Arc<MemoryNotifier>, MutationCoordinator) {
        let mut builder = ResourceRegistry::builder();
        for resource in [Resource::Students, Resource::Classes, Resource::Rooms] {
            let policy = ResourcePolicy::new(
                resource.key(),
                Duration::from_secs(60),
                Duration::from_secs(300),
                move || async move { Ok(vec![json!({"id": resource.as_str()})]) },
            );
            builder = builder.register(policy).expect("distinct resources");
        }
        let queries = QueryCoordinator::new(
            CacheStore::new(Arc::new(EventQueue::new())),
            Arc::new(builder.build()),
        );
        let notifier = Arc::new(MemoryNotifier::new());
        let mutations = MutationCoordinator::new(queries.clone(), notifier.clone());
        (queries, notifier, mutations)
    }

    async fn warm(queries: &QueryCoordinator) {
        for key in ["students", "classes", "rooms"] {
            queries.ensure_fresh(key).await.expect("registered");
        }
    }

    #[tokio::test]
    async fn success_invalidates_every_listed_key() {
        let (queries, notifier, mutations) = coordinator();
        warm(&queries).await;

        let request = MutationRequest::for_kind(MutationKind::ImportStudents, async {
            Ok::<_, RemoteError>(12usize)
        });
        let imported = mutations.run(request).await.expect("write succeeds");

        assert_eq!(imported, 12);
        assert!(queries.read("students").is_stale);
        assert!(queries.read("classes").is_stale);
        assert!(!queries.read("rooms").is_stale);
        assert_eq!(
            notifier.delivered(),
            vec![Notification::success("Success", "Imported students")]
        );
    }

    #[tokio::test]
    async fn failure_invalidates_nothing_and_reports_server_message() {
        let (queries, notifier, mutations) = coordinator();
        warm(&queries).await;

        let request = MutationRequest::for_kind(MutationKind::ImportStudents, async {
            Err::<(), _>(RemoteError::status(
                422,
                Some("Row 3: duplicate student code".to_string()),
            ))
        });
        let err = mutations.run(request).await.expect_err("write fails");

        assert_eq!(err.label, "import_students");
        assert_eq!(err.server_message(), Some("Row 3: duplicate student code"));
        assert!(!queries.read("students").is_stale);
        assert!(!queries.read("classes").is_stale);

        let delivered = notifier.delivered();
        assert_eq!(delivered.len(), 1);
        assert_eq!(delivered[0].variant, NotificationVariant::Destructive);
        assert_eq!(delivered[0].description, "Row 3: duplicate student code");
    }

    #[tokio::test]
    async fn failure_without_server_message_uses_generic_text() {
        let (_, notifier, mutations) = coordinator();
        let request = MutationRequest::new("delete_room", async {
            Err::<(), _>(RemoteError::Timeout)
        })
        .invalidates(["rooms"]);

        mutations.run(request).await.expect_err("write fails");
        assert_eq!(notifier.delivered()[0].description, GENERIC_ERROR_MESSAGE);
    }

    #[tokio::test]
    async fn concurrent_mutations_leave_keys_stale_once() {
        let (queries, _, mutations) = coordinator();
        warm(&queries).await;
        queries.store().events().clear();

        let first = MutationRequest::new("a", async { Ok::<_, RemoteError>(()) })
            .invalidates(["students", "classes"]);
        let second = MutationRequest::new("b", async { Ok::<_, RemoteError>(()) })
            .invalidates(["students"]);
        let (a, b) = tokio::join!(mutations.run(first), mutations.run(second));
        assert!(a.is_ok() && b.is_ok());

        assert!(queries.read("students").is_stale);
        assert!(queries.read("classes").is_stale);
        assert_eq!(queries.store().events().len(), 2);
    }

    #[test]
    fn builder_dedups_keys() {
        let request = MutationRequest::new("x", async { Ok::<_, RemoteError>(()) })
            .invalidates(["students", "classes"])
            .invalidates(["students"]);
        let keys: Vec<&str> = request
            .invalidated_keys()
            .iter()
            .map(ResourceKey::as_str)
            .collect();
        assert_eq!(keys, vec!["students", "classes"]);
    }
}
