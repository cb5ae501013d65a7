//! Application services: coordinators built on top of the cache.

pub mod dashboard;
pub mod error;
pub mod filter;
pub mod mirror;
pub mod mutation;
pub mod notify;
pub mod query;
pub mod reload;

pub use dashboard::{BackgroundTasks, Dashboard, catalog_registry};
pub use filter::{FilterPhase, FilterProcessingError, SearchFilter, use_filter};
pub use mirror::{ClientMirror, Dispatcher, StoreAction};
pub use mutation::{MutationCoordinator, MutationError, MutationRequest};
pub use notify::{MemoryNotifier, Notification, NotificationVariant, Notifier, TracingNotifier};
pub use query::{QueryCoordinator, ResourceQuery, ResourcesView};
pub use reload::{ReloadError, ReloadOutcome, Reloader, use_reload};
