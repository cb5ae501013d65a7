use std::error::Error as StdError;

use thiserror::Error;

use crate::{
    cache::CacheError, config::LoadError, domain::error::DomainError, infra::error::InfraError,
};

use super::{mutation::MutationError, reload::ReloadError};

/// Flattened error chain for operator output.
#[derive(Debug, Clone)]
pub struct ErrorReport {
    pub source: &'static str,
    pub messages: Vec<String>,
}

impl ErrorReport {
    pub fn from_error(source: &'static str, error: &dyn StdError) -> Self {
        let mut messages = vec![error.to_string()];
        let mut current = error.source();
        while let Some(inner) = current {
            messages.push(inner.to_string());
            current = inner.source();
        }
        Self { source, messages }
    }

    pub fn from_message(source: &'static str, message: impl Into<String>) -> Self {
        Self {
            source,
            messages: vec![message.into()],
        }
    }

    /// Chain rendered as `outer: inner: root`.
    pub fn render(&self) -> String {
        self.messages.join(": ")
    }
}

#[derive(Debug, Error)]
pub enum AppError {
    #[error(transparent)]
    Domain(#[from] DomainError),
    #[error(transparent)]
    Cache(#[from] CacheError),
    #[error(transparent)]
    Mutation(#[from] MutationError),
    #[error(transparent)]
    Reload(#[from] ReloadError),
    #[error(transparent)]
    Config(#[from] LoadError),
    #[error(transparent)]
    Infra(#[from] InfraError),
    #[error("unexpected error: {0}")]
    Unexpected(String),
}

impl AppError {
    pub fn unexpected(message: impl Into<String>) -> Self {
        Self::Unexpected(message.into())
    }

    /// Process exit code for the binary.
    pub fn exit_code(&self) -> i32 {
        match self {
            AppError::Config(_) | AppError::Domain(_) => 2,
            AppError::Cache(CacheError::UnknownResource(_)) => 2,
            AppError::Cache(_) | AppError::Mutation(_) | AppError::Reload(_) => 3,
            AppError::Infra(_) | AppError::Unexpected(_) => 1,
        }
    }

    pub fn report(&self) -> ErrorReport {
        ErrorReport::from_error("application::error::AppError", self)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::cache::{FetchError, ResourceKey};
    use crate::domain::error::RemoteError;

    #[test]
    fn report_walks_the_source_chain() {
        let fetch = FetchError::new(
            ResourceKey::new("students"),
            RemoteError::status(500, Some("db down".to_string())),
        );
        let error = AppError::from(CacheError::from(fetch));
        let report = error.report();

        assert_eq!(
            report.messages,
            vec![
                "failed to fetch `students`: server responded with status 500: db down".to_string(),
                "server responded with status 500: db down".to_string(),
            ]
        );
        assert_eq!(error.exit_code(), 3);
    }

    #[test]
    fn configuration_problems_exit_with_usage_code() {
        let error = AppError::from(DomainError::unknown_resource("grades"));
        assert_eq!(error.exit_code(), 2);
        assert_eq!(error.report().render(), "unknown resource `grades`");
    }
}
