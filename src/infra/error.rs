use thiserror::Error;

/// Failures while bootstrapping the process's adapters.
#[derive(Debug, Error)]
pub enum InfraError {
    #[error("failed to build the API client: {0}")]
    ClientBuild(#[source] reqwest::Error),
    #[error("telemetry initialization failed: {0}")]
    Telemetry(String),
}

impl InfraError {
    pub fn telemetry(message: impl Into<String>) -> Self {
        Self::Telemetry(message.into())
    }
}
