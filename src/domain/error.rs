use serde::Deserialize;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum DomainError {
    #[error("unknown resource `{name}`")]
    UnknownResource { name: String },
    #[error("domain validation failed: {message}")]
    Validation { message: String },
}

impl DomainError {
    pub fn unknown_resource(name: impl Into<String>) -> Self {
        Self::UnknownResource { name: name.into() }
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::Validation {
            message: message.into(),
        }
    }
}

/// Failure reported by the remote dashboard API, for reads and writes alike.
///
/// The backend answers failed calls with a JSON body of the form
/// `{"message": "..."}`; when present that text is carried in `message` so
/// it can be shown to the operator verbatim.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum RemoteError {
    #[error("server responded with status {status}{}", render_message(.message))]
    Status {
        status: u16,
        message: Option<String>,
    },
    #[error("transport failure: {0}")]
    Transport(String),
    #[error("request timed out")]
    Timeout,
    #[error("invalid response payload: {0}")]
    Decode(String),
    #[error("operation aborted: {0}")]
    Aborted(String),
}

impl RemoteError {
    pub fn status(status: u16, message: Option<String>) -> Self {
        Self::Status { status, message }
    }

    pub fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }

    pub fn decode(message: impl Into<String>) -> Self {
        Self::Decode(message.into())
    }

    pub fn aborted(message: impl Into<String>) -> Self {
        Self::Aborted(message.into())
    }

    /// Server-provided explanation, if the backend sent one.
    pub fn server_message(&self) -> Option<&str> {
        match self {
            RemoteError::Status {
                message: Some(message),
                ..
            } if !message.trim().is_empty() => Some(message.as_str()),
            _ => None,
        }
    }

    /// Extract the `message` field from an error response body.
    pub fn message_from_body(body: &str) -> Option<String> {
        #[derive(Deserialize)]
        struct ErrorBody {
            message: Option<String>,
        }

        serde_json::from_str::<ErrorBody>(body)
            .ok()
            .and_then(|parsed| parsed.message)
            .filter(|message| !message.trim().is_empty())
    }
}

fn render_message(message: &Option<String>) -> String {
    match message {
        Some(message) => format!(": {message}"),
        None => String::new(),
    }
}
