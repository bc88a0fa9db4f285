use serde::{Deserialize, Serialize};

/// Top-level error type for the client API.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ClientError {
    /// Missing or invalid client configuration.
    #[error("config error: {0}")]
    Config(String),
    /// Invalid input to `send_prompt`.
    #[error("validation error: {0}")]
    Validation(String),
    /// Connection or stream I/O failed.
    #[error("transport error: {0}")]
    Transport(String),
    /// The endpoint answered with a non-success status.
    #[error("request failed with status {status}: {body}")]
    Status { status: u16, body: String },
    /// The caller aborted the request through its `AbortHandle`.
    #[error("request {request_id} aborted")]
    Aborted { request_id: String },
    /// Protocol misuse or invariant violation.
    #[error("protocol error: {0}")]
    Protocol(String),
}

impl ClientError {
    pub(crate) fn transport(message: impl Into<String>) -> Self {
        Self::Transport(message.into())
    }
}

/// Terminal failure recorded on a message that ended in `Errored`.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum StreamFailure {
    #[error("transport failure: {message}")]
    Transport { message: String },
    #[error("endpoint returned status {status}")]
    Status { status: u16 },
    #[error("protocol failure: {message}")]
    Protocol { message: String },
}

impl From<&ClientError> for StreamFailure {
    fn from(err: &ClientError) -> Self {
        match err {
            ClientError::Status { status, .. } => StreamFailure::Status { status: *status },
            ClientError::Protocol(message) => StreamFailure::Protocol {
                message: message.clone(),
            },
            other => StreamFailure::Transport {
                message: other.to_string(),
            },
        }
    }
}
