use crate::auth::{AuthError, CredentialError};
use std::time::Duration;
use thiserror::Error;

/// Channel operation an error came from; status codes mean different
/// things depending on it.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Operation {
    Open,
    Append,
    Status,
    Close,
}

impl Operation {
    pub fn as_str(self) -> &'static str {
        match self {
            Operation::Open => "open channel",
            Operation::Append => "append rows",
            Operation::Status => "channel status",
            Operation::Close => "close channel",
        }
    }
}

impl std::fmt::Display for Operation {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Coarse classification consumed by the retry policy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ErrorKind {
    AuthExpired,
    MalformedBatch,
    Transient,
    Fatal,
}

#[derive(Debug, Error)]
pub enum IngestError {
    #[error(transparent)]
    Credential(#[from] CredentialError),

    #[error(transparent)]
    Auth(#[from] AuthError),

    #[error("{operation} rejected the scoped token (HTTP 401)")]
    AuthExpired { operation: Operation },

    #[error("batch rejected (HTTP {status}): {message}")]
    MalformedBatch { status: u16, message: String },

    #[error("failed to encode batch: {0}")]
    Encode(#[from] serde_json::Error),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("{operation} failed: {message}")]
    Transient {
        operation: Operation,
        status: Option<u16>,
        message: String,
    },

    #[error("channel '{0}' is not open")]
    ChannelNotOpen(String),

    #[error("offset {offset_token} not committed within {timeout:?}")]
    CommitTimeout {
        offset_token: String,
        timeout: Duration,
    },
}

impl IngestError {
    pub fn kind(&self) -> ErrorKind {
        match self {
            IngestError::AuthExpired { .. } => ErrorKind::AuthExpired,
            IngestError::MalformedBatch { .. } | IngestError::Encode(_) => ErrorKind::MalformedBatch,
            IngestError::Transient { .. }
            | IngestError::ChannelNotOpen(_)
            | IngestError::CommitTimeout { .. } => ErrorKind::Transient,
            IngestError::Auth(e) if e.is_retryable() => ErrorKind::Transient,
            IngestError::Auth(_) | IngestError::Credential(_) | IngestError::Config(_) => {
                ErrorKind::Fatal
            }
        }
    }

    pub fn status(&self) -> Option<u16> {
        match self {
            IngestError::AuthExpired { .. } => Some(401),
            IngestError::MalformedBatch { status, .. } => Some(*status),
            IngestError::Transient { status, .. } => *status,
            IngestError::Auth(e) => e.status(),
            _ => None,
        }
    }

    pub fn is_fatal(&self) -> bool {
        self.kind() == ErrorKind::Fatal
    }

    /// Map a non-success HTTP status from the ingest host
    pub fn from_status(operation: Operation, status: u16, message: String) -> Self {
        match (status, operation) {
            (401, _) => IngestError::AuthExpired { operation },
            (403, _) => IngestError::Config(format!(
                "{} forbidden (HTTP 403), check role grants on the pipe: {}",
                operation, message
            )),
            (404, Operation::Open) => IngestError::Config(format!(
                "{} failed (HTTP 404), check database, schema and pipe names: {}",
                operation, message
            )),
            (404 | 409 | 408 | 429, _) | (500..=599, _) => IngestError::Transient {
                operation,
                status: Some(status),
                message,
            },
            (_, Operation::Append) => IngestError::MalformedBatch { status, message },
            (_, Operation::Open) => IngestError::Config(format!(
                "{} failed (HTTP {}): {}",
                operation, status, message
            )),
            _ => IngestError::Transient {
                operation,
                status: Some(status),
                message,
            },
        }
    }

    /// Connection failures and timeouts are always worth another attempt
    pub fn from_reqwest(operation: Operation, error: reqwest::Error) -> Self {
        let kind = if error.is_timeout() {
            "timed out"
        } else if error.is_connect() {
            "connection failed"
        } else if error.is_decode() {
            "unreadable response"
        } else {
            "request failed"
        };

        IngestError::Transient {
            operation,
            status: error.status().map(|s| s.as_u16()),
            message: format!("{}: {}", kind, error),
        }
    }
}
