//! Error types for the tracking engine and its collaborators.
//!
//! Library code returns these; the binaries wrap them with `anyhow`.

use uuid::Uuid;

/// Tracking persistence errors.
#[derive(Debug, thiserror::Error)]
pub enum StoreError {
    /// Network or API failure talking to a remote store. Always retryable.
    #[error("transport error: {0}")]
    Transport(String),

    /// The store answered with data that could not be parsed.
    #[error("malformed response: {0}")]
    Malformed(String),

    /// The store understood the request and refused it.
    #[error("request rejected: {0}")]
    Rejected(String),

    #[error("no tracking entry matches {0}")]
    NotFound(String),

    #[error("tracking id {0} already registered")]
    Duplicate(Uuid),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),
}

impl StoreError {
    /// Whether the caller may retry the same operation later.
    pub fn is_retryable(&self) -> bool {
        match self {
            StoreError::Transport(_) | StoreError::Io(_) => true,
            StoreError::Database(rusqlite::Error::SqliteFailure(e, _)) => matches!(
                e.code,
                rusqlite::ErrorCode::DatabaseBusy | rusqlite::ErrorCode::DatabaseLocked
            ),
            _ => false,
        }
    }
}

/// Registration failed at send time.
///
/// The caller decides whether to proceed with an untracked send.
#[derive(Debug, thiserror::Error)]
pub enum RegistrationError {
    #[error("recipient address is empty")]
    InvalidRecipient,

    #[error("tracking persistence failed: {0}")]
    Persistence(#[from] StoreError),
}

/// Mailbox fetch errors. A failed fetch means "no data this cycle".
#[derive(Debug, thiserror::Error)]
pub enum PollError {
    #[error("mailbox transport error: {0}")]
    Transport(String),

    #[error("malformed mailbox payload: {0}")]
    Malformed(String),
}

/// Outbound transmit errors.
#[derive(Debug, thiserror::Error)]
pub enum TransmitError {
    #[error("failed to start mail client: {0}")]
    Spawn(std::io::Error),

    /// Piping the body to, or collecting output from, a running client failed.
    #[error("mail client i/o failed: {0}")]
    Io(std::io::Error),

    #[error("mail client exited with status {status}: {stderr}")]
    Failed { status: i32, stderr: String },

    #[error("mail client timed out after {0:?}")]
    Timeout(std::time::Duration),
}

/// Configuration errors raised while building components.
#[derive(Debug, thiserror::Error)]
pub enum ConfigError {
    #[error("invalid configuration value for {key}: {message}")]
    InvalidValue { key: String, message: String },
}
