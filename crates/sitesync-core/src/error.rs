//! Error types for sitesync-core

use thiserror::Error;

/// Result type alias using sitesync-core's Error
pub type Result<T> = std::result::Result<T, Error>;

/// Errors that can occur in sitesync-core operations
#[derive(Error, Debug)]
pub enum Error {
    /// Malformed or oversized action rejected at enqueue time
    #[error("Validation error: {0}")]
    Validation(String),

    /// Transient network failure (timeout, connection reset, server 5xx)
    #[error("Network error: {0}")]
    Network(String),

    /// Remote reported a version mismatch for an action
    #[error("Conflict for action {0}")]
    Conflict(String),

    /// Storage registration rejected because capacity cannot be freed
    #[error("Storage quota exceeded: {0}")]
    QuotaExceeded(String),

    /// Operation is illegal given the current status
    #[error("Invalid state: {0}")]
    InvalidState(String),

    /// Action exhausted its retry budget
    #[error("Action {0} exhausted its retries")]
    TerminalFailure(String),

    /// Record not found
    #[error("Not found: {0}")]
    NotFound(String),

    /// `SQLite` error
    #[error("Database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Durable store failure not covered by the database driver
    #[error("Storage error: {0}")]
    Storage(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization error
    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl Error {
    /// Whether the error is worth retrying automatically.
    pub const fn is_transient(&self) -> bool {
        matches!(self, Self::Network(_))
    }
}
