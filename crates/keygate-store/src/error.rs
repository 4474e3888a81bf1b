//! Error types for the store module.

use thiserror::Error;

/// Errors that can occur during envelope storage.
#[derive(Debug, Error)]
pub enum StorageError {
    /// The backing store could not be reached or refused the operation.
    #[error("store unavailable: {0}")]
    StoreUnavailable(String),

    /// Nothing is stored under the content address.
    #[error("not found: {0}")]
    NotFound(String),

    /// Stored bytes are not a valid envelope, or do not match their address.
    #[error("malformed envelope: {0}")]
    MalformedEnvelope(String),

    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),
}

impl From<reqwest::Error> for StorageError {
    fn from(error: reqwest::Error) -> Self {
        StorageError::StoreUnavailable(error.to_string())
    }
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StorageError>;
