//! Error types for the store module.

use thiserror::Error;
use tillsync_core::OperationId;

/// Errors that can occur during store operations.
#[derive(Debug, Error)]
pub enum StoreError {
    /// Database error from SQLite.
    #[error("database error: {0}")]
    Database(#[from] rusqlite::Error),

    /// Stored value could not be encoded or decoded.
    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Migration error.
    #[error("migration error: {0}")]
    Migration(String),

    /// A lock guarding the backend was poisoned by a panic.
    #[error("store lock poisoned: {0}")]
    Poisoned(String),

    /// A blocking task failed to complete.
    #[error("blocking task failed: {0}")]
    Join(String),

    /// Write rejected by the backend (used by test backends).
    #[error("write rejected: {0}")]
    WriteRejected(String),

    /// An operation with this id is already queued.
    #[error("operation {0} is already queued")]
    DuplicateOperation(OperationId),
}

/// Result type for store operations.
pub type Result<T> = std::result::Result<T, StoreError>;
