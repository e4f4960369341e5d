//! Error types for the offline queue.

use thiserror::Error;
use tillsync_core::{CoreError, OperationId};
use tillsync_store::StoreError;
use tillsync_sync::SyncError;

/// Errors that can occur during queue operations.
#[derive(Debug, Error)]
pub enum TillError {
    /// The operation could not be built.
    #[error("operation error: {0}")]
    Core(#[from] CoreError),

    /// Storage error.
    #[error("storage error: {0}")]
    Store(#[from] StoreError),

    /// Sync error.
    #[error("sync error: {0}")]
    Sync(#[from] SyncError),

    /// No dead letter with this id.
    #[error("dead letter not found: {0}")]
    DeadLetterNotFound(OperationId),

    /// The queue needs a Tokio runtime for its background tasks.
    #[error("no Tokio runtime available")]
    NoRuntime,
}

/// Result type for queue operations.
pub type Result<T> = std::result::Result<T, TillError>;
