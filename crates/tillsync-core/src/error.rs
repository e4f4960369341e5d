//! Error types for core primitives.

use thiserror::Error;

/// Errors raised while building or encoding operations.
#[derive(Debug, Error)]
pub enum CoreError {
    /// An operation identifier was empty or malformed.
    #[error("invalid operation id: {0:?}")]
    InvalidId(String),

    /// A payload could not be converted to or from its JSON form.
    #[error("encoding error: {0}")]
    Encoding(#[from] serde_json::Error),

    /// The operation is structurally unusable.
    #[error("invalid operation: {0}")]
    InvalidOperation(String),
}

/// Result type for core operations.
pub type Result<T> = std::result::Result<T, CoreError>;
