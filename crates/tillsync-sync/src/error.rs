//! Error types for the sync module.

use std::fmt;
use std::time::Duration;

use thiserror::Error;

/// How a remote failure should be treated.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FailureKind {
    /// Network errors, timeouts, server-side faults. Worth retrying.
    Transient,
    /// The remote refused the request and will keep refusing it.
    Permanent,
    /// The request was malformed before it left the device.
    Validation,
    /// The remote does not implement the requested call.
    Unsupported,
}

impl FailureKind {
    /// Whether retrying can never help.
    pub fn is_permanent(self) -> bool {
        !matches!(self, Self::Transient)
    }
}

impl fmt::Display for FailureKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            Self::Transient => "transient",
            Self::Permanent => "permanent",
            Self::Validation => "validation",
            Self::Unsupported => "unsupported",
        };
        f.write_str(name)
    }
}

/// A failed call against the remote store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
#[error("{kind} remote failure: {message}")]
pub struct RemoteError {
    pub kind: FailureKind,
    pub message: String,
}

impl RemoteError {
    pub fn new(kind: FailureKind, message: impl Into<String>) -> Self {
        Self {
            kind,
            message: message.into(),
        }
    }

    pub fn transient(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Transient, message)
    }

    pub fn permanent(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Permanent, message)
    }

    pub fn validation(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Validation, message)
    }

    pub fn unsupported(message: impl Into<String>) -> Self {
        Self::new(FailureKind::Unsupported, message)
    }

    /// A call that did not answer within `after`.
    pub fn timeout(call: &str, after: Duration) -> Self {
        Self::transient(format!("{call} timed out after {after:?}"))
    }
}

/// Result type for remote calls.
pub type RemoteResult<T> = std::result::Result<T, RemoteError>;

/// Errors that can occur while running sync passes.
#[derive(Debug, Error)]
pub enum SyncError {
    /// Local persistence failed.
    #[error("store error: {0}")]
    Store(#[from] tillsync_store::StoreError),

    /// An operation could not be built or encoded.
    #[error("core error: {0}")]
    Core(#[from] tillsync_core::CoreError),

    /// The worker is not running.
    #[error("sync worker stopped")]
    WorkerStopped,
}

/// Result type for sync operations.
pub type Result<T> = std::result::Result<T, SyncError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_kind_classification() {
        assert!(!FailureKind::Transient.is_permanent());
        assert!(FailureKind::Permanent.is_permanent());
        assert!(FailureKind::Validation.is_permanent());
        assert!(FailureKind::Unsupported.is_permanent());
    }

    #[test]
    fn test_timeout_is_transient() {
        let err = RemoteError::timeout("insert sales", Duration::from_secs(10));
        assert_eq!(err.kind, FailureKind::Transient);
        assert_eq!(err.to_string(), "transient remote failure: insert sales timed out after 10s");
    }
}
