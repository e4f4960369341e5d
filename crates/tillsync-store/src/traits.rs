//! KvStore trait: the abstract interface for local persistence.

use async_trait::async_trait;

use crate::error::Result;

/// Durable key/value persistence.
///
/// # Design Notes
///
/// - `set` replaces the whole value or fails leaving the previous value
///   intact. Partial writes are never observable.
/// - Implementations backed by blocking I/O run it off the async runtime.
#[async_trait]
pub trait KvStore: Send + Sync {
    /// Get the value stored under `key`, if any.
    async fn get(&self, key: &str) -> Result<Option<String>>;

    /// Store `value` under `key`, replacing any previous value.
    async fn set(&self, key: &str, value: String) -> Result<()>;

    /// Remove `key`. Removing a missing key is not an error.
    async fn remove(&self, key: &str) -> Result<()>;

    /// All keys currently stored, sorted.
    async fn keys(&self) -> Result<Vec<String>>;
}
