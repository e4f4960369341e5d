//! In-memory implementation of the KvStore trait.
//!
//! This is primarily for testing. Nothing survives the process, but writes
//! can be made to fail on demand to exercise error paths.

use std::collections::{BTreeMap, BTreeSet};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::RwLock;

use async_trait::async_trait;

use crate::error::{Result, StoreError};
use crate::traits::KvStore;

/// In-memory key/value store. Thread-safe via RwLock.
#[derive(Default)]
pub struct MemoryKvStore {
    entries: RwLock<BTreeMap<String, String>>,
    reject_writes: AtomicBool,
    rejected_keys: RwLock<BTreeSet<String>>,
}

impl MemoryKvStore {
    /// Create a new empty store.
    pub fn new() -> Self {
        Self::default()
    }

    /// Make every subsequent `set` and `remove` fail until cleared.
    pub fn reject_writes(&self, reject: bool) {
        self.reject_writes.store(reject, Ordering::SeqCst);
    }

    /// Make `set` and `remove` fail for one key only.
    pub fn reject_writes_to(&self, key: &str, reject: bool) {
        if let Ok(mut keys) = self.rejected_keys.write() {
            if reject {
                keys.insert(key.to_string());
            } else {
                keys.remove(key);
            }
        }
    }

    fn check_writable(&self, key: &str) -> Result<()> {
        if self.reject_writes.load(Ordering::SeqCst) {
            return Err(StoreError::WriteRejected("memory store is read-only".into()));
        }
        let rejected = self
            .rejected_keys
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        if rejected.contains(key) {
            return Err(StoreError::WriteRejected(format!("writes to {key} are rejected")));
        }
        Ok(())
    }
}

#[async_trait]
impl KvStore for MemoryKvStore {
    async fn get(&self, key: &str) -> Result<Option<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(entries.get(key).cloned())
    }

    async fn set(&self, key: &str, value: String) -> Result<()> {
        self.check_writable(key)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        entries.insert(key.to_string(), value);
        Ok(())
    }

    async fn remove(&self, key: &str) -> Result<()> {
        self.check_writable(key)?;
        let mut entries = self
            .entries
            .write()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        entries.remove(key);
        Ok(())
    }

    async fn keys(&self) -> Result<Vec<String>> {
        let entries = self
            .entries
            .read()
            .map_err(|e| StoreError::Poisoned(e.to_string()))?;
        Ok(entries.keys().cloned().collect())
    }
}
