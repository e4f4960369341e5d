//! Typed views over a [`KvStore`]: the pending queue and the dead letters.
//!
//! Both views store a JSON array under a single key and always read or
//! write the whole array. Queue entries are decoded one by one; an entry
//! that does not decode is kept verbatim instead of failing the queue.

use std::sync::Arc;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use tokio::sync::Mutex;
use tracing::warn;

use tillsync_core::{Operation, OperationId};

use crate::error::{Result, StoreError};
use crate::traits::KvStore;

/// Well-known key of the pending queue.
pub const QUEUE_KEY: &str = "sync_queue_v1";

/// Well-known key of the dead-letter store.
pub const DEAD_LETTER_KEY: &str = "sync_dead_letter_v1";

async fn read_array<K, T>(kv: &K, key: &str) -> Result<Vec<T>>
where
    K: KvStore + ?Sized,
    T: for<'de> Deserialize<'de>,
{
    match kv.get(key).await? {
        Some(json) if !json.trim().is_empty() => Ok(serde_json::from_str(&json)?),
        _ => Ok(Vec::new()),
    }
}

async fn write_array<K, T>(kv: &K, key: &str, items: &[T]) -> Result<()>
where
    K: KvStore + ?Sized,
    T: Serialize,
{
    let json = serde_json::to_string(items)?;
    kv.set(key, json).await
}

// ─────────────────────────────────────────────────────────────────────────────
// Pending queue
// ─────────────────────────────────────────────────────────────────────────────

/// The stored queue, split into what decodes and what does not.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct QueueSnapshot {
    /// Decoded operations in enqueue order.
    pub operations: Vec<Operation>,
    /// Entries that are not operations in any form this build reads.
    /// Never applied, never dropped, written back unchanged.
    pub undecodable: Vec<Value>,
}

impl QueueSnapshot {
    fn decode(entries: Vec<Value>, key: &str) -> Self {
        let mut snapshot = Self::default();
        for entry in entries {
            match Operation::deserialize(&entry) {
                Ok(op) => snapshot.operations.push(op),
                Err(e) => {
                    warn!(key, error = %e, "keeping undecodable queue entry as-is");
                    snapshot.undecodable.push(entry);
                }
            }
        }
        snapshot
    }

    /// Stored entries of either sort.
    pub fn len(&self) -> usize {
        self.operations.len() + self.undecodable.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn contains(&self, id: &OperationId) -> bool {
        self.operations.iter().any(|op| &op.id == id)
    }
}

/// The durable queue of pending operations.
///
/// Clones share the same mutation lock, so appends from producers and the
/// write-back at the end of a sync pass never interleave within a process.
pub struct QueueStore<K: KvStore + ?Sized> {
    kv: Arc<K>,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl<K: KvStore + ?Sized> Clone for QueueStore<K> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            key: self.key.clone(),
            lock: Arc::clone(&self.lock),
        }
    }
}

impl<K: KvStore + ?Sized> QueueStore<K> {
    /// A queue stored under [`QUEUE_KEY`].
    pub fn new(kv: Arc<K>) -> Self {
        Self::with_key(kv, QUEUE_KEY)
    }

    /// A queue stored under a custom key.
    pub fn with_key(kv: Arc<K>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    pub fn key(&self) -> &str {
        &self.key
    }

    /// Everything stored under the queue key.
    pub async fn snapshot(&self) -> Result<QueueSnapshot> {
        let entries: Vec<Value> = read_array(self.kv.as_ref(), &self.key).await?;
        Ok(QueueSnapshot::decode(entries, &self.key))
    }

    /// All pending operations in enqueue order. Empty if nothing is stored.
    pub async fn read(&self) -> Result<Vec<Operation>> {
        Ok(self.snapshot().await?.operations)
    }

    /// Replace the stored operations. Undecodable entries are kept.
    pub async fn write(&self, ops: &[Operation]) -> Result<()> {
        let _guard = self.lock.lock().await;
        let current = self.snapshot().await?;
        self.store(&current.undecodable, ops).await?;
        Ok(())
    }

    /// Append one operation at the end. Returns the new queue length.
    ///
    /// Fails with [`StoreError::DuplicateOperation`] if an operation with the
    /// same id is already queued.
    pub async fn append(&self, op: Operation) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let mut current = self.snapshot().await?;
        if current.contains(&op.id) {
            return Err(StoreError::DuplicateOperation(op.id));
        }
        current.operations.push(op);
        self.store(&current.undecodable, &current.operations).await
    }

    /// Read, transform and write back under the mutation lock.
    ///
    /// `f` sees only the decoded operations. Returns the number of stored
    /// entries afterwards.
    pub async fn update<F>(&self, f: F) -> Result<usize>
    where
        F: FnOnce(Vec<Operation>) -> Vec<Operation> + Send,
    {
        let _guard = self.lock.lock().await;
        let current = self.snapshot().await?;
        let next = f(current.operations);
        self.store(&current.undecodable, &next).await
    }

    /// Number of stored entries, undecodable ones included.
    pub async fn len(&self) -> Result<usize> {
        Ok(self.snapshot().await?.len())
    }

    pub async fn is_empty(&self) -> Result<bool> {
        Ok(self.len().await? == 0)
    }

    // Undecodable entries go first: they predate anything this build wrote.
    async fn store(&self, undecodable: &[Value], ops: &[Operation]) -> Result<usize> {
        let mut entries = undecodable.to_vec();
        for op in ops {
            entries.push(serde_json::to_value(op)?);
        }
        write_array(self.kv.as_ref(), &self.key, &entries).await?;
        Ok(entries.len())
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Dead letters
// ─────────────────────────────────────────────────────────────────────────────

/// An operation removed from the active queue without being applied.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeadLetter {
    pub operation: Operation,
    /// Why it was dropped.
    pub reason: String,
    /// When it was dropped (Unix ms).
    pub dropped_at: i64,
}

/// Inspectable store of dropped operations.
pub struct DeadLetterStore<K: KvStore + ?Sized> {
    kv: Arc<K>,
    key: String,
    lock: Arc<Mutex<()>>,
}

impl<K: KvStore + ?Sized> Clone for DeadLetterStore<K> {
    fn clone(&self) -> Self {
        Self {
            kv: Arc::clone(&self.kv),
            key: self.key.clone(),
            lock: Arc::clone(&self.lock),
        }
    }
}

impl<K: KvStore + ?Sized> DeadLetterStore<K> {
    /// A dead-letter store under [`DEAD_LETTER_KEY`].
    pub fn new(kv: Arc<K>) -> Self {
        Self::with_key(kv, DEAD_LETTER_KEY)
    }

    pub fn with_key(kv: Arc<K>, key: impl Into<String>) -> Self {
        Self {
            kv,
            key: key.into(),
            lock: Arc::new(Mutex::new(())),
        }
    }

    /// Record dropped operations, oldest first.
    pub async fn push_all(&self, letters: Vec<DeadLetter>) -> Result<()> {
        if letters.is_empty() {
            return Ok(());
        }
        let _guard = self.lock.lock().await;
        let mut all: Vec<DeadLetter> = read_array(self.kv.as_ref(), &self.key).await?;
        all.extend(letters);
        write_array(self.kv.as_ref(), &self.key, &all).await
    }

    pub async fn push(&self, letter: DeadLetter) -> Result<()> {
        self.push_all(vec![letter]).await
    }

    /// Every dead letter, in the order they were dropped.
    pub async fn list(&self) -> Result<Vec<DeadLetter>> {
        read_array(self.kv.as_ref(), &self.key).await
    }

    /// Remove and return the dead letter for `id`, if present.
    pub async fn take(&self, id: &OperationId) -> Result<Option<DeadLetter>> {
        let _guard = self.lock.lock().await;
        let mut all: Vec<DeadLetter> = read_array(self.kv.as_ref(), &self.key).await?;
        let Some(pos) = all.iter().position(|l| &l.operation.id == id) else {
            return Ok(None);
        };
        let letter = all.remove(pos);
        write_array(self.kv.as_ref(), &self.key, &all).await?;
        Ok(Some(letter))
    }

    /// Drop every dead letter. Returns how many were removed.
    pub async fn clear(&self) -> Result<usize> {
        let _guard = self.lock.lock().await;
        let all: Vec<DeadLetter> = read_array(self.kv.as_ref(), &self.key).await?;
        self.kv.remove(&self.key).await?;
        Ok(all.len())
    }

    pub async fn len(&self) -> Result<usize> {
        Ok(self.list().await?.len())
    }
}
