//! # Tillsync Store
//!
//! Durable local persistence for tillsync. A small key/value abstraction
//! ([`KvStore`]) sits under two typed views: the pending operation queue
//! ([`QueueStore`]) and the dead-letter store ([`DeadLetterStore`]).
//!
//! ## Key Types
//!
//! - [`KvStore`] - The async trait for key/value persistence
//! - [`SqliteKvStore`] - SQLite-backed store that survives restarts
//! - [`MemoryKvStore`] - In-memory store for tests
//! - [`QueueStore`] - Ordered pending operations under one well-known key
//! - [`DeadLetterStore`] - Permanently dropped operations, kept for replay
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tillsync_store::{QueueStore, SqliteKvStore};
//!
//! async fn example() {
//!     let kv = Arc::new(SqliteKvStore::open("till.db").unwrap());
//!     let queue = QueueStore::new(kv);
//!     let pending = queue.read().await.unwrap();
//!     println!("{} operations waiting", pending.len());
//! }
//! ```
//!
//! ## Design Notes
//!
//! - **Whole-value writes**: a queue write replaces the stored sequence in a
//!   single statement; readers see either the old or the new sequence.
//! - **Serialized mutation**: every read-modify-write on a queue handle runs
//!   under an in-process lock shared by all clones of that handle.
//! - **Entry-level decoding**: one queue entry that does not decode is kept
//!   aside verbatim; the rest of the queue stays usable.

pub mod error;
pub mod memory;
pub mod migration;
pub mod queue;
pub mod sqlite;
pub mod traits;

pub use error::{Result, StoreError};
pub use memory::MemoryKvStore;
pub use queue::{
    DeadLetter, DeadLetterStore, QueueSnapshot, QueueStore, DEAD_LETTER_KEY, QUEUE_KEY,
};
pub use sqlite::SqliteKvStore;
pub use traits::KvStore;
