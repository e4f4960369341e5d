//! # tillsync
//!
//! Offline-first operation queue for point-of-sale clients.
//!
//! ## Overview
//!
//! A till keeps selling when the network drops. Every sale and stock change
//! is recorded as an operation in a durable local queue, and a sync engine
//! replays the queue against the remote store once connectivity returns.
//!
//! - **Operations**: a sale (header, lines, stock decrements) or an
//!   inventory upsert, each with an id, attempt count and timestamp
//! - **Queue**: persisted under one key, append-only for producers
//! - **Sync passes**: apply each operation in order, keep failures for retry,
//!   move operations that failed too often into a dead letter store
//! - **Worker**: runs passes on a timer, on reconnect and on enqueue
//!
//! ## Guarantees
//!
//! - Once `enqueue` returns, the operation survives a restart.
//! - Delivery is at-least-once. The remote may see an operation twice if
//!   the process dies between applying it and rewriting the queue.
//! - At most one pass runs at a time per queue.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tillsync::{OfflineQueue, SaleLine, SalePayload};
//! use tillsync::store::SqliteKvStore;
//! use tillsync::sync::MemoryRemote;
//!
//! async fn example() -> tillsync::Result<()> {
//!     let kv = Arc::new(SqliteKvStore::open("till.db")?);
//!     let remote = Arc::new(MemoryRemote::new());
//!
//!     let queue = OfflineQueue::builder(kv, remote).build()?;
//!     let worker = queue.start_worker();
//!
//!     let sale = SalePayload::new(
//!         "INV-1001",
//!         vec![SaleLine::new("Flat white", 2, 450).with_product_id("coffee-fw")],
//!         tillsync::core::now_millis(),
//!     );
//!     queue.enqueue_sale(sale).await?;
//!
//!     // Host platform reports reachability changes.
//!     queue.connectivity().set_online(false);
//!
//!     worker.stop().await;
//!     Ok(())
//! }
//! ```
//!
//! ## Re-exports
//!
//! - `tillsync::core` - Operation model, ids and clocks
//! - `tillsync::store` - Key/value storage, queue and dead letter stores
//! - `tillsync::sync` - Remote boundary, apply engine, passes and worker

pub mod config;
pub mod error;
pub mod queue;

// Re-export component crates
pub use tillsync_core as core;
pub use tillsync_store as store;
pub use tillsync_sync as sync;

pub use config::QueueConfig;
pub use error::{Result, TillError};
pub use queue::{OfflineQueue, OfflineQueueBuilder};

// Re-export commonly used types
pub use tillsync_core::{
    InventoryRecord, Operation, OperationDraft, OperationId, OperationKind, SaleLine, SalePayload,
};
pub use tillsync_store::DeadLetter;
pub use tillsync_sync::{
    ConnectivitySignal, PassOutcome, PassReport, RemoteStore, SyncConfig, SyncStatus, SyncWorker,
};
