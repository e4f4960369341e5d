//! # tillsync sync
//!
//! Moves buffered operations from the local queue to the remote store.
//!
//! ## Overview
//!
//! - [`ApplyEngine`] turns one operation into remote calls.
//! - [`SyncPass`] walks the queue once, applying due operations and
//!   deciding through the [`RetryPolicy`] what stays, what goes, and what
//!   is dropped into the dead letter store.
//! - [`Synchronizer`] guarantees at most one pass at a time.
//! - [`SyncWorker`] runs passes on a timer, on reconnect and on demand.
//! - [`ConnectivitySignal`] and [`StatusObserver`] carry reachability and
//!   progress to whoever is interested.
//!
//! ## Key Properties
//!
//! - **At-least-once**: an operation leaves the queue only after the remote
//!   accepted it, or after it was dropped into the dead letter store
//! - **Order-preserving**: survivors keep their relative order, and
//!   operations enqueued mid-pass land behind them
//! - **Non-overlapping**: a pass requested while one runs is a no-op
//!
//! ## Usage
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use tillsync_core::SystemClock;
//! use tillsync_store::{DeadLetterStore, MemoryKvStore, QueueStore};
//! use tillsync_sync::{
//!     ApplyEngine, ConnectivitySignal, MemoryRemote, RetryPolicy, StatusObserver, Synchronizer,
//! };
//!
//! async fn example() -> tillsync_sync::Result<()> {
//!     let kv = Arc::new(MemoryKvStore::new());
//!     let remote = Arc::new(MemoryRemote::new());
//!     let clock = Arc::new(SystemClock);
//!
//!     let sync = Synchronizer::new(
//!         QueueStore::new(Arc::clone(&kv)),
//!         DeadLetterStore::new(kv),
//!         ApplyEngine::new(remote, clock.clone()),
//!         RetryPolicy::default(),
//!         clock,
//!         StatusObserver::new(true),
//!     );
//!
//!     let outcome = sync.run_pass().await?;
//!     println!("{outcome:?}");
//!     Ok(())
//! }
//! ```

pub mod apply;
pub mod config;
pub mod connectivity;
pub mod error;
pub mod pass;
pub mod remote;
pub mod retry;
pub mod scheduler;

pub use apply::{ApplyEngine, ApplyError, ApplyOutcome, DecrementStrategy};
pub use config::{SyncConfig, DEFAULT_CALL_TIMEOUT, DEFAULT_INTERVAL};
pub use connectivity::{ConnectivitySignal, StatusObserver, StatusSubscription, SyncStatus};
pub use error::{FailureKind, RemoteError, RemoteResult, Result, SyncError};
pub use pass::{PassOutcome, PassReport, SyncPass, Synchronizer};
pub use remote::{
    memory::MemoryRemote, memory::RemoteCall, Record, RecordKey, RemoteId, RemoteStore, Table,
};
pub use retry::{Backoff, Disposition, RetryPolicy, DEFAULT_DROP_THRESHOLD};
pub use scheduler::{SyncTrigger, SyncWorker};
