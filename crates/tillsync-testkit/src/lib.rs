//! # tillsync testkit
//!
//! Testing utilities for tillsync.
//!
//! ## Overview
//!
//! This crate provides:
//!
//! - **Fixtures**: an in-memory store, remote, manual clock and connectivity
//!   signal wired together, plus sample sales and inventory rows
//! - **Generators**: Proptest strategies for operations and queues
//! - **Wire vectors**: persisted queue snapshots that every build must keep
//!   reading
//!
//! ## Test Fixtures
//!
//! ```rust,no_run
//! use tillsync_testkit::fixtures::{sample_sale, TestFixture};
//!
//! async fn example() {
//!     let fixture = TestFixture::offline();
//!     let queue = fixture.queue().unwrap();
//!     queue.enqueue_sale(sample_sale("INV-1")).await.unwrap();
//!     fixture.connectivity.set_online(true);
//! }
//! ```
//!
//! ## Property Testing
//!
//! ```rust,ignore
//! use proptest::prelude::*;
//! use tillsync_testkit::generators::operation;
//!
//! proptest! {
//!     #[test]
//!     fn wire_round_trip(op in operation()) {
//!         let json = op.to_json().unwrap();
//!         prop_assert_eq!(tillsync_core::Operation::from_json(&json).unwrap(), op);
//!     }
//! }
//! ```

pub mod fixtures;
pub mod generators;
pub mod vectors;

pub use fixtures::{
    sample_inventory, sample_sale, FixtureQueue, SequentialIdGenerator, TestFixture, FIXTURE_EPOCH,
};
pub use vectors::{all_vectors, verify_all_vectors, WireVector};
