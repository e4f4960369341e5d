//! # Tillsync Core
//!
//! Pure primitives for the tillsync offline queue: the pending operation
//! model, identifiers, and time sources.
//!
//! This crate contains no I/O, no storage, no networking.
//!
//! ## Key Types
//!
//! - [`Operation`] - A buffered mutation awaiting remote application
//! - [`OperationKind`] - Closed sum over the supported mutations, plus an
//!   [`OperationKind::Unrecognized`] fallback that keeps payloads written by
//!   newer clients intact
//! - [`OperationId`] - Globally unique identifier assigned at enqueue time
//! - [`Clock`] / [`IdGenerator`] - Injectable time and identity sources
//!
//! ## Wire Form
//!
//! Operations are persisted as JSON objects:
//!
//! ```text
//! { "id": "...", "op_type": "sale_create", "payload": { ... },
//!   "attempts": 0, "created_at": 1700000000000 }
//! ```
//!
//! Timestamps are written as Unix milliseconds. RFC 3339 strings, as left
//! behind by older clients, are accepted when reading.

pub mod clock;
pub mod error;
pub mod id;
pub mod operation;
pub mod timestamp;
pub mod types;

pub use clock::{now_millis, Clock, ManualClock, SystemClock};
pub use error::{CoreError, Result};
pub use id::{IdGenerator, RandomIdGenerator};
pub use operation::{
    InventoryRecord, Operation, OperationDraft, OperationKind, SaleLine, SalePayload,
    OP_INVENTORY_UPDATE, OP_SALE_CREATE,
};
pub use types::OperationId;
