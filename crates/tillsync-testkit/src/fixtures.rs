//! Test fixtures and helpers.
//!
//! Common setup code for integration tests.

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;

use serde_json::{json, Value};
use tillsync::{OfflineQueue, QueueConfig};
use tillsync_core::{IdGenerator, InventoryRecord, ManualClock, OperationId, SaleLine, SalePayload};
use tillsync_store::MemoryKvStore;
use tillsync_sync::{ConnectivitySignal, MemoryRemote, RecordKey, Table};

/// Start of the fixture clock: 2026-01-14T12:00:00Z.
pub const FIXTURE_EPOCH: i64 = 1_768_392_000_000;

/// Ids `op-0001`, `op-0002`, ... in call order.
#[derive(Debug, Default)]
pub struct SequentialIdGenerator {
    next: AtomicU64,
}

impl SequentialIdGenerator {
    pub fn new() -> Self {
        Self::default()
    }
}

impl IdGenerator for SequentialIdGenerator {
    fn next_id(&self) -> OperationId {
        let n = self.next.fetch_add(1, Ordering::SeqCst) + 1;
        match OperationId::new(format!("op-{n:04}")) {
            Ok(id) => id,
            Err(_) => OperationId::random(),
        }
    }
}

/// The queue type fixtures build.
pub type FixtureQueue = OfflineQueue<MemoryKvStore, MemoryRemote>;

/// An in-memory store, remote, clock and connectivity signal.
pub struct TestFixture {
    pub kv: Arc<MemoryKvStore>,
    pub remote: Arc<MemoryRemote>,
    pub clock: Arc<ManualClock>,
    pub ids: Arc<SequentialIdGenerator>,
    pub connectivity: ConnectivitySignal,
}

impl TestFixture {
    pub fn new(online: bool) -> Self {
        Self {
            kv: Arc::new(MemoryKvStore::new()),
            remote: Arc::new(MemoryRemote::new()),
            clock: Arc::new(ManualClock::new(FIXTURE_EPOCH)),
            ids: Arc::new(SequentialIdGenerator::new()),
            connectivity: ConnectivitySignal::new(online),
        }
    }

    pub fn online() -> Self {
        Self::new(true)
    }

    pub fn offline() -> Self {
        Self::new(false)
    }

    /// A queue over this fixture's parts with default configuration.
    pub fn queue(&self) -> tillsync::Result<FixtureQueue> {
        self.queue_with(QueueConfig::default())
    }

    pub fn queue_with(&self, config: QueueConfig) -> tillsync::Result<FixtureQueue> {
        OfflineQueue::builder(Arc::clone(&self.kv), Arc::clone(&self.remote))
            .clock(self.clock.clone())
            .id_generator(self.ids.clone())
            .connectivity(self.connectivity.clone())
            .config(config)
            .build()
    }

    /// Put an inventory row on the remote.
    pub fn seed_stock(&self, product_id: &str, quantity: i64) {
        if let Value::Object(row) = json!({"id": product_id, "quantity": quantity}) {
            self.remote.seed(Table::Inventory, row);
        }
    }

    /// Remote stock for a product, if the row exists.
    pub fn stock(&self, product_id: &str) -> Option<i64> {
        self.remote
            .find(Table::Inventory, &RecordKey::id(product_id))
            .and_then(|row| row.get("quantity").and_then(Value::as_i64))
    }
}

impl Default for TestFixture {
    fn default() -> Self {
        Self::online()
    }
}

/// A two-line sale of products `p-tea` (2 x 150) and `p-cake` (1 x 300).
pub fn sample_sale(invoice_no: &str) -> SalePayload {
    SalePayload::new(
        invoice_no,
        vec![
            SaleLine::new("Tea", 2, 150)
                .with_product_id("p-tea")
                .with_sku("TEA-01")
                .with_unit_cost(60),
            SaleLine::new("Cake", 1, 300)
                .with_product_id("p-cake")
                .with_sku("CAKE-01")
                .with_unit_cost(120),
        ],
        FIXTURE_EPOCH,
    )
    .with_customer("Walk-in")
    .with_payment_method("cash")
}

/// A full inventory row for `product_id`.
pub fn sample_inventory(product_id: &str, quantity: i64) -> InventoryRecord {
    InventoryRecord::for_product(product_id)
        .with_name(format!("Product {product_id}"))
        .with_quantity(quantity)
        .with_prices(500, 200)
        .with_created_at(FIXTURE_EPOCH)
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_sequential_ids() {
        let ids = SequentialIdGenerator::new();
        assert_eq!(ids.next_id().as_str(), "op-0001");
        assert_eq!(ids.next_id().as_str(), "op-0002");
    }

    #[test]
    fn test_sample_sale_totals() {
        let sale = sample_sale("INV-1");
        assert_eq!(sale.total_amount, 600);
        assert_eq!(sale.items.len(), 2);
    }

    #[test]
    fn test_seed_and_read_stock() {
        let fixture = TestFixture::offline();
        fixture.seed_stock("p-tea", 12);
        assert_eq!(fixture.stock("p-tea"), Some(12));
        assert_eq!(fixture.stock("p-none"), None);
    }
}
