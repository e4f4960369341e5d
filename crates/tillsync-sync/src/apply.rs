//! Applying operations to the remote store.
//!
//! A sale is applied as three steps: insert the header, insert the line
//! items referencing the header's remote id, then lower stock for every
//! line that names a product. Only the first two decide the outcome. A
//! failed stock decrement is logged and counted, never retried, because
//! re-running the whole operation would duplicate the sale.
//!
//! An inventory update is a single upsert keyed on the product id, or on
//! the SKU when no id is present.

use std::future::Future;
use std::sync::Arc;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use serde_json::Value;
use thiserror::Error;
use tillsync_core::{Clock, InventoryRecord, Operation, OperationId, OperationKind, SalePayload};
use tracing::{debug, warn};

use crate::config::DEFAULT_CALL_TIMEOUT;
use crate::error::{FailureKind, RemoteError, RemoteResult};
use crate::remote::{Record, RecordKey, RemoteId, RemoteStore, Table};

const QUANTITY: &str = "quantity";

/// How stock is lowered after a sale.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecrementStrategy {
    /// Ask the remote for a conditional decrement. Falls back to
    /// read-modify-write when the remote does not support it.
    #[default]
    Atomic,
    /// Read the current quantity, subtract, write it back. Concurrent
    /// sales of the same product on other devices can lose updates.
    ReadModifyWrite,
}

/// Result of applying one operation.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct ApplyOutcome {
    /// Remote id of the inserted sale header, for sales.
    pub remote_id: Option<RemoteId>,
    /// Stock decrements that failed. The operation still counts as applied.
    pub decrement_failures: usize,
}

/// Why an operation was not applied.
#[derive(Debug, Clone, PartialEq, Error)]
pub enum ApplyError {
    #[error(transparent)]
    Remote(#[from] RemoteError),

    /// The operation kind is not one this build can apply.
    #[error("unrecognized operation type: {0}")]
    Unrecognized(String),
}

impl ApplyError {
    pub fn failure_kind(&self) -> FailureKind {
        match self {
            Self::Remote(err) => err.kind,
            Self::Unrecognized(_) => FailureKind::Unsupported,
        }
    }
}

/// Applies operations to a [`RemoteStore`].
pub struct ApplyEngine<R: RemoteStore + ?Sized> {
    remote: Arc<R>,
    clock: Arc<dyn Clock>,
    call_timeout: Duration,
    decrement: DecrementStrategy,
}

impl<R: RemoteStore + ?Sized> ApplyEngine<R> {
    pub fn new(remote: Arc<R>, clock: Arc<dyn Clock>) -> Self {
        Self {
            remote,
            clock,
            call_timeout: DEFAULT_CALL_TIMEOUT,
            decrement: DecrementStrategy::default(),
        }
    }

    pub fn with_call_timeout(mut self, timeout: Duration) -> Self {
        self.call_timeout = timeout;
        self
    }

    pub fn with_decrement(mut self, strategy: DecrementStrategy) -> Self {
        self.decrement = strategy;
        self
    }

    pub fn remote(&self) -> &Arc<R> {
        &self.remote
    }

    /// Apply one operation.
    pub async fn apply(&self, op: &Operation) -> Result<ApplyOutcome, ApplyError> {
        debug!(op_id = %op.id, op_type = op.op_type(), attempts = op.attempts, "applying operation");
        match &op.kind {
            OperationKind::SaleCreate(sale) => Ok(self.apply_sale(&op.id, sale).await?),
            OperationKind::InventoryUpdate(record) => {
                self.apply_inventory(record).await?;
                Ok(ApplyOutcome::default())
            }
            OperationKind::Unrecognized { op_type, .. } => {
                Err(ApplyError::Unrecognized(op_type.clone()))
            }
        }
    }

    async fn apply_sale(&self, op_id: &OperationId, sale: &SalePayload) -> RemoteResult<ApplyOutcome> {
        let header = sale_header(sale);
        let sale_id = self
            .call("insert sales", self.remote.insert(Table::Sales, header))
            .await?;

        if !sale.items.is_empty() {
            let lines = sale_lines(sale, &sale_id);
            self.call(
                "insert sale_items",
                self.remote.insert_many(Table::SaleItems, lines),
            )
            .await?;
        }

        let mut decrement_failures = 0;
        for line in &sale.items {
            let Some(product_id) = line.product_id.as_deref().filter(|id| !id.is_empty()) else {
                continue;
            };
            if let Err(err) = self.decrement_stock(product_id, line.quantity).await {
                decrement_failures += 1;
                warn!(
                    op_id = %op_id,
                    invoice_no = %sale.invoice_no,
                    product_id,
                    quantity = line.quantity,
                    error = %err,
                    "stock decrement failed; sale kept"
                );
            }
        }

        debug!(op_id = %op_id, sale_id = %sale_id, lines = sale.items.len(), "sale applied");
        Ok(ApplyOutcome {
            remote_id: Some(sale_id),
            decrement_failures,
        })
    }

    async fn apply_inventory(&self, record: &InventoryRecord) -> RemoteResult<()> {
        let Some((column, _)) = record.natural_key() else {
            return Err(RemoteError::validation(
                "inventory update has neither product id nor sku",
            ));
        };
        let row = match serde_json::to_value(record) {
            Ok(Value::Object(row)) => row,
            Ok(_) => return Err(RemoteError::validation("inventory record is not an object")),
            Err(err) => return Err(RemoteError::validation(err.to_string())),
        };
        self.call(
            "upsert inventory",
            self.remote.upsert(Table::Inventory, row, column),
        )
        .await
    }

    /// Lower stock for one product by `quantity`, flooring at zero.
    async fn decrement_stock(&self, product_id: &str, quantity: i64) -> RemoteResult<i64> {
        let key = RecordKey::id(product_id);
        if self.decrement == DecrementStrategy::Atomic {
            let attempt = self
                .call(
                    "decrement inventory",
                    self.remote
                        .decrement_floor(Table::Inventory, &key, QUANTITY, quantity),
                )
                .await;
            match attempt {
                Err(err) if err.kind == FailureKind::Unsupported => {
                    debug!(product_id, "conditional decrement unsupported; using read-modify-write");
                }
                other => return other,
            }
        }

        let row = self
            .call("read inventory", self.remote.read_one(Table::Inventory, &key))
            .await?;
        let current = row.get(QUANTITY).and_then(Value::as_i64).unwrap_or(0);
        let next = current.saturating_sub(quantity).max(0);

        let mut patch = Record::new();
        patch.insert(QUANTITY.into(), Value::from(next));
        patch.insert("updated_at".into(), Value::from(self.clock.now_millis()));
        self.call(
            "update inventory",
            self.remote.update(Table::Inventory, &key, patch),
        )
        .await?;
        Ok(next)
    }

    async fn call<T>(
        &self,
        what: &str,
        fut: impl Future<Output = RemoteResult<T>>,
    ) -> RemoteResult<T> {
        match tokio::time::timeout(self.call_timeout, fut).await {
            Ok(result) => result,
            Err(_) => Err(RemoteError::timeout(what, self.call_timeout)),
        }
    }
}

fn sale_header(sale: &SalePayload) -> Record {
    let mut row = Record::new();
    row.insert("invoice_no".into(), Value::from(sale.invoice_no.as_str()));
    row.insert("customer_name".into(), opt_str(sale.customer_name.as_deref()));
    row.insert("total_amount".into(), Value::from(sale.total_amount));
    row.insert("discounts".into(), Value::from(sale.discounts));
    row.insert("refunds".into(), Value::from(sale.refunds));
    row.insert("payment_method".into(), Value::from(sale.payment_method.as_str()));
    row.insert("employee_id".into(), opt_str(sale.employee_id.as_deref()));
    row.insert("created_at".into(), Value::from(sale.created_at));
    row
}

fn sale_lines(sale: &SalePayload, sale_id: &RemoteId) -> Vec<Record> {
    sale.items
        .iter()
        .map(|line| {
            let mut row = Record::new();
            row.insert("sale_id".into(), sale_id.as_value().clone());
            row.insert("product_id".into(), opt_str(line.product_id.as_deref()));
            row.insert("sku".into(), opt_str(line.sku.as_deref()));
            row.insert("product_name".into(), Value::from(line.product_name.as_str()));
            row.insert("quantity".into(), Value::from(line.quantity));
            row.insert("unit_cost".into(), Value::from(line.unit_cost));
            row.insert("unit_price".into(), Value::from(line.unit_price));
            row.insert("total".into(), Value::from(line.total));
            row
        })
        .collect()
}

fn opt_str(value: Option<&str>) -> Value {
    value.map_or(Value::Null, Value::from)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::remote::memory::{MemoryRemote, RemoteCall};
    use serde_json::json;
    use tillsync_core::{ManualClock, SaleLine};

    fn engine(remote: &Arc<MemoryRemote>) -> ApplyEngine<MemoryRemote> {
        ApplyEngine::new(Arc::clone(remote), Arc::new(ManualClock::new(42)))
    }

    fn stock(remote: &MemoryRemote, product_id: &str, quantity: i64) {
        let row = json!({"id": product_id, "quantity": quantity});
        if let Value::Object(row) = row {
            remote.seed(Table::Inventory, row);
        }
    }

    fn quantity(remote: &MemoryRemote, product_id: &str) -> Value {
        remote
            .find(Table::Inventory, &RecordKey::id(product_id))
            .and_then(|row| row.get(QUANTITY).cloned())
            .unwrap_or(Value::Null)
    }

    fn sale_op(sale: SalePayload) -> Operation {
        Operation::new(OperationId::new("op-1").unwrap(), sale.into(), 1)
    }

    fn two_line_sale() -> SalePayload {
        SalePayload::new(
            "INV-1",
            vec![
                SaleLine::new("Tea", 2, 150).with_product_id("p1"),
                SaleLine::new("Cake", 1, 300).with_product_id("p2"),
            ],
            1_700_000_000_000,
        )
    }

    #[tokio::test]
    async fn test_sale_inserts_header_lines_and_decrements() {
        let remote = Arc::new(MemoryRemote::new());
        stock(&remote, "p1", 10);
        stock(&remote, "p2", 1);

        let outcome = engine(&remote).apply(&sale_op(two_line_sale())).await.unwrap();

        let sales = remote.rows(Table::Sales);
        assert_eq!(sales.len(), 1);
        assert_eq!(sales[0]["total_amount"], json!(600));
        assert_eq!(sales[0]["payment_method"], json!("unknown"));

        let lines = remote.rows(Table::SaleItems);
        assert_eq!(lines.len(), 2);
        let sale_id = outcome.remote_id.unwrap().into_value();
        assert!(lines.iter().all(|line| line["sale_id"] == sale_id));

        assert_eq!(quantity(&remote, "p1"), json!(8));
        assert_eq!(quantity(&remote, "p2"), json!(0));
        assert_eq!(outcome.decrement_failures, 0);
    }

    #[tokio::test]
    async fn test_sale_without_items_skips_line_insert() {
        let remote = Arc::new(MemoryRemote::new());
        let sale = SalePayload::new("INV-2", Vec::new(), 1);

        engine(&remote).apply(&sale_op(sale)).await.unwrap();

        assert_eq!(remote.rows(Table::Sales).len(), 1);
        assert_eq!(remote.call_count(RemoteCall::InsertMany(Table::SaleItems)), 0);
    }

    #[tokio::test]
    async fn test_header_failure_fails_operation() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_next(RemoteCall::Insert(Table::Sales), RemoteError::transient("offline"));

        let err = engine(&remote).apply(&sale_op(two_line_sale())).await.unwrap_err();

        assert_eq!(err.failure_kind(), FailureKind::Transient);
        assert_eq!(remote.call_count(RemoteCall::InsertMany(Table::SaleItems)), 0);
    }

    #[tokio::test]
    async fn test_line_failure_fails_operation() {
        let remote = Arc::new(MemoryRemote::new());
        remote.fail_next(
            RemoteCall::InsertMany(Table::SaleItems),
            RemoteError::permanent("foreign key violation"),
        );

        let err = engine(&remote).apply(&sale_op(two_line_sale())).await.unwrap_err();

        assert_eq!(err.failure_kind(), FailureKind::Permanent);
        assert_eq!(remote.call_count(RemoteCall::DecrementFloor(Table::Inventory)), 0);
    }

    #[tokio::test]
    async fn test_decrement_failure_does_not_fail_sale() {
        let remote = Arc::new(MemoryRemote::new());
        // p1 has no inventory row.
        stock(&remote, "p2", 4);

        let outcome = engine(&remote).apply(&sale_op(two_line_sale())).await.unwrap();

        assert_eq!(outcome.decrement_failures, 1);
        assert_eq!(quantity(&remote, "p2"), json!(3));
        assert_eq!(remote.rows(Table::Sales).len(), 1);
    }

    #[tokio::test]
    async fn test_lines_without_product_id_are_not_decremented() {
        let remote = Arc::new(MemoryRemote::new());
        let sale = SalePayload::new("INV-3", vec![SaleLine::new("Misc", 1, 100)], 1);

        let outcome = engine(&remote).apply(&sale_op(sale)).await.unwrap();

        assert_eq!(outcome.decrement_failures, 0);
        assert_eq!(remote.call_count(RemoteCall::DecrementFloor(Table::Inventory)), 0);
    }

    #[tokio::test]
    async fn test_falls_back_to_read_modify_write() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_atomic_decrement(false);
        stock(&remote, "p1", 5);
        stock(&remote, "p2", 5);

        engine(&remote).apply(&sale_op(two_line_sale())).await.unwrap();

        assert_eq!(quantity(&remote, "p1"), json!(3));
        assert_eq!(remote.call_count(RemoteCall::ReadOne(Table::Inventory)), 2);
        assert_eq!(remote.call_count(RemoteCall::Update(Table::Inventory)), 2);
        let row = remote.find(Table::Inventory, &RecordKey::id("p1")).unwrap();
        assert_eq!(row["updated_at"], json!(42));
    }

    #[tokio::test]
    async fn test_read_modify_write_strategy_floors_at_zero() {
        let remote = Arc::new(MemoryRemote::new());
        stock(&remote, "p1", 1);
        stock(&remote, "p2", 0);

        engine(&remote)
            .with_decrement(DecrementStrategy::ReadModifyWrite)
            .apply(&sale_op(two_line_sale()))
            .await
            .unwrap();

        assert_eq!(quantity(&remote, "p1"), json!(0));
        assert_eq!(quantity(&remote, "p2"), json!(0));
        assert_eq!(remote.call_count(RemoteCall::DecrementFloor(Table::Inventory)), 0);
    }

    #[tokio::test]
    async fn test_inventory_upserts_on_id_then_sku() {
        let remote = Arc::new(MemoryRemote::new());
        let engine = engine(&remote);

        let by_id = InventoryRecord::for_product("p1").with_quantity(7);
        let op = Operation::new(OperationId::new("a").unwrap(), by_id.into(), 1);
        engine.apply(&op).await.unwrap();

        let by_sku = InventoryRecord::for_sku("S-9").with_name("Jam").with_quantity(3);
        let op = Operation::new(OperationId::new("b").unwrap(), by_sku.into(), 1);
        engine.apply(&op).await.unwrap();

        assert_eq!(quantity(&remote, "p1"), json!(7));
        let jam = remote
            .find(Table::Inventory, &RecordKey::new("sku", "S-9"))
            .unwrap();
        assert_eq!(jam["product_name"], json!("Jam"));
    }

    #[tokio::test]
    async fn test_inventory_without_key_is_validation_failure() {
        let remote = Arc::new(MemoryRemote::new());
        let record = InventoryRecord::default().with_quantity(1);
        let op = Operation::new(OperationId::new("a").unwrap(), record.into(), 1);

        let err = engine(&remote).apply(&op).await.unwrap_err();

        assert_eq!(err.failure_kind(), FailureKind::Validation);
        assert!(remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_unrecognized_is_not_applied() {
        let remote = Arc::new(MemoryRemote::new());
        let kind = OperationKind::from_wire("refund_issue".into(), json!({"amount": 5}));
        let op = Operation::new(OperationId::new("a").unwrap(), kind, 1);

        let err = engine(&remote).apply(&op).await.unwrap_err();

        assert_eq!(err, ApplyError::Unrecognized("refund_issue".into()));
        assert!(remote.calls().is_empty());
    }

    #[tokio::test(start_paused = true)]
    async fn test_slow_call_times_out_as_transient() {
        let remote = Arc::new(MemoryRemote::new());
        remote.set_latency(Some(Duration::from_secs(60)));

        let err = engine(&remote)
            .with_call_timeout(Duration::from_secs(10))
            .apply(&sale_op(two_line_sale()))
            .await
            .unwrap_err();

        assert_eq!(err.failure_kind(), FailureKind::Transient);
        assert!(err.to_string().contains("timed out"));
    }
}
