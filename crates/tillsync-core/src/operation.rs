//! Pending operations: the unit of buffered work.
//!
//! An [`Operation`] wraps one mutation that still has to reach the remote
//! store. The mutation itself is an [`OperationKind`], a closed sum over the
//! supported variants with an explicit fallback for payloads this build
//! does not understand.

use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::{CoreError, Result};
use crate::id::IdGenerator;
use crate::timestamp;
use crate::types::OperationId;

/// Wire tag for [`OperationKind::SaleCreate`].
pub const OP_SALE_CREATE: &str = "sale_create";

/// Wire tag for [`OperationKind::InventoryUpdate`].
pub const OP_INVENTORY_UPDATE: &str = "inventory_update";

const DEFAULT_PAYMENT_METHOD: &str = "unknown";

// ─────────────────────────────────────────────────────────────────────────────
// Payloads
// ─────────────────────────────────────────────────────────────────────────────

/// One line of a sale. Amounts are integer minor currency units.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SaleLine {
    #[serde(default)]
    pub product_id: Option<String>,
    #[serde(default)]
    pub sku: Option<String>,
    pub product_name: String,
    pub quantity: i64,
    #[serde(default)]
    pub unit_cost: i64,
    pub unit_price: i64,
    /// `quantity * unit_price`, computed when the line is built.
    pub total: i64,
}

impl SaleLine {
    /// Build a line and compute its total.
    pub fn new(product_name: impl Into<String>, quantity: i64, unit_price: i64) -> Self {
        Self {
            product_id: None,
            sku: None,
            product_name: product_name.into(),
            quantity,
            unit_cost: 0,
            unit_price,
            total: quantity.saturating_mul(unit_price),
        }
    }

    pub fn with_product_id(mut self, product_id: impl Into<String>) -> Self {
        self.product_id = Some(product_id.into());
        self
    }

    pub fn with_sku(mut self, sku: impl Into<String>) -> Self {
        self.sku = Some(sku.into());
        self
    }

    pub fn with_unit_cost(mut self, unit_cost: i64) -> Self {
        self.unit_cost = unit_cost;
        self
    }
}

/// A completed sale, recorded at checkout.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct SalePayload {
    pub invoice_no: String,
    #[serde(default)]
    pub customer_name: Option<String>,
    pub total_amount: i64,
    #[serde(default)]
    pub discounts: i64,
    #[serde(default)]
    pub refunds: i64,
    #[serde(default = "default_payment_method")]
    pub payment_method: String,
    #[serde(default)]
    pub employee_id: Option<String>,
    /// When the sale happened on the device (Unix ms).
    #[serde(deserialize_with = "timestamp::deserialize")]
    pub created_at: i64,
    #[serde(default)]
    pub items: Vec<SaleLine>,
}

fn default_payment_method() -> String {
    DEFAULT_PAYMENT_METHOD.to_string()
}

impl SalePayload {
    /// Build a sale from its lines. `total_amount` is the sum of line totals.
    pub fn new(invoice_no: impl Into<String>, items: Vec<SaleLine>, created_at: i64) -> Self {
        let total_amount = items.iter().fold(0i64, |acc, l| acc.saturating_add(l.total));
        Self {
            invoice_no: invoice_no.into(),
            customer_name: None,
            total_amount,
            discounts: 0,
            refunds: 0,
            payment_method: default_payment_method(),
            employee_id: None,
            created_at,
            items,
        }
    }

    pub fn with_customer(mut self, name: impl Into<String>) -> Self {
        self.customer_name = Some(name.into());
        self
    }

    pub fn with_payment_method(mut self, method: impl Into<String>) -> Self {
        self.payment_method = method.into();
        self
    }

    pub fn with_employee(mut self, employee_id: impl Into<String>) -> Self {
        self.employee_id = Some(employee_id.into());
        self
    }

    pub fn with_discounts(mut self, discounts: i64) -> Self {
        self.discounts = discounts;
        self
    }

    pub fn with_refunds(mut self, refunds: i64) -> Self {
        self.refunds = refunds;
        self
    }
}

/// A partial or complete inventory row.
///
/// Only the fields that are set are sent to the remote store, so a record
/// carrying just a key and `quantity` updates the quantity alone.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct InventoryRecord {
    #[serde(rename = "id", alias = "product_id", default, skip_serializing_if = "Option::is_none")]
    pub product_id: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub sku: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub product_name: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub quantity: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub selling_price: Option<i64>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cost_price: Option<i64>,
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub created_at: Option<i64>,
    #[serde(
        default,
        deserialize_with = "timestamp::deserialize_option",
        skip_serializing_if = "Option::is_none"
    )]
    pub updated_at: Option<i64>,
}

impl InventoryRecord {
    /// A record addressed by product id.
    pub fn for_product(product_id: impl Into<String>) -> Self {
        Self {
            product_id: Some(product_id.into()),
            ..Self::default()
        }
    }

    /// A record addressed by SKU.
    pub fn for_sku(sku: impl Into<String>) -> Self {
        Self {
            sku: Some(sku.into()),
            ..Self::default()
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.product_name = Some(name.into());
        self
    }

    pub fn with_quantity(mut self, quantity: i64) -> Self {
        self.quantity = Some(quantity);
        self
    }

    pub fn with_prices(mut self, selling_price: i64, cost_price: i64) -> Self {
        self.selling_price = Some(selling_price);
        self.cost_price = Some(cost_price);
        self
    }

    pub fn with_created_at(mut self, at: i64) -> Self {
        self.created_at = Some(at);
        self
    }

    /// The column and value this row is keyed by: product id first, then SKU.
    pub fn natural_key(&self) -> Option<(&'static str, &str)> {
        if let Some(id) = self.product_id.as_deref().filter(|s| !s.is_empty()) {
            return Some(("id", id));
        }
        self.sku
            .as_deref()
            .filter(|s| !s.is_empty())
            .map(|sku| ("sku", sku))
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operation kinds
// ─────────────────────────────────────────────────────────────────────────────

/// The mutation an operation carries.
#[derive(Debug, Clone, PartialEq)]
pub enum OperationKind {
    /// Record a sale: header, lines, then stock decrements.
    SaleCreate(SalePayload),
    /// Upsert one inventory row.
    InventoryUpdate(InventoryRecord),
    /// A payload this build cannot interpret. Kept verbatim, never applied.
    Unrecognized { op_type: String, payload: Value },
}

impl OperationKind {
    /// The wire tag.
    pub fn op_type(&self) -> &str {
        match self {
            Self::SaleCreate(_) => OP_SALE_CREATE,
            Self::InventoryUpdate(_) => OP_INVENTORY_UPDATE,
            Self::Unrecognized { op_type, .. } => op_type,
        }
    }

    pub fn is_recognized(&self) -> bool {
        !matches!(self, Self::Unrecognized { .. })
    }

    /// Encode the payload half of the wire form.
    pub fn payload_value(&self) -> Result<Value> {
        match self {
            Self::SaleCreate(sale) => Ok(serde_json::to_value(sale)?),
            Self::InventoryUpdate(record) => Ok(serde_json::to_value(record)?),
            Self::Unrecognized { payload, .. } => Ok(payload.clone()),
        }
    }

    /// Decode from the wire tag and payload.
    ///
    /// Never fails: unknown tags, and known tags whose payload does not
    /// parse, become [`OperationKind::Unrecognized`] with the payload intact.
    pub fn from_wire(op_type: String, payload: Value) -> Self {
        let decoded = match op_type.as_str() {
            OP_SALE_CREATE => serde_json::from_value(payload.clone())
                .ok()
                .map(Self::SaleCreate),
            OP_INVENTORY_UPDATE => serde_json::from_value(payload.clone())
                .ok()
                .map(Self::InventoryUpdate),
            _ => None,
        };
        decoded.unwrap_or(Self::Unrecognized { op_type, payload })
    }
}

impl From<SalePayload> for OperationKind {
    fn from(sale: SalePayload) -> Self {
        Self::SaleCreate(sale)
    }
}

impl From<InventoryRecord> for OperationKind {
    fn from(record: InventoryRecord) -> Self {
        Self::InventoryUpdate(record)
    }
}

// ─────────────────────────────────────────────────────────────────────────────
// Operation
// ─────────────────────────────────────────────────────────────────────────────

/// A buffered mutation awaiting remote application.
#[derive(Debug, Clone, PartialEq)]
pub struct Operation {
    pub id: OperationId,
    /// Failed apply attempts so far. Only ever increases.
    pub attempts: u32,
    /// When the operation was enqueued (Unix ms).
    pub created_at: i64,
    /// Earliest time the next attempt may run, if backing off.
    pub next_attempt_at: Option<i64>,
    /// Message of the most recent failure.
    pub last_error: Option<String>,
    pub kind: OperationKind,
}

impl Operation {
    /// A fresh operation with no attempts.
    pub fn new(id: OperationId, kind: OperationKind, created_at: i64) -> Self {
        Self {
            id,
            attempts: 0,
            created_at,
            next_attempt_at: None,
            last_error: None,
            kind,
        }
    }

    pub fn op_type(&self) -> &str {
        self.kind.op_type()
    }

    /// Whether an attempt may run at `now`.
    pub fn is_due(&self, now: i64) -> bool {
        self.next_attempt_at.map_or(true, |at| at <= now)
    }

    /// Count a failed attempt.
    pub fn record_failure(&mut self, error: impl Into<String>, next_attempt_at: Option<i64>) {
        self.attempts = self.attempts.saturating_add(1);
        self.last_error = Some(error.into());
        self.next_attempt_at = next_attempt_at;
    }

    /// Encode to the JSON wire form.
    pub fn to_json(&self) -> Result<String> {
        Ok(serde_json::to_string(self)?)
    }

    /// Decode from the JSON wire form.
    pub fn from_json(json: &str) -> Result<Self> {
        Ok(serde_json::from_str(json)?)
    }
}

#[derive(Serialize)]
struct WireOperationRef<'a> {
    id: &'a OperationId,
    op_type: &'a str,
    payload: Value,
    attempts: u32,
    created_at: i64,
    #[serde(skip_serializing_if = "Option::is_none")]
    next_attempt_at: Option<i64>,
    #[serde(skip_serializing_if = "Option::is_none")]
    last_error: Option<&'a str>,
}

#[derive(Deserialize)]
struct WireOperation {
    id: OperationId,
    op_type: String,
    #[serde(default)]
    payload: Value,
    #[serde(default)]
    attempts: u32,
    #[serde(default, deserialize_with = "timestamp::deserialize")]
    created_at: i64,
    #[serde(default, deserialize_with = "timestamp::deserialize_option")]
    next_attempt_at: Option<i64>,
    #[serde(default)]
    last_error: Option<String>,
}

impl Serialize for Operation {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let payload = self
            .kind
            .payload_value()
            .map_err(serde::ser::Error::custom)?;
        WireOperationRef {
            id: &self.id,
            op_type: self.kind.op_type(),
            payload,
            attempts: self.attempts,
            created_at: self.created_at,
            next_attempt_at: self.next_attempt_at,
            last_error: self.last_error.as_deref(),
        }
        .serialize(serializer)
    }
}

impl<'de> Deserialize<'de> for Operation {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let wire = WireOperation::deserialize(deserializer)?;
        Ok(Self {
            id: wire.id,
            attempts: wire.attempts,
            created_at: wire.created_at,
            next_attempt_at: wire.next_attempt_at,
            last_error: wire.last_error,
            kind: OperationKind::from_wire(wire.op_type, wire.payload),
        })
    }
}

/// What a producer hands to enqueue. The id is optional; the queue assigns
/// one when it is missing.
#[derive(Debug, Clone, PartialEq)]
pub struct OperationDraft {
    pub id: Option<OperationId>,
    pub kind: OperationKind,
}

impl OperationDraft {
    pub fn new(kind: impl Into<OperationKind>) -> Self {
        Self {
            id: None,
            kind: kind.into(),
        }
    }

    /// Use a caller-chosen id instead of a generated one.
    ///
    /// Ids must be unique among queued operations: enqueueing a second
    /// operation under an id that is still pending fails.
    pub fn with_id(mut self, id: OperationId) -> Self {
        self.id = Some(id);
        self
    }

    /// Stamp identity and creation time. Attempts always start at zero.
    pub fn into_operation(self, ids: &dyn IdGenerator, now: i64) -> Result<Operation> {
        if let OperationKind::Unrecognized { op_type, .. } = &self.kind {
            return Err(CoreError::InvalidOperation(format!(
                "cannot enqueue unrecognized operation type {op_type:?}"
            )));
        }
        let id = self.id.unwrap_or_else(|| ids.next_id());
        Ok(Operation::new(id, self.kind, now))
    }
}

impl From<OperationKind> for OperationDraft {
    fn from(kind: OperationKind) -> Self {
        Self::new(kind)
    }
}

impl From<SalePayload> for OperationDraft {
    fn from(sale: SalePayload) -> Self {
        Self::new(sale)
    }
}

impl From<InventoryRecord> for OperationDraft {
    fn from(record: InventoryRecord) -> Self {
        Self::new(record)
    }
}
