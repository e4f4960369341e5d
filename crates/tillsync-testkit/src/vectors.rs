//! Wire vectors: persisted queue snapshots.
//!
//! Devices upgrade with operations still queued, so every build must read
//! what earlier builds wrote. Each vector is a stored queue value together
//! with what decoding it must yield.

use tillsync_core::{Operation, OperationKind};

/// A stored queue value and its expected decoding.
#[derive(Debug, Clone)]
pub struct WireVector {
    /// Human-readable name for the vector.
    pub name: &'static str,
    /// The JSON array as found under the queue key.
    pub json: &'static str,
    /// Expected `(id, op_type, recognized, attempts)` per operation, in order.
    pub expected: &'static [(&'static str, &'static str, bool, u32)],
}

impl WireVector {
    /// Decode the vector.
    pub fn decode(&self) -> serde_json::Result<Vec<Operation>> {
        serde_json::from_str(self.json)
    }

    /// Decode and compare against the expectations. Returns the first mismatch.
    pub fn check(&self) -> Result<(), String> {
        let ops = self.decode().map_err(|e| format!("{}: {e}", self.name))?;
        if ops.len() != self.expected.len() {
            return Err(format!(
                "{}: expected {} operations, got {}",
                self.name,
                self.expected.len(),
                ops.len()
            ));
        }
        for (op, (id, op_type, recognized, attempts)) in ops.iter().zip(self.expected) {
            let actual = (
                op.id.as_str(),
                op.op_type(),
                op.kind.is_recognized(),
                op.attempts,
            );
            if actual != (*id, *op_type, *recognized, *attempts) {
                return Err(format!("{}: {actual:?} does not match", self.name));
            }
        }
        Ok(())
    }
}

/// Get all wire vectors.
pub fn all_vectors() -> Vec<WireVector> {
    vec![
        WireVector {
            name: "empty queue",
            json: "[]",
            expected: &[],
        },
        WireVector {
            name: "sale with two lines",
            json: r#"[{
                "id": "9f2c4e1a7b3d4c5e8f901a2b3c4d5e6f",
                "op_type": "sale_create",
                "payload": {
                    "invoice_no": "INV-1001",
                    "customer_name": null,
                    "total_amount": 600,
                    "discounts": 0,
                    "refunds": 0,
                    "payment_method": "cash",
                    "employee_id": "emp-7",
                    "created_at": 1768392000000,
                    "items": [
                        {"product_id": "p-tea", "sku": "TEA-01", "product_name": "Tea",
                         "quantity": 2, "unit_cost": 60, "unit_price": 150, "total": 300},
                        {"product_id": "p-cake", "sku": null, "product_name": "Cake",
                         "quantity": 1, "unit_cost": 120, "unit_price": 300, "total": 300}
                    ]
                },
                "attempts": 0,
                "created_at": 1768392000000
            }]"#,
            expected: &[("9f2c4e1a7b3d4c5e8f901a2b3c4d5e6f", "sale_create", true, 0)],
        },
        WireVector {
            name: "minimal fields fall back to defaults",
            json: r#"[
                {"id": "a1", "op_type": "inventory_update", "payload": {"sku": "JAM-02", "quantity": 4}},
                {"id": "a2", "op_type": "sale_create",
                 "payload": {"invoice_no": "INV-2", "total_amount": 0, "created_at": 5}}
            ]"#,
            expected: &[
                ("a1", "inventory_update", true, 0),
                ("a2", "sale_create", true, 0),
            ],
        },
        WireVector {
            name: "retrying operation with backoff state",
            json: r#"[{
                "id": "b7",
                "op_type": "inventory_update",
                "payload": {"id": "p-tea", "quantity": 11, "updated_at": 1768392005000},
                "attempts": 3,
                "created_at": 1768392000000,
                "next_attempt_at": 1768392060000,
                "last_error": "transient remote failure: 503"
            }]"#,
            expected: &[("b7", "inventory_update", true, 3)],
        },
        WireVector {
            name: "unknown kinds are kept between known ones",
            json: r#"[
                {"id": "c1", "op_type": "inventory_update", "payload": {"product_id": "p-1"}, "attempts": 1, "created_at": 1},
                {"id": "c2", "op_type": "refund_issue", "payload": {"invoice_no": "INV-9", "amount": 250}, "attempts": 0, "created_at": 2},
                {"id": "c3", "op_type": "sale_create", "payload": {"unexpected": true}, "attempts": 2, "created_at": 3}
            ]"#,
            expected: &[
                ("c1", "inventory_update", true, 1),
                ("c2", "refund_issue", false, 0),
                ("c3", "sale_create", false, 2),
            ],
        },
        WireVector {
            name: "entries written by older clients use RFC 3339 timestamps",
            json: r#"[{
                "id": "7d3f0c52-1b7e-4a56-9d0e-2f4c8a1b6e90",
                "op_type": "sale_create",
                "payload": {
                    "invoice_no": "INV-20250101000000-4821",
                    "customer_name": null,
                    "total_amount": 300,
                    "discounts": 0,
                    "refunds": 0,
                    "payment_method": "card",
                    "employee_id": null,
                    "created_at": "2025-01-01T00:00:00.000Z",
                    "items": [
                        {"product_id": "p-tea", "sku": "TEA-01", "product_name": "Tea",
                         "quantity": 2, "unit_cost": 0, "unit_price": 150, "total": 300}
                    ]
                },
                "attempts": 1,
                "created_at": "2025-01-01T00:00:00.000Z"
            }]"#,
            expected: &[("7d3f0c52-1b7e-4a56-9d0e-2f4c8a1b6e90", "sale_create", true, 1)],
        },
    ]
}

/// Check every vector, collecting failures.
pub fn verify_all_vectors() -> Vec<String> {
    all_vectors()
        .iter()
        .filter_map(|v| v.check().err())
        .collect()
}

/// Payload of an unrecognized operation, if it is one.
pub fn unrecognized_payload(op: &Operation) -> Option<&serde_json::Value> {
    match &op.kind {
        OperationKind::Unrecognized { payload, .. } => Some(payload),
        _ => None,
    }
}
