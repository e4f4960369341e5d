//! Proptest generators for property-based testing.

use proptest::prelude::*;
use serde_json::{json, Value};

use tillsync_core::{
    InventoryRecord, Operation, OperationId, OperationKind, SaleLine, SalePayload,
};

/// Generate an operation id: hex like freshly generated ids, or a UUID-ish
/// string like ids assigned by other clients.
pub fn operation_id() -> impl Strategy<Value = OperationId> {
    prop_oneof![
        any::<[u8; 16]>().prop_map(OperationId::from_bytes),
        "[a-f0-9]{8}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{4}-[a-f0-9]{12}"
            .prop_filter_map("valid id", |s| OperationId::new(s).ok()),
    ]
}

/// Generate a reasonable timestamp (Unix ms).
pub fn timestamp() -> impl Strategy<Value = i64> {
    0i64..=4_000_000_000_000i64
}

/// Generate an amount in minor units.
pub fn amount() -> impl Strategy<Value = i64> {
    0i64..=1_000_000i64
}

fn short_text() -> impl Strategy<Value = String> {
    "[A-Za-z0-9 ]{1,24}".prop_map(String::from)
}

/// Generate one sale line.
pub fn sale_line() -> impl Strategy<Value = SaleLine> {
    (
        short_text(),
        1i64..=50,
        amount(),
        amount(),
        proptest::option::of("p-[a-z0-9]{1,8}"),
        proptest::option::of("[A-Z]{2,4}-[0-9]{2}"),
    )
        .prop_map(|(name, qty, price, cost, product_id, sku)| {
            let mut line = SaleLine::new(name, qty, price).with_unit_cost(cost);
            line.product_id = product_id;
            line.sku = sku;
            line
        })
}

/// Generate a sale with up to `max_lines` lines.
pub fn sale_payload(max_lines: usize) -> impl Strategy<Value = SalePayload> {
    (
        "INV-[0-9]{1,6}",
        prop::collection::vec(sale_line(), 0..=max_lines),
        timestamp(),
        proptest::option::of(short_text()),
        prop_oneof![Just("cash"), Just("card"), Just("mobile")],
        0i64..=1_000,
    )
        .prop_map(|(invoice, lines, at, customer, method, discounts)| {
            let mut sale = SalePayload::new(invoice, lines, at)
                .with_payment_method(method)
                .with_discounts(discounts);
            sale.customer_name = customer;
            sale
        })
}

/// Generate an inventory record that has at least one key.
pub fn inventory_record() -> impl Strategy<Value = InventoryRecord> {
    (
        prop_oneof![
            "p-[a-z0-9]{1,8}".prop_map(InventoryRecord::for_product),
            "[A-Z]{2,4}-[0-9]{2}".prop_map(InventoryRecord::for_sku),
        ],
        proptest::option::of(short_text()),
        proptest::option::of(0i64..=10_000),
        proptest::option::of((amount(), amount())),
    )
        .prop_map(|(mut record, name, quantity, prices)| {
            record.product_name = name;
            record.quantity = quantity;
            if let Some((selling, cost)) = prices {
                record = record.with_prices(selling, cost);
            }
            record
        })
}

/// Generate an operation kind this build does not know.
pub fn unrecognized_kind() -> impl Strategy<Value = OperationKind> {
    ("[a-z]{3,10}_v[2-9]", any::<i32>(), short_text()).prop_map(|(op_type, n, note)| {
        let payload: Value = json!({"amount": n, "note": note, "nested": {"keep": [1, 2, 3]}});
        OperationKind::from_wire(op_type, payload)
    })
}

/// Generate a recognized operation kind.
pub fn recognized_kind() -> impl Strategy<Value = OperationKind> {
    prop_oneof![
        sale_payload(4).prop_map(OperationKind::SaleCreate),
        inventory_record().prop_map(OperationKind::InventoryUpdate),
    ]
}

/// Generate an operation of any kind, with any attempt count below five.
pub fn operation() -> impl Strategy<Value = Operation> {
    (
        operation_id(),
        prop_oneof![4 => recognized_kind(), 1 => unrecognized_kind()],
        timestamp(),
        0u32..5,
    )
        .prop_map(|(id, kind, created_at, attempts)| {
            let mut op = Operation::new(id, kind, created_at);
            op.attempts = attempts;
            op
        })
}

/// Generate a queue of operations with distinct ids.
pub fn operations(max_len: usize) -> impl Strategy<Value = Vec<Operation>> {
    prop::collection::vec(operation(), 0..=max_len).prop_map(|ops| {
        let mut seen = std::collections::HashSet::new();
        ops.into_iter()
            .filter(|op| seen.insert(op.id.clone()))
            .collect()
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    proptest! {
        #[test]
        fn test_wire_round_trip(op in operation()) {
            let json = op.to_json().unwrap();
            prop_assert_eq!(Operation::from_json(&json).unwrap(), op);
        }

        #[test]
        fn test_unrecognized_payload_survives_verbatim(kind in unrecognized_kind()) {
            let op = Operation::new(OperationId::random(), kind.clone(), 0);
            let back = Operation::from_json(&op.to_json().unwrap()).unwrap();
            prop_assert!(!back.kind.is_recognized());
            prop_assert_eq!(back.kind, kind);
        }

        #[test]
        fn test_sale_total_is_sum_of_lines(sale in sale_payload(6)) {
            let sum: i64 = sale.items.iter().map(|l| l.total).sum();
            prop_assert_eq!(sale.total_amount, sum);
        }

        #[test]
        fn test_generated_inventory_has_key(record in inventory_record()) {
            prop_assert!(record.natural_key().is_some());
        }

        #[test]
        fn test_queue_ids_are_distinct(ops in operations(12)) {
            let ids: std::collections::HashSet<_> = ops.iter().map(|op| op.id.clone()).collect();
            prop_assert_eq!(ids.len(), ops.len());
        }
    }
}
