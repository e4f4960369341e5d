//! Remote store abstraction.
//!
//! The remote is a table-oriented store (`sales`, `sale_items`,
//! `inventory`). Implementations may speak HTTP, a database wire protocol,
//! or anything else; the sync engine only needs the calls below.

use std::fmt;

use async_trait::async_trait;
use serde_json::{Map, Value};

use crate::error::{RemoteError, RemoteResult};

/// A row as sent to or read from the remote store.
pub type Record = Map<String, Value>;

/// Remote tables the engine writes to.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub enum Table {
    Sales,
    SaleItems,
    Inventory,
}

impl Table {
    pub fn name(self) -> &'static str {
        match self {
            Self::Sales => "sales",
            Self::SaleItems => "sale_items",
            Self::Inventory => "inventory",
        }
    }
}

impl fmt::Display for Table {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

/// Identifies one row by an equality match on a column.
#[derive(Debug, Clone, PartialEq)]
pub struct RecordKey {
    pub column: String,
    pub value: Value,
}

impl RecordKey {
    pub fn new(column: impl Into<String>, value: impl Into<Value>) -> Self {
        Self {
            column: column.into(),
            value: value.into(),
        }
    }

    /// Key on the `id` column.
    pub fn id(value: impl Into<Value>) -> Self {
        Self::new("id", value)
    }

    pub fn matches(&self, record: &Record) -> bool {
        record.get(&self.column) == Some(&self.value)
    }
}

impl fmt::Display for RecordKey {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}={}", self.column, self.value)
    }
}

/// Identifier the remote assigned to an inserted row.
#[derive(Debug, Clone, PartialEq)]
pub struct RemoteId(pub Value);

impl RemoteId {
    pub fn as_value(&self) -> &Value {
        &self.0
    }

    pub fn into_value(self) -> Value {
        self.0
    }
}

impl fmt::Display for RemoteId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match &self.0 {
            Value::String(s) => f.write_str(s),
            other => write!(f, "{other}"),
        }
    }
}

/// Calls the sync engine makes against the remote store.
///
/// Implementations must be thread-safe (Send + Sync). Every failure carries
/// a [`FailureKind`](crate::FailureKind) so the retry policy can tell
/// transient faults from permanent rejections.
#[async_trait]
pub trait RemoteStore: Send + Sync {
    /// Insert one row and return its identifier.
    async fn insert(&self, table: Table, record: Record) -> RemoteResult<RemoteId>;

    /// Insert several rows in one request. All or nothing.
    async fn insert_many(&self, table: Table, records: Vec<Record>) -> RemoteResult<()>;

    /// Insert or merge a row, matching existing rows on `on_conflict`.
    async fn upsert(&self, table: Table, record: Record, on_conflict: &str) -> RemoteResult<()>;

    /// Read the row matching `key`.
    async fn read_one(&self, table: Table, key: &RecordKey) -> RemoteResult<Record>;

    /// Set the columns in `patch` on the row matching `key`.
    async fn update(&self, table: Table, key: &RecordKey, patch: Record) -> RemoteResult<()>;

    /// Atomically lower `column` by `amount`, flooring at zero, and return
    /// the new value.
    ///
    /// Remotes without a server-side conditional update keep the default,
    /// which reports [`FailureKind::Unsupported`](crate::FailureKind::Unsupported).
    async fn decrement_floor(
        &self,
        table: Table,
        key: &RecordKey,
        column: &str,
        amount: i64,
    ) -> RemoteResult<i64> {
        let _ = (key, column, amount);
        Err(RemoteError::unsupported(format!(
            "decrement_floor on {table}"
        )))
    }
}

/// An in-memory remote store for testing.
///
/// Rows live in per-table vectors. Failures can be scripted per call, calls
/// are logged, and conditional decrement support can be switched off to
/// exercise the read-modify-write path.
pub mod memory {
    use super::*;
    use std::collections::{BTreeMap, HashMap, VecDeque};
    use std::sync::atomic::{AtomicBool, AtomicI64, Ordering};
    use std::sync::Mutex;
    use std::time::Duration;

    /// The kind of call made against the remote, with its table.
    #[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
    pub enum RemoteCall {
        Insert(Table),
        InsertMany(Table),
        Upsert(Table),
        ReadOne(Table),
        Update(Table),
        DecrementFloor(Table),
    }

    #[derive(Default)]
    struct Failures {
        scripted: HashMap<RemoteCall, VecDeque<RemoteError>>,
        always: HashMap<RemoteCall, RemoteError>,
    }

    #[derive(Default)]
    struct State {
        tables: BTreeMap<Table, Vec<Record>>,
        calls: Vec<RemoteCall>,
        failures: Failures,
    }

    /// In-memory remote implementation.
    pub struct MemoryRemote {
        state: Mutex<State>,
        next_id: AtomicI64,
        atomic_decrement: AtomicBool,
        latency: Mutex<Option<Duration>>,
    }

    impl Default for MemoryRemote {
        fn default() -> Self {
            Self {
                state: Mutex::new(State::default()),
                next_id: AtomicI64::new(1),
                atomic_decrement: AtomicBool::new(true),
                latency: Mutex::new(None),
            }
        }
    }

    impl MemoryRemote {
        pub fn new() -> Self {
            Self::default()
        }

        /// Whether `decrement_floor` is served or reported unsupported.
        pub fn set_atomic_decrement(&self, supported: bool) {
            self.atomic_decrement.store(supported, Ordering::SeqCst);
        }

        /// Delay every call by `latency`.
        pub fn set_latency(&self, latency: Option<Duration>) {
            *lock(&self.latency) = latency;
        }

        /// Fail the next `call` with `error`. Queued failures are consumed in order.
        pub fn fail_next(&self, call: RemoteCall, error: RemoteError) {
            lock(&self.state)
                .failures
                .scripted
                .entry(call)
                .or_default()
                .push_back(error);
        }

        /// Fail every `call` with `error` until cleared.
        pub fn fail_always(&self, call: RemoteCall, error: RemoteError) {
            lock(&self.state).failures.always.insert(call, error);
        }

        pub fn clear_failures(&self) {
            lock(&self.state).failures = Failures::default();
        }

        /// Put a row in place without logging a call.
        pub fn seed(&self, table: Table, record: Record) {
            lock(&self.state).tables.entry(table).or_default().push(record);
        }

        pub fn rows(&self, table: Table) -> Vec<Record> {
            lock(&self.state)
                .tables
                .get(&table)
                .cloned()
                .unwrap_or_default()
        }

        pub fn find(&self, table: Table, key: &RecordKey) -> Option<Record> {
            lock(&self.state)
                .tables
                .get(&table)
                .and_then(|rows| rows.iter().find(|row| key.matches(row)).cloned())
        }

        pub fn calls(&self) -> Vec<RemoteCall> {
            lock(&self.state).calls.clone()
        }

        pub fn call_count(&self, call: RemoteCall) -> usize {
            lock(&self.state).calls.iter().filter(|c| **c == call).count()
        }

        async fn enter(&self, call: RemoteCall) -> RemoteResult<()> {
            let latency = *lock(&self.latency);
            if let Some(latency) = latency {
                tokio::time::sleep(latency).await;
            }

            let mut state = lock(&self.state);
            state.calls.push(call);
            if let Some(err) = state
                .failures
                .scripted
                .get_mut(&call)
                .and_then(VecDeque::pop_front)
            {
                return Err(err);
            }
            match state.failures.always.get(&call) {
                Some(err) => Err(err.clone()),
                None => Ok(()),
            }
        }

        fn assign_id(&self, record: &mut Record) -> Value {
            match record.get("id") {
                Some(id) if !id.is_null() => id.clone(),
                _ => {
                    let id = Value::from(self.next_id.fetch_add(1, Ordering::SeqCst));
                    record.insert("id".into(), id.clone());
                    id
                }
            }
        }
    }

    fn lock<T>(mutex: &Mutex<T>) -> std::sync::MutexGuard<'_, T> {
        // Test double: a panic while holding the lock already failed the test.
        mutex.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn not_found(table: Table, key: &RecordKey) -> RemoteError {
        RemoteError::permanent(format!("no row in {table} where {key}"))
    }

    #[async_trait]
    impl RemoteStore for MemoryRemote {
        async fn insert(&self, table: Table, mut record: Record) -> RemoteResult<RemoteId> {
            self.enter(RemoteCall::Insert(table)).await?;
            let id = self.assign_id(&mut record);
            lock(&self.state).tables.entry(table).or_default().push(record);
            Ok(RemoteId(id))
        }

        async fn insert_many(&self, table: Table, records: Vec<Record>) -> RemoteResult<()> {
            self.enter(RemoteCall::InsertMany(table)).await?;
            let rows: Vec<Record> = records
                .into_iter()
                .map(|mut record| {
                    self.assign_id(&mut record);
                    record
                })
                .collect();
            lock(&self.state).tables.entry(table).or_default().extend(rows);
            Ok(())
        }

        async fn upsert(
            &self,
            table: Table,
            mut record: Record,
            on_conflict: &str,
        ) -> RemoteResult<()> {
            self.enter(RemoteCall::Upsert(table)).await?;
            let Some(value) = record.get(on_conflict).cloned() else {
                return Err(RemoteError::validation(format!(
                    "upsert into {table} is missing conflict column {on_conflict}"
                )));
            };
            let key = RecordKey::new(on_conflict, value);

            let mut state = lock(&self.state);
            let rows = state.tables.entry(table).or_default();
            if let Some(row) = rows.iter_mut().find(|row| key.matches(row)) {
                row.extend(record);
            } else {
                self.assign_id(&mut record);
                rows.push(record);
            }
            Ok(())
        }

        async fn read_one(&self, table: Table, key: &RecordKey) -> RemoteResult<Record> {
            self.enter(RemoteCall::ReadOne(table)).await?;
            self.find(table, key).ok_or_else(|| not_found(table, key))
        }

        async fn update(&self, table: Table, key: &RecordKey, patch: Record) -> RemoteResult<()> {
            self.enter(RemoteCall::Update(table)).await?;
            let mut state = lock(&self.state);
            let row = state
                .tables
                .get_mut(&table)
                .and_then(|rows| rows.iter_mut().find(|row| key.matches(row)))
                .ok_or_else(|| not_found(table, key))?;
            row.extend(patch);
            Ok(())
        }

        async fn decrement_floor(
            &self,
            table: Table,
            key: &RecordKey,
            column: &str,
            amount: i64,
        ) -> RemoteResult<i64> {
            if !self.atomic_decrement.load(Ordering::SeqCst) {
                return Err(RemoteError::unsupported(format!(
                    "decrement_floor on {table}"
                )));
            }
            self.enter(RemoteCall::DecrementFloor(table)).await?;
            let mut state = lock(&self.state);
            let row = state
                .tables
                .get_mut(&table)
                .and_then(|rows| rows.iter_mut().find(|row| key.matches(row)))
                .ok_or_else(|| not_found(table, key))?;
            let current = row.get(column).and_then(Value::as_i64).unwrap_or(0);
            let next = current.saturating_sub(amount).max(0);
            row.insert(column.to_string(), Value::from(next));
            Ok(next)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::memory::{MemoryRemote, RemoteCall};
    use super::*;
    use crate::error::FailureKind;
    use serde_json::json;

    fn record(value: Value) -> Record {
        match value {
            Value::Object(map) => map,
            _ => panic!("not an object"),
        }
    }

    #[tokio::test]
    async fn test_insert_assigns_ids() {
        let remote = MemoryRemote::new();
        let a = remote
            .insert(Table::Sales, record(json!({"invoice_no": "A"})))
            .await
            .unwrap();
        let b = remote
            .insert(Table::Sales, record(json!({"invoice_no": "B"})))
            .await
            .unwrap();

        assert_ne!(a, b);
        assert_eq!(remote.rows(Table::Sales).len(), 2);
        assert!(remote.find(Table::Sales, &RecordKey::id(a.into_value())).is_some());
    }

    #[tokio::test]
    async fn test_upsert_merges_on_conflict_column() {
        let remote = MemoryRemote::new();
        remote.seed(
            Table::Inventory,
            record(json!({"id": "p1", "sku": "S1", "quantity": 5, "product_name": "Tea"})),
        );

        remote
            .upsert(Table::Inventory, record(json!({"sku": "S1", "quantity": 9})), "sku")
            .await
            .unwrap();

        let rows = remote.rows(Table::Inventory);
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0]["quantity"], json!(9));
        assert_eq!(rows[0]["product_name"], json!("Tea"));
    }

    #[tokio::test]
    async fn test_upsert_without_conflict_column_is_validation() {
        let remote = MemoryRemote::new();
        let err = remote
            .upsert(Table::Inventory, record(json!({"quantity": 1})), "id")
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Validation);
    }

    #[tokio::test]
    async fn test_scripted_failures_are_consumed_in_order() {
        let remote = MemoryRemote::new();
        remote.fail_next(
            RemoteCall::Insert(Table::Sales),
            RemoteError::transient("connection reset"),
        );

        let first = remote.insert(Table::Sales, Record::new()).await;
        let second = remote.insert(Table::Sales, Record::new()).await;

        assert_eq!(first.unwrap_err().kind, FailureKind::Transient);
        assert!(second.is_ok());
        assert_eq!(remote.call_count(RemoteCall::Insert(Table::Sales)), 2);
    }

    #[tokio::test]
    async fn test_decrement_floor_clamps_at_zero() {
        let remote = MemoryRemote::new();
        remote.seed(Table::Inventory, record(json!({"id": "p1", "quantity": 3})));

        let key = RecordKey::id("p1");
        assert_eq!(remote.decrement_floor(Table::Inventory, &key, "quantity", 2).await, Ok(1));
        assert_eq!(remote.decrement_floor(Table::Inventory, &key, "quantity", 5).await, Ok(0));
    }

    #[tokio::test]
    async fn test_decrement_floor_can_be_unsupported() {
        let remote = MemoryRemote::new();
        remote.set_atomic_decrement(false);
        let err = remote
            .decrement_floor(Table::Inventory, &RecordKey::id("p1"), "quantity", 1)
            .await
            .unwrap_err();
        assert_eq!(err.kind, FailureKind::Unsupported);
        assert!(remote.calls().is_empty());
    }
}
