//! The sync pass.
//!
//! A pass snapshots the queue, applies each due operation in order, and
//! writes the survivors back once at the end. Operations enqueued while the
//! pass was running are merged in behind the survivors, so nothing appended
//! mid-pass is lost.
//!
//! Delivery is at-least-once. If the process dies after a remote call
//! succeeded but before the write-back, that operation is applied again on
//! the next pass.
//!
//! Dropped operations are written to the dead letter store before the queue
//! is rewritten without them. If that write fails they stay queued.

use std::collections::HashSet;
use std::sync::Arc;

use tillsync_core::{Clock, Operation, OperationId};
use tillsync_store::{DeadLetter, DeadLetterStore, KvStore, QueueStore};
use tokio::sync::Mutex;
use tracing::{debug, error, info, warn};

use crate::apply::{ApplyEngine, ApplyError};
use crate::connectivity::StatusObserver;
use crate::error::Result;
use crate::remote::RemoteStore;
use crate::retry::{Disposition, RetryPolicy};

/// Counters for one pass.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct PassReport {
    /// Applied and removed from the queue.
    pub processed: usize,
    /// Failed and kept for a later pass.
    pub retried: usize,
    /// Failed too often and moved to the dead letter store.
    pub dropped: usize,
    /// Not yet due because of backoff.
    pub skipped: usize,
    /// Kinds this build cannot apply, kept untouched.
    pub carried_unknown: usize,
    /// Stock decrements that failed inside applied sales.
    pub decrement_failures: usize,
    /// Queue length after the write-back.
    pub remaining: usize,
    pub started_at: i64,
    pub finished_at: i64,
}

impl PassReport {
    /// Operations the pass looked at.
    pub fn examined(&self) -> usize {
        self.processed + self.retried + self.dropped + self.skipped + self.carried_unknown
    }
}

/// One read, apply, write-back cycle over a queue.
pub struct SyncPass<'a, K: KvStore + ?Sized, R: RemoteStore + ?Sized> {
    pub queue: &'a QueueStore<K>,
    pub dead_letters: &'a DeadLetterStore<K>,
    pub engine: &'a ApplyEngine<R>,
    pub policy: &'a RetryPolicy,
    pub clock: &'a dyn Clock,
}

impl<K: KvStore + ?Sized, R: RemoteStore + ?Sized> SyncPass<'_, K, R> {
    pub async fn run(self) -> Result<PassReport> {
        let mut report = PassReport {
            started_at: self.clock.now_millis(),
            ..PassReport::default()
        };

        let snapshot = self.queue.read().await?;
        if snapshot.is_empty() {
            report.finished_at = self.clock.now_millis();
            return Ok(report);
        }
        debug!(pending = snapshot.len(), "sync pass started");

        let seen: HashSet<OperationId> = snapshot.iter().map(|op| op.id.clone()).collect();
        let mut kept = Vec::with_capacity(snapshot.len());
        let mut letters = Vec::new();
        let mut dropped: HashSet<OperationId> = HashSet::new();

        for mut op in snapshot {
            if !op.kind.is_recognized() {
                report.carried_unknown += 1;
                kept.push(op);
                continue;
            }
            if !op.is_due(self.clock.now_millis()) {
                report.skipped += 1;
                kept.push(op);
                continue;
            }

            let err = match self.engine.apply(&op).await {
                Ok(outcome) => {
                    report.processed += 1;
                    report.decrement_failures += outcome.decrement_failures;
                    continue;
                }
                Err(ApplyError::Unrecognized(op_type)) => {
                    debug!(op_id = %op.id, op_type = %op_type, "carrying unapplied operation");
                    report.carried_unknown += 1;
                    kept.push(op);
                    continue;
                }
                Err(ApplyError::Remote(err)) => err,
            };

            let now = self.clock.now_millis();
            let attempts = op.attempts.saturating_add(1);
            match self.policy.disposition(attempts, err.kind, now) {
                Disposition::Retry { not_before } => {
                    op.record_failure(err.to_string(), not_before);
                    warn!(
                        op_id = %op.id,
                        op_type = op.op_type(),
                        attempts = op.attempts,
                        error = %err,
                        "operation failed; will retry"
                    );
                    report.retried += 1;
                    kept.push(op);
                }
                Disposition::Drop { reason } => {
                    op.record_failure(err.to_string(), None);
                    error!(
                        op_id = %op.id,
                        op_type = op.op_type(),
                        attempts = op.attempts,
                        error = %err,
                        reason = %reason,
                        "dropping operation"
                    );
                    report.dropped += 1;
                    dropped.insert(op.id.clone());
                    letters.push(DeadLetter {
                        operation: op.clone(),
                        reason,
                        dropped_at: now,
                    });
                    kept.push(op);
                }
            }
        }

        let letters_written = self.dead_letters.push_all(letters).await;
        match &letters_written {
            Ok(()) => kept.retain(|op| !dropped.contains(&op.id)),
            Err(err) => {
                error!(
                    ops = ?dropped,
                    error = %err,
                    "failed to persist dropped operations; keeping them queued"
                );
                report.retried += report.dropped;
                report.dropped = 0;
            }
        }

        report.remaining = self
            .queue
            .update(move |current| merge_arrivals(kept, current, &seen))
            .await?;
        letters_written?;

        report.finished_at = self.clock.now_millis();
        Ok(report)
    }
}

/// Survivors first, then anything appended since the snapshot was taken.
///
/// Arrivals are told apart by id; the queue refuses a second operation with
/// an id it already holds.
fn merge_arrivals(
    mut kept: Vec<Operation>,
    current: Vec<Operation>,
    seen: &HashSet<OperationId>,
) -> Vec<Operation> {
    kept.extend(current.into_iter().filter(|op| !seen.contains(&op.id)));
    kept
}

/// Result of asking for a pass.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PassOutcome {
    Completed(PassReport),
    /// Another pass held the guard. Nothing was done.
    AlreadyRunning,
}

impl PassOutcome {
    pub fn report(&self) -> Option<&PassReport> {
        match self {
            Self::Completed(report) => Some(report),
            Self::AlreadyRunning => None,
        }
    }
}

/// Runs passes over one queue, at most one at a time.
pub struct Synchronizer<K: KvStore + ?Sized, R: RemoteStore + ?Sized> {
    queue: QueueStore<K>,
    dead_letters: DeadLetterStore<K>,
    engine: ApplyEngine<R>,
    policy: RetryPolicy,
    clock: Arc<dyn Clock>,
    status: StatusObserver,
    guard: Mutex<()>,
}

impl<K: KvStore + ?Sized, R: RemoteStore + ?Sized> Synchronizer<K, R> {
    pub fn new(
        queue: QueueStore<K>,
        dead_letters: DeadLetterStore<K>,
        engine: ApplyEngine<R>,
        policy: RetryPolicy,
        clock: Arc<dyn Clock>,
        status: StatusObserver,
    ) -> Self {
        Self {
            queue,
            dead_letters,
            engine,
            policy,
            clock,
            status,
            guard: Mutex::new(()),
        }
    }

    pub fn queue(&self) -> &QueueStore<K> {
        &self.queue
    }

    pub fn dead_letters(&self) -> &DeadLetterStore<K> {
        &self.dead_letters
    }

    pub fn status(&self) -> &StatusObserver {
        &self.status
    }

    pub fn policy(&self) -> &RetryPolicy {
        &self.policy
    }

    /// Whether a pass holds the guard right now.
    pub fn is_running(&self) -> bool {
        self.guard.try_lock().is_err()
    }

    /// Run one pass unless another is in progress.
    pub async fn run_pass(&self) -> Result<PassOutcome> {
        let Ok(_running) = self.guard.try_lock() else {
            debug!("sync pass already running");
            return Ok(PassOutcome::AlreadyRunning);
        };

        let pass = SyncPass {
            queue: &self.queue,
            dead_letters: &self.dead_letters,
            engine: &self.engine,
            policy: &self.policy,
            clock: self.clock.as_ref(),
        };
        let report = match pass.run().await {
            Ok(report) => report,
            Err(err) => {
                warn!(error = %err, "sync pass failed");
                return Err(err);
            }
        };

        if report.examined() > 0 {
            info!(
                processed = report.processed,
                retried = report.retried,
                dropped = report.dropped,
                skipped = report.skipped,
                carried_unknown = report.carried_unknown,
                remaining = report.remaining,
                "sync pass finished"
            );
        }
        self.status.record_pass(report.clone());
        Ok(PassOutcome::Completed(report))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::RemoteError;
    use crate::remote::memory::{MemoryRemote, RemoteCall};
    use crate::remote::Table;
    use crate::retry::Backoff;
    use serde_json::json;
    use std::time::Duration;
    use tillsync_core::{InventoryRecord, ManualClock, OperationKind, SaleLine, SalePayload};
    use tillsync_store::MemoryKvStore;

    struct Harness {
        kv: Arc<MemoryKvStore>,
        remote: Arc<MemoryRemote>,
        clock: Arc<ManualClock>,
        sync: Synchronizer<MemoryKvStore, MemoryRemote>,
    }

    fn harness(policy: RetryPolicy) -> Harness {
        let kv = Arc::new(MemoryKvStore::new());
        let remote = Arc::new(MemoryRemote::new());
        let clock = Arc::new(ManualClock::new(1_000));
        let engine = ApplyEngine::new(Arc::clone(&remote), clock.clone());
        let sync = Synchronizer::new(
            QueueStore::new(Arc::clone(&kv)),
            DeadLetterStore::new(Arc::clone(&kv)),
            engine,
            policy,
            clock.clone(),
            StatusObserver::new(true),
        );
        Harness {
            kv,
            remote,
            clock,
            sync,
        }
    }

    fn inventory_op(id: &str, product: &str) -> Operation {
        let record = InventoryRecord::for_product(product).with_quantity(1);
        Operation::new(OperationId::new(id).unwrap(), record.into(), 1)
    }

    fn sale_op(id: &str, invoice: &str) -> Operation {
        let sale = SalePayload::new(invoice, vec![SaleLine::new("Tea", 1, 100)], 1);
        Operation::new(OperationId::new(id).unwrap(), sale.into(), 1)
    }

    fn completed(outcome: PassOutcome) -> PassReport {
        match outcome {
            PassOutcome::Completed(report) => report,
            PassOutcome::AlreadyRunning => panic!("pass did not run"),
        }
    }

    #[tokio::test]
    async fn test_empty_queue_makes_no_calls() {
        let h = harness(RetryPolicy::default());
        let report = completed(h.sync.run_pass().await.unwrap());
        assert_eq!(report.examined(), 0);
        assert!(h.remote.calls().is_empty());
    }

    #[tokio::test]
    async fn test_success_removes_operations() {
        let h = harness(RetryPolicy::default());
        h.sync.queue().append(sale_op("a", "INV-1")).await.unwrap();
        h.sync.queue().append(inventory_op("b", "p1")).await.unwrap();

        let report = completed(h.sync.run_pass().await.unwrap());

        assert_eq!(report.processed, 2);
        assert_eq!(report.remaining, 0);
        assert!(h.sync.queue().read().await.unwrap().is_empty());
        assert_eq!(h.sync.status().status().last_pass, Some(report));
    }

    #[tokio::test]
    async fn test_failure_increments_attempts_and_keeps_order() {
        let h = harness(RetryPolicy::default());
        h.sync.queue().append(inventory_op("a", "p1")).await.unwrap();
        h.sync.queue().append(inventory_op("b", "p2")).await.unwrap();
        h.remote.fail_always(
            RemoteCall::Upsert(Table::Inventory),
            RemoteError::transient("503"),
        );

        let report = completed(h.sync.run_pass().await.unwrap());

        assert_eq!(report.retried, 2);
        let queue = h.sync.queue().read().await.unwrap();
        let ids: Vec<&str> = queue.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, ["a", "b"]);
        assert!(queue.iter().all(|op| op.attempts == 1));
        assert_eq!(
            queue[0].last_error.as_deref(),
            Some("transient remote failure: 503")
        );
        assert_eq!(queue[0].kind, inventory_op("a", "p1").kind);
    }

    #[tokio::test]
    async fn test_drops_at_threshold_into_dead_letters() {
        let h = harness(RetryPolicy::default());
        let mut op = inventory_op("a", "p1");
        op.attempts = 4;
        h.sync.queue().append(op).await.unwrap();
        h.remote.fail_always(
            RemoteCall::Upsert(Table::Inventory),
            RemoteError::transient("503"),
        );

        let report = completed(h.sync.run_pass().await.unwrap());

        assert_eq!(report.dropped, 1);
        assert!(h.sync.queue().read().await.unwrap().is_empty());
        let letters = h.sync.dead_letters().list().await.unwrap();
        assert_eq!(letters.len(), 1);
        assert_eq!(letters[0].operation.attempts, 5);
        assert_eq!(letters[0].reason, "gave up after 5 attempts");
    }

    #[tokio::test]
    async fn test_unrecognized_is_carried_without_calls() {
        let h = harness(RetryPolicy::default());
        let kind = OperationKind::from_wire("refund_issue".into(), json!({"amount": 3}));
        let unknown = Operation::new(OperationId::new("u").unwrap(), kind, 1);
        h.sync.queue().append(unknown.clone()).await.unwrap();

        let report = completed(h.sync.run_pass().await.unwrap());

        assert_eq!(report.carried_unknown, 1);
        assert!(h.remote.calls().is_empty());
        assert_eq!(h.sync.queue().read().await.unwrap(), vec![unknown]);
    }

    #[tokio::test]
    async fn test_backoff_defers_until_due() {
        let policy = RetryPolicy::default().with_backoff(
            Backoff::new(Duration::from_secs(5), Duration::from_secs(60)).with_jitter(false),
        );
        let h = harness(policy);
        h.sync.queue().append(inventory_op("a", "p1")).await.unwrap();
        h.remote.fail_next(
            RemoteCall::Upsert(Table::Inventory),
            RemoteError::transient("503"),
        );

        completed(h.sync.run_pass().await.unwrap());
        let queue = h.sync.queue().read().await.unwrap();
        assert_eq!(queue[0].next_attempt_at, Some(6_000));

        let report = completed(h.sync.run_pass().await.unwrap());
        assert_eq!(report.skipped, 1);
        assert_eq!(h.sync.queue().read().await.unwrap()[0].attempts, 1);

        h.clock.advance(Duration::from_secs(5));
        let report = completed(h.sync.run_pass().await.unwrap());
        assert_eq!(report.processed, 1);
    }

    #[tokio::test]
    async fn test_permanent_failure_drop_opt_in() {
        let h = harness(RetryPolicy::default().with_drop_permanent_failures(true));
        let keyless = Operation::new(
            OperationId::new("k").unwrap(),
            InventoryRecord::default().with_quantity(2).into(),
            1,
        );
        h.sync.queue().append(keyless).await.unwrap();

        let report = completed(h.sync.run_pass().await.unwrap());

        assert_eq!(report.dropped, 1);
        assert_eq!(h.sync.dead_letters().len().await.unwrap(), 1);
    }

    #[test]
    fn test_merge_keeps_only_new_arrivals() {
        let seen: HashSet<OperationId> = [OperationId::new("a").unwrap()].into_iter().collect();
        let merged = merge_arrivals(
            Vec::new(),
            vec![inventory_op("a", "p1"), inventory_op("late", "p2")],
            &seen,
        );
        let ids: Vec<&str> = merged.iter().map(|op| op.id.as_str()).collect();
        assert_eq!(ids, ["late"]);
    }

    #[tokio::test]
    async fn test_concurrent_enqueue_survives_slow_pass() {
        let h = Arc::new(harness(RetryPolicy::default()));
        h.sync.queue().append(inventory_op("a", "p1")).await.unwrap();
        h.remote.set_latency(Some(Duration::from_millis(50)));

        let running = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.sync.run_pass().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        h.sync.queue().append(inventory_op("b", "p2")).await.unwrap();

        let report = completed(running.await.unwrap().unwrap());
        assert_eq!(report.processed, 1);
        let ids: Vec<String> = h
            .sync
            .queue()
            .read()
            .await
            .unwrap()
            .iter()
            .map(|op| op.id.to_string())
            .collect();
        assert_eq!(ids, ["b"]);
    }

    #[tokio::test]
    async fn test_second_pass_while_running_is_noop() {
        let h = Arc::new(harness(RetryPolicy::default()));
        h.sync.queue().append(inventory_op("a", "p1")).await.unwrap();
        h.remote.set_latency(Some(Duration::from_millis(50)));

        let first = {
            let h = Arc::clone(&h);
            tokio::spawn(async move { h.sync.run_pass().await })
        };
        tokio::time::sleep(Duration::from_millis(10)).await;
        assert!(h.sync.is_running());

        assert_eq!(h.sync.run_pass().await.unwrap(), PassOutcome::AlreadyRunning);
        assert_eq!(completed(first.await.unwrap().unwrap()).processed, 1);
        assert_eq!(h.remote.call_count(RemoteCall::Upsert(Table::Inventory)), 1);
    }

    #[tokio::test]
    async fn test_failed_dead_letter_write_keeps_dropped_queued() {
        let h = harness(RetryPolicy::default().with_drop_threshold(1));
        h.sync.queue().append(inventory_op("a", "p1")).await.unwrap();
        h.sync.queue().append(sale_op("b", "INV-2")).await.unwrap();
        h.remote.fail_always(
            RemoteCall::Upsert(Table::Inventory),
            RemoteError::transient("503"),
        );
        h.kv.reject_writes_to(tillsync_store::DEAD_LETTER_KEY, true);

        assert!(h.sync.run_pass().await.is_err());

        // The applied sale is gone, the dropped update is still queued.
        let queue = h.sync.queue().read().await.unwrap();
        assert_eq!(queue.len(), 1);
        assert_eq!(queue[0].id.as_str(), "a");
        assert_eq!(queue[0].attempts, 1);
        assert!(h.sync.dead_letters().list().await.unwrap().is_empty());

        h.kv.reject_writes_to(tillsync_store::DEAD_LETTER_KEY, false);
        let report = completed(h.sync.run_pass().await.unwrap());
        assert_eq!(report.dropped, 1);
        assert!(h.sync.queue().read().await.unwrap().is_empty());
        assert_eq!(h.sync.dead_letters().len().await.unwrap(), 1);
    }

    #[tokio::test]
    async fn test_failed_write_back_keeps_previous_queue() {
        let h = harness(RetryPolicy::default());
        h.sync.queue().append(inventory_op("a", "p1")).await.unwrap();
        h.kv.reject_writes(true);

        assert!(h.sync.run_pass().await.is_err());
        h.kv.reject_writes(false);

        assert_eq!(h.sync.queue().len().await.unwrap(), 1);
        assert!(!h.sync.is_running());
    }
}
