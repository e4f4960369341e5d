//! The offline queue: the entry point for producers.
//!
//! Producers enqueue operations and move on. The queue persists each one
//! before returning, then nudges the sync machinery if the device is
//! online. Whatever happens remotely is never reported back to the
//! producer; it shows up in [`SyncStatus`] and the dead letter store.

use std::sync::{Arc, Mutex};

use tillsync_core::{
    Clock, IdGenerator, InventoryRecord, Operation, OperationDraft, OperationId,
    RandomIdGenerator, SalePayload, SystemClock,
};
use tillsync_store::{DeadLetter, DeadLetterStore, KvStore, QueueSnapshot, QueueStore};
use tillsync_sync::{
    ApplyEngine, ConnectivitySignal, PassOutcome, RemoteStore, StatusObserver,
    StatusSubscription, SyncStatus, SyncTrigger, SyncWorker, Synchronizer,
};
use tokio::sync::watch;
use tracing::{debug, info, warn};

use crate::config::QueueConfig;
use crate::error::{Result, TillError};

/// Builder for [`OfflineQueue`].
pub struct OfflineQueueBuilder<K: KvStore + ?Sized, R: RemoteStore + ?Sized> {
    kv: Arc<K>,
    remote: Arc<R>,
    clock: Option<Arc<dyn Clock>>,
    ids: Option<Arc<dyn IdGenerator>>,
    connectivity: Option<ConnectivitySignal>,
    config: QueueConfig,
}

impl<K, R> OfflineQueueBuilder<K, R>
where
    K: KvStore + ?Sized + 'static,
    R: RemoteStore + ?Sized + 'static,
{
    pub fn clock(mut self, clock: Arc<dyn Clock>) -> Self {
        self.clock = Some(clock);
        self
    }

    pub fn id_generator(mut self, ids: Arc<dyn IdGenerator>) -> Self {
        self.ids = Some(ids);
        self
    }

    /// Share a connectivity signal with the host. Defaults to a fresh
    /// signal that starts online.
    pub fn connectivity(mut self, signal: ConnectivitySignal) -> Self {
        self.connectivity = Some(signal);
        self
    }

    pub fn config(mut self, config: QueueConfig) -> Self {
        self.config = config;
        self
    }

    /// Build the queue. Must be called from within a Tokio runtime.
    pub fn build(self) -> Result<OfflineQueue<K, R>> {
        if tokio::runtime::Handle::try_current().is_err() {
            return Err(TillError::NoRuntime);
        }

        let clock = self.clock.unwrap_or_else(|| Arc::new(SystemClock) as Arc<dyn Clock>);
        let ids = self.ids.unwrap_or_else(|| Arc::new(RandomIdGenerator) as Arc<dyn IdGenerator>);
        let connectivity = self.connectivity.unwrap_or_default();
        let sync_config = &self.config.sync;

        let engine = ApplyEngine::new(self.remote, Arc::clone(&clock))
            .with_call_timeout(sync_config.call_timeout)
            .with_decrement(sync_config.decrement);
        let status = StatusObserver::new(connectivity.is_online());
        let subscription = status.follow(&connectivity);

        let sync = Synchronizer::new(
            QueueStore::with_key(Arc::clone(&self.kv), self.config.queue_key.clone()),
            DeadLetterStore::with_key(self.kv, self.config.dead_letter_key.clone()),
            engine,
            sync_config.retry.clone(),
            Arc::clone(&clock),
            status,
        );

        Ok(OfflineQueue {
            sync: Arc::new(sync),
            clock,
            ids,
            connectivity,
            config: self.config,
            trigger: Mutex::new(None),
            _subscription: subscription,
        })
    }
}

/// A durable queue of operations with background synchronization.
pub struct OfflineQueue<K: KvStore + ?Sized, R: RemoteStore + ?Sized> {
    sync: Arc<Synchronizer<K, R>>,
    clock: Arc<dyn Clock>,
    ids: Arc<dyn IdGenerator>,
    connectivity: ConnectivitySignal,
    config: QueueConfig,
    /// Set while a worker started by this queue is alive.
    trigger: Mutex<Option<SyncTrigger>>,
    _subscription: StatusSubscription,
}

impl<K, R> OfflineQueue<K, R>
where
    K: KvStore + ?Sized + 'static,
    R: RemoteStore + ?Sized + 'static,
{
    pub fn builder(kv: Arc<K>, remote: Arc<R>) -> OfflineQueueBuilder<K, R> {
        OfflineQueueBuilder {
            kv,
            remote,
            clock: None,
            ids: None,
            connectivity: None,
            config: QueueConfig::default(),
        }
    }

    pub fn config(&self) -> &QueueConfig {
        &self.config
    }

    pub fn connectivity(&self) -> &ConnectivitySignal {
        &self.connectivity
    }

    pub fn synchronizer(&self) -> &Arc<Synchronizer<K, R>> {
        &self.sync
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Producers
    // ─────────────────────────────────────────────────────────────────────────

    /// Persist an operation and return its id.
    ///
    /// Assigns an id if the draft has none, zero attempts, and the current
    /// time. Once this returns, the operation is durable. If online, a pass
    /// is requested without waiting for it.
    pub async fn enqueue(&self, draft: impl Into<OperationDraft>) -> Result<OperationId> {
        let op = draft
            .into()
            .into_operation(self.ids.as_ref(), self.clock.now_millis())?;
        let id = op.id.clone();
        let op_type = op.op_type().to_string();

        let len = self.sync.queue().append(op).await?;
        self.sync.status().set_queue_len(len);
        info!(op_id = %id, op_type = %op_type, queue_len = len, "operation enqueued");

        self.request_pass();
        Ok(id)
    }

    pub async fn enqueue_sale(&self, sale: SalePayload) -> Result<OperationId> {
        self.enqueue(sale).await
    }

    pub async fn enqueue_inventory_update(&self, record: InventoryRecord) -> Result<OperationId> {
        self.enqueue(record).await
    }

    /// Ask for a pass without waiting. Does nothing while offline.
    fn request_pass(&self) {
        if !self.connectivity.is_online() {
            debug!("offline; pass deferred");
            return;
        }

        if let Ok(mut slot) = self.trigger.lock() {
            if slot.as_ref().is_some_and(SyncTrigger::fire) {
                return;
            }
            *slot = None;
        }

        let sync = Arc::clone(&self.sync);
        tokio::spawn(async move {
            // Failures are logged by the synchronizer and stay in the queue.
            let _ = sync.run_pass().await;
        });
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Inspection
    // ─────────────────────────────────────────────────────────────────────────

    /// Pending operations in queue order.
    pub async fn pending(&self) -> Result<Vec<Operation>> {
        Ok(self.snapshot().await?.operations)
    }

    /// Stored queue entries, including any that do not decode.
    pub async fn queue_len(&self) -> Result<usize> {
        Ok(self.snapshot().await?.len())
    }

    async fn snapshot(&self) -> Result<QueueSnapshot> {
        let snapshot = self.sync.queue().snapshot().await?;
        self.sync.status().set_queue_len(snapshot.len());
        Ok(snapshot)
    }

    pub fn status(&self) -> SyncStatus {
        self.sync.status().status()
    }

    pub fn watch_status(&self) -> watch::Receiver<SyncStatus> {
        self.sync.status().subscribe()
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Sync
    // ─────────────────────────────────────────────────────────────────────────

    /// Run a pass now and wait for it. Runs regardless of connectivity.
    pub async fn sync_now(&self) -> Result<PassOutcome> {
        Ok(self.sync.run_pass().await?)
    }

    /// Start the background worker.
    ///
    /// While the returned worker is alive, enqueues are routed to it instead
    /// of spawning one-off passes.
    pub fn start_worker(&self) -> SyncWorker {
        let worker = SyncWorker::start(
            Arc::clone(&self.sync),
            self.connectivity.clone(),
            self.config.sync.interval,
        );
        if let Ok(mut slot) = self.trigger.lock() {
            *slot = Some(worker.trigger_handle());
        }
        worker
    }

    // ─────────────────────────────────────────────────────────────────────────
    // Dead letters
    // ─────────────────────────────────────────────────────────────────────────

    pub async fn dead_letters(&self) -> Result<Vec<DeadLetter>> {
        Ok(self.sync.dead_letters().list().await?)
    }

    /// Move a dropped operation back to the end of the queue with its
    /// attempt count and backoff reset.
    ///
    /// The operation is queued before its dead letter is removed, so a
    /// failure leaves it in one store or both, never in neither.
    pub async fn replay_dead_letter(&self, id: &OperationId) -> Result<()> {
        let letter = self
            .sync
            .dead_letters()
            .list()
            .await?
            .into_iter()
            .find(|letter| &letter.operation.id == id)
            .ok_or_else(|| TillError::DeadLetterNotFound(id.clone()))?;

        let mut op = letter.operation;
        op.attempts = 0;
        op.next_attempt_at = None;

        let len = self.sync.queue().append(op).await?;
        self.sync.status().set_queue_len(len);

        if let Err(err) = self.sync.dead_letters().take(id).await {
            warn!(op_id = %id, error = %err, "replayed operation is still in the dead letter store");
            self.request_pass();
            return Err(err.into());
        }
        info!(op_id = %id, queue_len = len, "dead letter replayed");

        self.request_pass();
        Ok(())
    }

    /// Discard every dead letter. Returns how many were removed.
    pub async fn clear_dead_letters(&self) -> Result<usize> {
        Ok(self.sync.dead_letters().clear().await?)
    }
}
