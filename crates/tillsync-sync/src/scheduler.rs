//! Background sync worker.
//!
//! The worker owns one task that runs passes when any of these fire:
//! the interval timer, an offline-to-online transition, or an explicit
//! trigger. Passes only start while online. The first timer tick is
//! immediate, so starting the worker also attempts a pass.

use std::sync::Arc;
use std::time::Duration;

use tillsync_store::KvStore;
use tokio::sync::{mpsc, oneshot};
use tokio::task::JoinHandle;
use tokio::time::MissedTickBehavior;
use tracing::{debug, info, warn};

use crate::connectivity::ConnectivitySignal;
use crate::error::{Result, SyncError};
use crate::pass::{PassOutcome, Synchronizer};
use crate::remote::RemoteStore;

/// Why a pass was attempted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Cause {
    Timer,
    Reconnected,
    Triggered,
}

/// Requests a pass from a running worker.
///
/// Requests coalesce: while one is pending, further ones are absorbed.
#[derive(Debug, Clone)]
pub struct SyncTrigger {
    tx: mpsc::Sender<()>,
}

impl SyncTrigger {
    /// Ask for a pass. Returns false if the worker has stopped.
    pub fn fire(&self) -> bool {
        match self.tx.try_send(()) {
            Ok(()) | Err(mpsc::error::TrySendError::Full(())) => true,
            Err(mpsc::error::TrySendError::Closed(())) => false,
        }
    }

    pub fn is_closed(&self) -> bool {
        self.tx.is_closed()
    }
}

/// Handle to the background sync task.
///
/// Dropping the handle without calling [`stop`](Self::stop) aborts the task.
pub struct SyncWorker {
    trigger: SyncTrigger,
    shutdown: Option<oneshot::Sender<()>>,
    task: Option<JoinHandle<()>>,
}

impl SyncWorker {
    /// Spawn the worker. Must be called from within a Tokio runtime.
    pub fn start<K, R>(
        sync: Arc<Synchronizer<K, R>>,
        connectivity: ConnectivitySignal,
        interval: Duration,
    ) -> Self
    where
        K: KvStore + ?Sized + 'static,
        R: RemoteStore + ?Sized + 'static,
    {
        let (trigger_tx, trigger_rx) = mpsc::channel(1);
        let (shutdown_tx, shutdown_rx) = oneshot::channel();
        let task = tokio::spawn(run(sync, connectivity, interval, trigger_rx, shutdown_rx));
        info!(interval_ms = interval.as_millis() as u64, "sync worker started");

        Self {
            trigger: SyncTrigger { tx: trigger_tx },
            shutdown: Some(shutdown_tx),
            task: Some(task),
        }
    }

    /// Request a pass. Ignored while offline.
    pub fn trigger(&self) -> Result<()> {
        if self.trigger.fire() {
            Ok(())
        } else {
            Err(SyncError::WorkerStopped)
        }
    }

    /// A cloneable handle for requesting passes.
    pub fn trigger_handle(&self) -> SyncTrigger {
        self.trigger.clone()
    }

    pub fn is_running(&self) -> bool {
        self.task.as_ref().is_some_and(|task| !task.is_finished())
    }

    /// Stop the worker, letting a pass in progress finish first.
    pub async fn stop(mut self) {
        if let Some(shutdown) = self.shutdown.take() {
            let _ = shutdown.send(());
        }
        if let Some(task) = self.task.take() {
            if let Err(err) = task.await {
                warn!(error = %err, "sync worker task ended abnormally");
            }
        }
        info!("sync worker stopped");
    }
}

impl Drop for SyncWorker {
    fn drop(&mut self) {
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

async fn run<K, R>(
    sync: Arc<Synchronizer<K, R>>,
    connectivity: ConnectivitySignal,
    interval: Duration,
    mut triggers: mpsc::Receiver<()>,
    mut shutdown: oneshot::Receiver<()>,
) where
    K: KvStore + ?Sized,
    R: RemoteStore + ?Sized,
{
    let mut ticker = tokio::time::interval(interval);
    ticker.set_missed_tick_behavior(MissedTickBehavior::Delay);
    let mut online = connectivity.subscribe();

    loop {
        let cause = tokio::select! {
            _ = &mut shutdown => break,
            _ = ticker.tick() => Cause::Timer,
            changed = online.changed() => {
                if changed.is_err() {
                    break;
                }
                if !*online.borrow_and_update() {
                    continue;
                }
                Cause::Reconnected
            }
            Some(()) = triggers.recv() => Cause::Triggered,
        };
        attempt(&sync, &connectivity, cause).await;
    }
    debug!("sync worker loop exited");
}

async fn attempt<K, R>(sync: &Synchronizer<K, R>, connectivity: &ConnectivitySignal, cause: Cause)
where
    K: KvStore + ?Sized,
    R: RemoteStore + ?Sized,
{
    if !connectivity.is_online() {
        debug!(?cause, "offline; skipping sync pass");
        return;
    }
    match sync.run_pass().await {
        Ok(PassOutcome::Completed(report)) => {
            debug!(?cause, processed = report.processed, remaining = report.remaining, "pass done");
        }
        Ok(PassOutcome::AlreadyRunning) => debug!(?cause, "pass already running"),
        // Already logged by the synchronizer; the queue is intact for next time.
        Err(_) => {}
    }
}
