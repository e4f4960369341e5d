//! Connectivity signal and sync status observation.
//!
//! The host platform reports network reachability through a
//! [`ConnectivitySignal`]. The sync worker reacts to offline-to-online
//! transitions. A [`StatusObserver`] folds connectivity, queue length and
//! the last pass into one [`SyncStatus`] that UIs can watch.

use std::sync::Arc;

use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info};

use crate::pass::PassReport;

/// Shared online/offline flag.
///
/// Clones observe and drive the same flag.
#[derive(Debug, Clone)]
pub struct ConnectivitySignal {
    tx: Arc<watch::Sender<bool>>,
}

impl ConnectivitySignal {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(online);
        Self { tx: Arc::new(tx) }
    }

    /// Report the current reachability. Returns true if it changed.
    pub fn set_online(&self, online: bool) -> bool {
        let changed = self.tx.send_if_modified(|current| {
            if *current == online {
                false
            } else {
                *current = online;
                true
            }
        });
        if changed {
            info!(online, "connectivity changed");
        }
        changed
    }

    pub fn is_online(&self) -> bool {
        *self.tx.borrow()
    }

    /// A receiver notified on every change.
    pub fn subscribe(&self) -> watch::Receiver<bool> {
        self.tx.subscribe()
    }
}

impl Default for ConnectivitySignal {
    fn default() -> Self {
        Self::new(true)
    }
}

/// Snapshot of the sync engine's state.
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct SyncStatus {
    pub online: bool,
    /// Pending operations as of the last enqueue or pass.
    pub queue_len: usize,
    /// Report of the most recent completed pass.
    pub last_pass: Option<PassReport>,
}

/// Publishes [`SyncStatus`] changes.
#[derive(Debug, Clone)]
pub struct StatusObserver {
    tx: Arc<watch::Sender<SyncStatus>>,
}

impl StatusObserver {
    pub fn new(online: bool) -> Self {
        let (tx, _rx) = watch::channel(SyncStatus {
            online,
            ..SyncStatus::default()
        });
        Self { tx: Arc::new(tx) }
    }

    pub fn status(&self) -> SyncStatus {
        self.tx.borrow().clone()
    }

    pub fn subscribe(&self) -> watch::Receiver<SyncStatus> {
        self.tx.subscribe()
    }

    pub fn set_online(&self, online: bool) {
        self.tx.send_if_modified(|status| replace(&mut status.online, online));
    }

    pub fn set_queue_len(&self, len: usize) {
        self.tx.send_if_modified(|status| replace(&mut status.queue_len, len));
    }

    pub fn record_pass(&self, report: PassReport) {
        self.tx.send_modify(|status| {
            status.queue_len = report.remaining;
            status.last_pass = Some(report);
        });
    }

    /// Mirror `signal` into this observer until the subscription is dropped.
    ///
    /// Must be called from within a Tokio runtime.
    pub fn follow(&self, signal: &ConnectivitySignal) -> StatusSubscription {
        self.set_online(signal.is_online());
        let mut rx = signal.subscribe();
        let observer = self.clone();
        let task = tokio::spawn(async move {
            while rx.changed().await.is_ok() {
                let online = *rx.borrow_and_update();
                observer.set_online(online);
            }
            debug!("connectivity signal closed");
        });
        StatusSubscription { task }
    }
}

fn replace<T: PartialEq>(slot: &mut T, value: T) -> bool {
    if *slot == value {
        return false;
    }
    *slot = value;
    true
}

/// Keeps a [`StatusObserver`] following a [`ConnectivitySignal`].
///
/// Dropping it stops the listener.
#[derive(Debug)]
pub struct StatusSubscription {
    task: JoinHandle<()>,
}

impl StatusSubscription {
    pub fn is_active(&self) -> bool {
        !self.task.is_finished()
    }
}

impl Drop for StatusSubscription {
    fn drop(&mut self) {
        self.task.abort();
    }
}
