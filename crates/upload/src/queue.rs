//! Upload queue: owns the item map and every state transition.
//!
//! The queue is an explicit instance (no global store); clone it freely and
//! hand it to whatever orchestrates uploads. Observers subscribe to a
//! broadcast of [`QueueEvent`]s published on every mutating operation, so
//! they only ever see consistent snapshots.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex};

use tokio::sync::{Semaphore, broadcast};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info};
use uuid::Uuid;

use crate::cloud::{CloudError, Collaborators, StorageUsage};
use crate::error::UploadError;
use crate::pipeline;
use crate::types::{QueueConfig, QueueEvent, TransferItem, TransferStatus};

struct ItemEntry {
    item: TransferItem,
    /// Owns the in-flight operation; dropped on every terminal transition.
    cancel: Option<CancellationToken>,
    /// Set by `cancel()` so the pipeline resolves `cancelled` instead of
    /// `error`, independent of what the transport reports.
    cancel_requested: bool,
}

pub(crate) struct QueueInner {
    items: Mutex<HashMap<Uuid, ItemEntry>>,
    events: broadcast::Sender<QueueEvent>,
    pub(crate) semaphore: Arc<Semaphore>,
    pub(crate) config: QueueConfig,
    pub(crate) collab: Collaborators,
}

/// Sequences, tracks and cancels concurrently-running transfer items.
#[derive(Clone)]
pub struct UploadQueue {
    inner: Arc<QueueInner>,
}

impl UploadQueue {
    /// Creates a queue with the given collaborators and tunables.
    pub fn new(collab: Collaborators, config: QueueConfig) -> Self {
        let (events, _) = broadcast::channel(config.event_capacity);
        Self {
            inner: Arc::new(QueueInner {
                items: Mutex::new(HashMap::new()),
                events,
                semaphore: Arc::new(Semaphore::new(config.max_concurrent)),
                config,
                collab,
            }),
        }
    }

    /// Subscribes to item-change events.
    pub fn subscribe(&self) -> broadcast::Receiver<QueueEvent> {
        self.inner.events.subscribe()
    }

    /// Accepts a transfer request and starts the pipeline asynchronously.
    ///
    /// Returns the new item's id immediately; the caller never blocks on
    /// compression, negotiation or the transfer itself. Rejects with
    /// [`UploadError::AuthRequired`] when there is no session or credential.
    pub fn enqueue(
        &self,
        source_path: impl Into<PathBuf>,
        metadata: Option<serde_json::Value>,
    ) -> Result<Uuid, UploadError> {
        if !self.inner.collab.session.is_authenticated()
            || self.inner.collab.session.bearer_token().is_none()
        {
            return Err(UploadError::AuthRequired);
        }

        let source = source_path.into();
        let id = Uuid::new_v4();
        let item = TransferItem {
            id,
            working_path: source.clone(),
            source_path: source,
            status: TransferStatus::Pending,
            progress: 0,
            remote_id: None,
            error: None,
        };
        self.inner.items.lock().unwrap().insert(
            id,
            ItemEntry {
                item: item.clone(),
                cancel: Some(CancellationToken::new()),
                cancel_requested: false,
            },
        );
        debug!(item = %id, path = %item.source_path.display(), "upload enqueued");
        self.inner.emit(QueueEvent::Updated(item));

        tokio::spawn(pipeline::run(Arc::clone(&self.inner), id, metadata));
        Ok(id)
    }

    /// Aborts an in-flight item and marks it `cancelled`.
    ///
    /// No-op when the item is already terminal or unknown.
    pub fn cancel(&self, id: Uuid) {
        let update = {
            let mut items = self.inner.items.lock().unwrap();
            match items.get_mut(&id) {
                Some(entry) if !entry.item.status.is_terminal() => {
                    entry.cancel_requested = true;
                    if let Some(token) = entry.cancel.take() {
                        token.cancel();
                    }
                    entry.item.status = TransferStatus::Cancelled;
                    entry.item.error = Some("cancelled by user".into());
                    Some(entry.item.clone())
                }
                _ => None,
            }
        };
        if let Some(item) = update {
            info!(item = %id, "upload cancelled by user");
            self.inner.emit(QueueEvent::Updated(item));
        }
    }

    /// Removes an item, cancelling it first when still in flight.
    pub fn remove(&self, id: Uuid) {
        self.cancel(id);
        let removed = self.inner.items.lock().unwrap().remove(&id).is_some();
        if removed {
            self.inner.emit(QueueEvent::Removed(id));
        }
    }

    /// Removes every terminal item (completed, error and cancelled).
    /// Never touches pending or uploading items.
    pub fn clear_completed(&self) {
        self.clear_matching(|status| status.is_terminal());
    }

    /// Removes items in the `error` state only.
    pub fn clear_errors(&self) {
        self.clear_matching(|status| status == TransferStatus::Error);
    }

    fn clear_matching(&self, matches: impl Fn(TransferStatus) -> bool) {
        let removed: Vec<Uuid> = {
            let mut items = self.inner.items.lock().unwrap();
            let ids: Vec<Uuid> = items
                .iter()
                .filter(|(_, entry)| matches(entry.item.status))
                .map(|(id, _)| *id)
                .collect();
            for id in &ids {
                items.remove(id);
            }
            ids
        };
        for id in removed {
            self.inner.emit(QueueEvent::Removed(id));
        }
    }

    /// Returns a snapshot of one item.
    pub fn get(&self, id: Uuid) -> Option<TransferItem> {
        self.inner.snapshot(id)
    }

    /// Returns snapshots of all items, in no particular order.
    pub fn items(&self) -> Vec<TransferItem> {
        let items = self.inner.items.lock().unwrap();
        items.values().map(|entry| entry.item.clone()).collect()
    }

    /// Current account storage usage, from the quota oracle.
    pub async fn usage(&self) -> Result<StorageUsage, CloudError> {
        self.inner.collab.quota.usage().await
    }
}

impl QueueInner {
    pub(crate) fn emit(&self, event: QueueEvent) {
        // Nobody listening is fine.
        let _ = self.events.send(event);
    }

    pub(crate) fn snapshot(&self, id: Uuid) -> Option<TransferItem> {
        let items = self.items.lock().unwrap();
        items.get(&id).map(|entry| entry.item.clone())
    }

    pub(crate) fn token_for(&self, id: Uuid) -> Option<CancellationToken> {
        let items = self.items.lock().unwrap();
        items.get(&id).and_then(|entry| entry.cancel.clone())
    }

    pub(crate) fn cancel_requested(&self, id: Uuid) -> bool {
        let items = self.items.lock().unwrap();
        items.get(&id).is_some_and(|entry| entry.cancel_requested)
    }

    pub(crate) fn set_uploading(&self, id: Uuid) {
        let update = {
            let mut items = self.items.lock().unwrap();
            match items.get_mut(&id) {
                Some(entry) if entry.item.status == TransferStatus::Pending => {
                    entry.item.status = TransferStatus::Uploading;
                    Some(entry.item.clone())
                }
                _ => None,
            }
        };
        if let Some(item) = update {
            self.emit(QueueEvent::Updated(item));
        }
    }

    /// Monotonic progress update; ignored once the item left `uploading`.
    pub(crate) fn set_progress(&self, id: Uuid, pct: u8) {
        let update = {
            let mut items = self.items.lock().unwrap();
            match items.get_mut(&id) {
                Some(entry)
                    if entry.item.status == TransferStatus::Uploading
                        && pct > entry.item.progress =>
                {
                    entry.item.progress = pct.min(100);
                    Some(entry.item.clone())
                }
                _ => None,
            }
        };
        if let Some(item) = update {
            self.emit(QueueEvent::Updated(item));
        }
    }

    pub(crate) fn set_working_path(&self, id: Uuid, path: &Path) {
        let update = {
            let mut items = self.items.lock().unwrap();
            match items.get_mut(&id) {
                Some(entry) if !entry.item.status.is_terminal() => {
                    entry.item.working_path = path.to_path_buf();
                    Some(entry.item.clone())
                }
                _ => None,
            }
        };
        if let Some(item) = update {
            self.emit(QueueEvent::Updated(item));
        }
    }

    /// Records the broker record id. Set at most once, never cleared.
    pub(crate) fn set_remote_id(&self, id: Uuid, remote_id: &str) {
        let update = {
            let mut items = self.items.lock().unwrap();
            match items.get_mut(&id) {
                Some(entry) if entry.item.remote_id.is_none() => {
                    entry.item.remote_id = Some(remote_id.to_string());
                    Some(entry.item.clone())
                }
                _ => None,
            }
        };
        if let Some(item) = update {
            self.emit(QueueEvent::Updated(item));
        }
    }

    /// Drives the item to a terminal state, releasing its cancellation
    /// handle. Returns `false` when the item was already terminal (e.g.
    /// cancelled by the user while the pipeline was unwinding) or removed.
    pub(crate) fn resolve_terminal(
        &self,
        id: Uuid,
        status: TransferStatus,
        error: Option<String>,
    ) -> bool {
        debug_assert!(status.is_terminal());
        let update = {
            let mut items = self.items.lock().unwrap();
            match items.get_mut(&id) {
                Some(entry) if !entry.item.status.is_terminal() => {
                    entry.item.status = status;
                    entry.item.error = error;
                    if status == TransferStatus::Completed {
                        entry.item.progress = 100;
                    }
                    entry.cancel = None;
                    Some(entry.item.clone())
                }
                _ => None,
            }
        };
        match update {
            Some(item) => {
                self.emit(QueueEvent::Updated(item));
                true
            }
            None => false,
        }
    }
}
