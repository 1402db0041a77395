//! Data types for the upload queue.

use std::path::PathBuf;
use std::time::Duration;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Current state of a transfer item.
///
/// `Pending` and `Uploading` are the only non-terminal states. A terminal
/// item never re-enters the pipeline — retrying means a fresh enqueue with
/// a new id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum TransferStatus {
    Pending,
    Uploading,
    Completed,
    Error,
    Cancelled,
}

impl TransferStatus {
    /// Returns `true` for `Completed`, `Error` and `Cancelled`.
    pub fn is_terminal(&self) -> bool {
        matches!(self, Self::Completed | Self::Error | Self::Cancelled)
    }
}

/// Snapshot of one requested upload.
///
/// Observers only ever see clones of this struct; all mutation happens
/// through [`UploadQueue`](crate::queue::UploadQueue) operations.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TransferItem {
    /// Assigned at enqueue time, stable for the item's lifetime.
    pub id: Uuid,
    /// The original file to send.
    pub source_path: PathBuf,
    /// The path actually transferred. Equals `source_path` unless
    /// compression substituted a temp file.
    pub working_path: PathBuf,
    pub status: TransferStatus,
    /// Aggregate percentage 0–100, non-decreasing while uploading and
    /// frozen once terminal.
    pub progress: u8,
    /// Broker-assigned record identifier, set at most once when URL
    /// negotiation succeeds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub remote_id: Option<String>,
    /// Human-readable classification, present for `error` and `cancelled`.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

/// Change notification published on every mutating queue operation.
#[derive(Debug, Clone)]
pub enum QueueEvent {
    /// An item was inserted or its state changed; carries a full snapshot.
    Updated(TransferItem),
    /// An item was removed from the queue.
    Removed(Uuid),
}

/// Tunables for the upload queue.
#[derive(Debug, Clone)]
pub struct QueueConfig {
    /// Maximum number of concurrently running pipelines. Bounds uplink
    /// saturation; not a correctness requirement.
    pub max_concurrent: usize,
    /// Upper bound on the whole transfer stage. Sized for multi-hundred-MB
    /// files on consumer uplinks.
    pub transfer_timeout: Duration,
    /// Capacity of the event broadcast channel.
    pub event_capacity: usize,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            max_concurrent: 3,
            transfer_timeout: Duration::from_secs(20 * 60),
            event_capacity: 256,
        }
    }
}
