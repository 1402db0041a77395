//! Collaborator traits for the external cloud services.
//!
//! The pipeline only talks to the outside world through these traits. The
//! app provides implementations on top of its actual HTTP client (see the
//! `clipvault-cloud` crate); tests use mocks. Methods return boxed futures
//! so the traits stay object-safe — implementations clone borrowed
//! arguments before entering their `async move` block.

use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::sync::Arc;

use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;

/// Opaque error from a collaborator call. The pipeline only logs or
/// re-classifies the message, never inspects it.
#[derive(Debug, Clone, thiserror::Error)]
#[error("{0}")]
pub struct CloudError(pub String);

/// Why the broker refused to issue a signed URL.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum BrokerRejection {
    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("not authenticated")]
    Unauthenticated,

    #[error("server error: {0}")]
    Server(String),
}

/// How the byte transfer ended when it did not succeed.
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum TransportFailure {
    #[error("network error during upload: {0}")]
    Network(String),

    #[error("upload timed out")]
    Timeout,

    #[error("upload failed with status {0}")]
    ServerStatus(u16),

    #[error("upload aborted")]
    Aborted,
}

/// Terminal outcome reported to the broker's bookkeeping.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum UploadOutcome {
    Uploaded,
    Failed,
}

impl UploadOutcome {
    /// Wire representation used by the finalization endpoint.
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Uploaded => "UPLOADED",
            Self::Failed => "FAILED",
        }
    }
}

/// Successful URL negotiation: where to PUT and the server-side record id.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NegotiatedUpload {
    pub upload_url: String,
    pub remote_id: String,
}

/// Account storage usage as mirrored by the quota oracle.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct StorageUsage {
    pub used: i64,
    pub limit: i64,
}

/// Byte-level progress callback: fraction of the transfer done, in `[0, 1]`.
pub type ProgressFn = Arc<dyn Fn(f64) + Send + Sync>;

/// Supplies the auth state checked synchronously at enqueue time.
pub trait SessionProvider: Send + Sync {
    fn is_authenticated(&self) -> bool;

    /// Opaque bearer credential, `None` when signed out.
    fn bearer_token(&self) -> Option<String>;
}

/// Issues time-limited signed upload URLs.
///
/// The broker is the authoritative quota enforcer — a rejection here means
/// no transfer is attempted.
pub trait SignedUrlBroker: Send + Sync {
    fn negotiate_upload(
        &self,
        file_name: &str,
        file_size: u64,
        metadata: Option<&serde_json::Value>,
    ) -> Pin<Box<dyn Future<Output = Result<NegotiatedUpload, BrokerRejection>> + Send + '_>>;
}

/// Performs the actual PUT of bytes to a signed URL.
///
/// Implementations must invoke `on_progress` with non-decreasing fractions
/// and resolve to [`TransportFailure::Aborted`] when `cancel` fires.
pub trait Transport: Send + Sync {
    fn put(
        &self,
        url: &str,
        path: &Path,
        content_type: &str,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportFailure>> + Send + '_>>;
}

/// Re-encodes a clip for upload; returns the path to transfer instead of
/// the input. Failure is never fatal to the caller.
pub trait Compressor: Send + Sync {
    fn compress(
        &self,
        input: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf, CloudError>> + Send + '_>>;
}

/// Reports a transfer's terminal outcome so server bookkeeping matches
/// reality.
pub trait Finalizer: Send + Sync {
    fn mark_terminal(
        &self,
        remote_id: &str,
        outcome: UploadOutcome,
    ) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + '_>>;
}

/// Mirrors the account's storage usage. Informational only — refreshed,
/// never locked.
pub trait QuotaOracle: Send + Sync {
    fn usage(&self) -> Pin<Box<dyn Future<Output = Result<StorageUsage, CloudError>> + Send + '_>>;

    /// Triggers a re-fetch from the authoritative backend.
    fn refresh(&self) -> Pin<Box<dyn Future<Output = Result<(), CloudError>> + Send + '_>>;
}

/// Bundle of collaborators handed to the queue at construction.
#[derive(Clone)]
pub struct Collaborators {
    pub session: Arc<dyn SessionProvider>,
    pub broker: Arc<dyn SignedUrlBroker>,
    pub transport: Arc<dyn Transport>,
    /// `None` disables the compression stage entirely.
    pub compressor: Option<Arc<dyn Compressor>>,
    pub finalizer: Arc<dyn Finalizer>,
    pub quota: Arc<dyn QuotaOracle>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn outcome_wire_strings() {
        assert_eq!(UploadOutcome::Uploaded.as_str(), "UPLOADED");
        assert_eq!(UploadOutcome::Failed.as_str(), "FAILED");
    }

    #[test]
    fn rejection_messages() {
        assert!(BrokerRejection::QuotaExceeded.to_string().contains("quota"));
        assert!(
            BrokerRejection::Server("boom".into())
                .to_string()
                .contains("boom")
        );
    }

    #[test]
    fn usage_json_shape() {
        let usage = StorageUsage {
            used: 1024,
            limit: 2048,
        };
        let json = serde_json::to_string(&usage).unwrap();
        assert_eq!(json, "{\"used\":1024,\"limit\":2048}");
    }
}
