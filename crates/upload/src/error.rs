//! Upload error taxonomy.

/// Errors produced by the upload queue and pipeline.
///
/// Only `AuthRequired` is ever returned synchronously (from `enqueue`);
/// every other variant surfaces as item state. Nothing is retried
/// automatically — retry is a fresh enqueue.
#[derive(Debug, thiserror::Error)]
pub enum UploadError {
    #[error("not signed in")]
    AuthRequired,

    #[error("storage quota exceeded")]
    QuotaExceeded,

    #[error("failed to get upload URL: {0}")]
    NegotiationFailed(String),

    #[error("upload failed: {0}")]
    TransferFailed(String),

    #[error("cancelled by user")]
    Cancelled,

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}
