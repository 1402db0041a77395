//! Upload queue and transfer pipeline for clip uploads to cloud storage.
//!
//! This crate implements the **client-side business logic** for uploading
//! recorded clips to object storage through broker-issued signed URLs. It is
//! a library crate with no UI or HTTP dependencies — the app provides
//! implementations of the collaborator traits in [`cloud`] (broker, transport,
//! compressor, finalizer, quota oracle, session).
//!
//! # Pipeline
//!
//! 1. **Compress** — re-encode the clip for upload (failure falls back to the original file)
//! 2. **Negotiate** — obtain a time-limited signed URL and a server record from the broker
//! 3. **Transfer** — PUT the bytes to the signed URL with byte-level progress
//! 4. **Finalize** — reconcile server bookkeeping with the real outcome
//! 5. **Cleanup** — delete the compressed temp file on every terminal path
//!
//! Each enqueued item runs as an independent tokio task; progress for an item
//! is a single 0–100 percentage that is non-decreasing for its whole life.

pub mod cloud;
pub mod error;
mod pipeline;
pub mod queue;
pub mod types;

// Re-export primary types for convenience.
pub use cloud::{
    BrokerRejection, CloudError, Collaborators, Compressor, Finalizer, NegotiatedUpload,
    ProgressFn, QuotaOracle, SessionProvider, SignedUrlBroker, StorageUsage, Transport,
    TransportFailure, UploadOutcome,
};
pub use error::UploadError;
pub use queue::UploadQueue;
pub use types::{QueueConfig, QueueEvent, TransferItem, TransferStatus};
