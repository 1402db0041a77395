//! Concrete cloud collaborators for the upload pipeline.
//!
//! Implements the `clipvault-upload` collaborator traits over the real
//! services: an async HTTP client for URL negotiation, finalization and
//! quota (`reqwest` with Bearer auth), a streaming PUT transport with
//! byte-level progress, an ffmpeg child-process compressor, and an
//! in-memory auth session holder.

pub mod api;
pub mod compress;
pub mod session;
pub mod transport;

pub use api::{ApiClient, ApiError};
pub use compress::FfmpegCompressor;
pub use session::AuthSession;
pub use transport::HttpTransport;
