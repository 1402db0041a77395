//! Streaming PUT transport for signed upload URLs.
//!
//! Streams the file from disk through a byte-counting adapter so progress
//! callbacks fire as the body is sent, without buffering the whole clip in
//! memory. Cancellation aborts the request at the next suspension point.

use std::future::Future;
use std::path::Path;
use std::pin::Pin;
use std::sync::Arc;
use std::sync::atomic::{AtomicU64, Ordering};
use std::time::Duration;

use futures_util::TryStreamExt;
use reqwest::header::{CONTENT_LENGTH, CONTENT_TYPE};
use tokio_util::io::ReaderStream;
use tokio_util::sync::CancellationToken;
use tracing::debug;

use clipvault_upload::cloud::{ProgressFn, Transport, TransportFailure};

/// Default per-transfer timeout, sized for multi-hundred-MB files on
/// consumer uplinks.
const DEFAULT_TIMEOUT: Duration = Duration::from_secs(20 * 60);

/// HTTP transport performing the signed-URL PUT.
pub struct HttpTransport {
    http: reqwest::Client,
    timeout: Duration,
}

impl Default for HttpTransport {
    fn default() -> Self {
        Self::new(None)
    }
}

impl HttpTransport {
    /// Creates a transport with the given timeout (default 20 minutes).
    pub fn new(timeout: Option<Duration>) -> Self {
        Self {
            http: reqwest::Client::new(),
            timeout: timeout.unwrap_or(DEFAULT_TIMEOUT),
        }
    }
}

impl Transport for HttpTransport {
    fn put(
        &self,
        url: &str,
        path: &Path,
        content_type: &str,
        on_progress: ProgressFn,
        cancel: CancellationToken,
    ) -> Pin<Box<dyn Future<Output = Result<(), TransportFailure>> + Send + '_>> {
        let url = url.to_string();
        let path = path.to_path_buf();
        let content_type = content_type.to_string();
        let http = self.http.clone();
        let timeout = self.timeout;

        Box::pin(async move {
            let file = tokio::fs::File::open(&path)
                .await
                .map_err(|e| TransportFailure::Network(format!("open {}: {e}", path.display())))?;
            let total = file
                .metadata()
                .await
                .map_err(|e| TransportFailure::Network(e.to_string()))?
                .len();

            let sent = Arc::new(AtomicU64::new(0));
            let counter = Arc::clone(&sent);
            let progress = Arc::clone(&on_progress);
            let denominator = total.max(1) as f64;
            let counted = ReaderStream::new(file).inspect_ok(move |chunk| {
                let done = counter.fetch_add(chunk.len() as u64, Ordering::Relaxed)
                    + chunk.len() as u64;
                progress(done as f64 / denominator);
            });

            debug!(path = %path.display(), bytes = total, "starting PUT");

            let request = http
                .put(&url)
                .header(CONTENT_TYPE, content_type)
                .header(CONTENT_LENGTH, total)
                .body(reqwest::Body::wrap_stream(counted))
                .send();

            let response = tokio::select! {
                _ = cancel.cancelled() => return Err(TransportFailure::Aborted),
                result = tokio::time::timeout(timeout, request) => match result {
                    Err(_) => return Err(TransportFailure::Timeout),
                    Ok(Err(e)) if e.is_timeout() => return Err(TransportFailure::Timeout),
                    Ok(Err(e)) => return Err(TransportFailure::Network(e.to_string())),
                    Ok(Ok(response)) => response,
                },
            };

            let status = response.status();
            if !status.is_success() {
                return Err(TransportFailure::ServerStatus(status.as_u16()));
            }
            on_progress(1.0);
            Ok(())
        })
    }
}
