//! Stage sequencer: drives one transfer item through the pipeline.
//!
//! Each stage owns a fixed slice of the aggregate percentage so the
//! displayed progress stays meaningful regardless of which stage runs:
//! compression 0–30, URL negotiation 30–40, byte transfer 40–95
//! (proportional to bytes acknowledged), finalization 95–100. Compression
//! and negotiation are fixed-cost next to a multi-hundred-MB transfer, so
//! the transfer gets the dominant share.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use tracing::{debug, error, info, warn};
use uuid::Uuid;

use crate::cloud::{BrokerRejection, ProgressFn, TransportFailure, UploadOutcome};
use crate::error::UploadError;
use crate::queue::QueueInner;
use crate::types::TransferStatus;

const PROGRESS_COMPRESS_START: u8 = 2;
const PROGRESS_COMPRESSED: u8 = 30;
const PROGRESS_NEGOTIATED: u8 = 40;
const PROGRESS_TRANSFERRED: u8 = 95;
const PROGRESS_FINALIZING: u8 = 97;

const UPLOAD_CONTENT_TYPE: &str = "video/mp4";

/// Maps a transport fraction in `[0, 1]` onto the 40–95 progress band.
fn transfer_progress(fraction: f64) -> u8 {
    let fraction = fraction.clamp(0.0, 1.0);
    (f64::from(PROGRESS_NEGOTIATED)
        + fraction * f64::from(PROGRESS_TRANSFERRED - PROGRESS_NEGOTIATED))
    .round() as u8
}

/// Paths and ids the pipeline accumulates; kept outside the item map so
/// cleanup and finalization still run after `remove()`.
#[derive(Default)]
struct StageState {
    working: Option<PathBuf>,
    remote_id: Option<String>,
}

/// Runs the whole pipeline for one item. Spawned by `enqueue`.
pub(crate) async fn run(inner: Arc<QueueInner>, id: Uuid, metadata: Option<serde_json::Value>) {
    // Bound concurrent pipelines; the item stays pending while waiting.
    let _permit = match Arc::clone(&inner.semaphore).acquire_owned().await {
        Ok(permit) => permit,
        Err(_) => return,
    };

    let Some(start) = inner.snapshot(id) else {
        // Removed before it ever ran.
        return;
    };
    if start.status.is_terminal() {
        // Cancelled while pending; nothing was created yet.
        return;
    }

    let source = start.source_path;
    let mut state = StageState::default();
    let result = drive(&inner, id, &source, metadata.as_ref(), &mut state).await;
    resolve(&inner, id, &source, &state, result).await;
}

/// Stages 1–3. Returns `Err` at the first fatal stage; the accumulated
/// `state` lets `resolve` finalize and clean up from wherever it stopped.
async fn drive(
    inner: &Arc<QueueInner>,
    id: Uuid,
    source: &Path,
    metadata: Option<&serde_json::Value>,
    state: &mut StageState,
) -> Result<(), UploadError> {
    let token = inner.token_for(id).ok_or(UploadError::Cancelled)?;
    if token.is_cancelled() {
        return Err(UploadError::Cancelled);
    }

    inner.set_uploading(id);
    inner.set_progress(id, PROGRESS_COMPRESS_START);

    // Stage 1: compress (0–30). Failure falls back to the original file.
    let working = match &inner.collab.compressor {
        Some(compressor) => {
            let compressed = tokio::select! {
                result = compressor.compress(source) => result,
                _ = token.cancelled() => return Err(UploadError::Cancelled),
            };
            match compressed {
                Ok(path) => path,
                Err(e) => {
                    warn!(item = %id, error = %e, "compression failed, uploading original");
                    source.to_path_buf()
                }
            }
        }
        None => source.to_path_buf(),
    };
    state.working = Some(working.clone());
    inner.set_working_path(id, &working);
    inner.set_progress(id, PROGRESS_COMPRESSED);

    // Stage 2: negotiate the signed URL (30–40). Failure is fatal — no
    // transfer is attempted.
    if token.is_cancelled() {
        return Err(UploadError::Cancelled);
    }
    let file_name = source
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .ok_or_else(|| UploadError::NegotiationFailed("source path has no file name".into()))?;
    let file_size = tokio::fs::metadata(&working).await?.len();

    let negotiated = tokio::select! {
        result = inner.collab.broker.negotiate_upload(&file_name, file_size, metadata) => result,
        _ = token.cancelled() => return Err(UploadError::Cancelled),
    };
    let negotiated = match negotiated {
        Ok(negotiated) => negotiated,
        Err(BrokerRejection::QuotaExceeded) => return Err(UploadError::QuotaExceeded),
        Err(BrokerRejection::Unauthenticated) => return Err(UploadError::AuthRequired),
        Err(BrokerRejection::Server(message)) => {
            return Err(UploadError::NegotiationFailed(message));
        }
    };
    state.remote_id = Some(negotiated.remote_id.clone());
    inner.set_remote_id(id, &negotiated.remote_id);
    inner.set_progress(id, PROGRESS_NEGOTIATED);
    debug!(item = %id, file = %file_name, bytes = file_size, "upload negotiated");

    // Stage 3: transfer (40–95), linear in bytes acknowledged.
    let progress_inner = Arc::clone(inner);
    let on_progress: ProgressFn = Arc::new(move |fraction: f64| {
        progress_inner.set_progress(id, transfer_progress(fraction));
    });
    let put = inner.collab.transport.put(
        &negotiated.upload_url,
        &working,
        UPLOAD_CONTENT_TYPE,
        on_progress,
        token.clone(),
    );
    let sent = match tokio::time::timeout(inner.config.transfer_timeout, put).await {
        Ok(result) => result,
        Err(_) => Err(TransportFailure::Timeout),
    };
    match sent {
        Ok(()) => {}
        Err(TransportFailure::Aborted) => return Err(UploadError::Cancelled),
        Err(failure) => {
            // A user abort and a remote abort look the same at the
            // transport; the recorded cancel request disambiguates.
            if inner.cancel_requested(id) {
                return Err(UploadError::Cancelled);
            }
            return Err(UploadError::TransferFailed(failure.to_string()));
        }
    }
    if inner.cancel_requested(id) {
        // Cancel landed after the PUT was acknowledged; caller intent wins.
        return Err(UploadError::Cancelled);
    }
    inner.set_progress(id, PROGRESS_TRANSFERRED);
    Ok(())
}

/// Stages 4–5: terminal transition, finalization, temp-file cleanup.
async fn resolve(
    inner: &Arc<QueueInner>,
    id: Uuid,
    source: &Path,
    state: &StageState,
    result: Result<(), UploadError>,
) {
    let result = match result {
        Ok(()) if inner.cancel_requested(id) => Err(UploadError::Cancelled),
        other => other,
    };

    match &result {
        Ok(()) => {
            // Stage 4: finalize (95–100). A failure here never flips a
            // completed transfer back to error — the bytes are stored, and
            // bookkeeping catches up on the next refresh.
            inner.set_progress(id, PROGRESS_FINALIZING);
            if let Some(remote_id) = &state.remote_id
                && let Err(e) = inner
                    .collab
                    .finalizer
                    .mark_terminal(remote_id, UploadOutcome::Uploaded)
                    .await
            {
                warn!(item = %id, error = %e, "finalize after upload failed");
            }
            if let Err(e) = inner.collab.quota.refresh().await {
                debug!(item = %id, error = %e, "quota refresh failed");
            }
            inner.resolve_terminal(id, TransferStatus::Completed, None);
            info!(item = %id, "upload completed");
        }
        Err(UploadError::Cancelled) => {
            inner.resolve_terminal(
                id,
                TransferStatus::Cancelled,
                Some("cancelled by user".into()),
            );
            if let Some(remote_id) = &state.remote_id
                && let Err(e) = inner
                    .collab
                    .finalizer
                    .mark_terminal(remote_id, UploadOutcome::Failed)
                    .await
            {
                warn!(item = %id, error = %e, "finalize after cancel failed");
            }
            info!(item = %id, "upload cancelled");
        }
        Err(e) => {
            inner.resolve_terminal(id, TransferStatus::Error, Some(e.to_string()));
            if let Some(remote_id) = &state.remote_id
                && let Err(fe) = inner
                    .collab
                    .finalizer
                    .mark_terminal(remote_id, UploadOutcome::Failed)
                    .await
            {
                warn!(item = %id, error = %fe, "finalize after failure failed");
            }
            error!(item = %id, error = %e, "upload failed");
        }
    }

    // Stage 5: cleanup. Runs on every terminal path so a substituted temp
    // file is never orphaned.
    if let Some(working) = &state.working
        && working != source
        && let Err(e) = tokio::fs::remove_file(working).await
    {
        warn!(item = %id, path = %working.display(), error = %e, "failed to delete temp file");
    }
}
