//! ffmpeg-based compressor.
//!
//! Re-encodes a clip into a smaller file before upload by spawning an
//! `ffmpeg` child process. Any failure (missing binary, non-zero exit)
//! surfaces as a `CloudError`; the pipeline falls back to uploading the
//! original file, so errors here are never fatal.

use std::ffi::OsString;
use std::future::Future;
use std::path::{Path, PathBuf};
use std::pin::Pin;
use std::process::Stdio;

use tracing::{debug, warn};

use clipvault_upload::cloud::{CloudError, Compressor};

/// Compresses clips with an external `ffmpeg` binary.
pub struct FfmpegCompressor {
    program: String,
    crf: u8,
}

impl Default for FfmpegCompressor {
    fn default() -> Self {
        Self::new("ffmpeg", 28)
    }
}

impl FfmpegCompressor {
    /// Creates a compressor using the given binary name/path and x264
    /// constant-rate factor (higher = smaller file, lower quality).
    pub fn new(program: impl Into<String>, crf: u8) -> Self {
        Self {
            program: program.into(),
            crf,
        }
    }
}

/// Output path for the compressed copy: `clip.mp4` → `clip.upload.mp4`
/// beside the input.
fn upload_target_path(input: &Path) -> PathBuf {
    let stem = input
        .file_stem()
        .map(|s| s.to_string_lossy().into_owned())
        .unwrap_or_else(|| "clip".into());
    input.with_file_name(format!("{stem}.upload.mp4"))
}

/// Removes the output file on drop unless disarmed. Covers a failed encode
/// and a caller dropping the in-flight future, so no partial output is left
/// behind either way.
struct OutputGuard {
    path: PathBuf,
    armed: bool,
}

impl Drop for OutputGuard {
    fn drop(&mut self) {
        if !self.armed {
            return;
        }
        if let Err(e) = std::fs::remove_file(&self.path)
            && e.kind() != std::io::ErrorKind::NotFound
        {
            warn!(path = %self.path.display(), error = %e, "failed to remove partial output");
        }
    }
}

/// ffmpeg arguments: re-encode video, copy audio, overwrite the target.
fn build_args(input: &Path, output: &Path, crf: u8) -> Vec<OsString> {
    let crf = crf.to_string();
    let mut args: Vec<OsString> = vec!["-i".into(), input.into()];
    for arg in [
        "-c:v",
        "libx264",
        "-crf",
        crf.as_str(),
        "-preset",
        "fast",
        "-c:a",
        "copy",
        "-y",
    ] {
        args.push(arg.into());
    }
    args.push(output.into());
    args
}

impl Compressor for FfmpegCompressor {
    fn compress(
        &self,
        input: &Path,
    ) -> Pin<Box<dyn Future<Output = Result<PathBuf, CloudError>> + Send + '_>> {
        let program = self.program.clone();
        let input = input.to_path_buf();
        let crf = self.crf;

        Box::pin(async move {
            let output = upload_target_path(&input);
            let args = build_args(&input, &output, crf);
            let mut guard = OutputGuard {
                path: output.clone(),
                armed: true,
            };

            debug!(input = %input.display(), output = %output.display(), "compressing clip");

            // kill_on_drop: a cancelled compression stage must not leave a
            // detached encoder finishing the file behind our back.
            let status = tokio::process::Command::new(&program)
                .args(&args)
                .stdout(Stdio::null())
                .stderr(Stdio::null())
                .kill_on_drop(true)
                .status()
                .await
                .map_err(|e| CloudError(format!("failed to spawn {program}: {e}")))?;

            if !status.success() {
                return Err(CloudError(format!("ffmpeg exited with {status}")));
            }
            guard.armed = false;
            Ok(output)
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn target_path_keeps_directory_and_stem() {
        let out = upload_target_path(Path::new("/clips/game 3.mp4"));
        assert_eq!(out, PathBuf::from("/clips/game 3.upload.mp4"));
    }

    #[test]
    fn args_reencode_video_and_copy_audio() {
        let args = build_args(Path::new("in.mp4"), Path::new("out.mp4"), 28);
        let args: Vec<String> = args
            .iter()
            .map(|a| a.to_string_lossy().into_owned())
            .collect();
        assert_eq!(args[0], "-i");
        assert_eq!(args[1], "in.mp4");
        assert!(args.windows(2).any(|w| w[0] == "-crf" && w[1] == "28"));
        assert!(args.contains(&"libx264".to_string()));
        assert!(args.contains(&"-y".to_string()));
        assert_eq!(args.last().unwrap(), "out.mp4");
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn dropped_mid_run_kills_encoder_and_removes_output() {
        use std::os::unix::fs::PermissionsExt;
        use std::time::Duration;

        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"not a real video").unwrap();

        // Stand-in encoder: sleeps, then writes its last argument.
        let encoder = dir.path().join("slow-encoder.sh");
        std::fs::write(
            &encoder,
            "#!/bin/sh\nsleep 1\nfor last; do :; done\n: > \"$last\"\n",
        )
        .unwrap();
        std::fs::set_permissions(&encoder, std::fs::Permissions::from_mode(0o755)).unwrap();

        let compressor = FfmpegCompressor::new(encoder.to_string_lossy(), 28);
        let result = tokio::time::timeout(
            Duration::from_millis(100),
            compressor.compress(&input),
        )
        .await;
        assert!(result.is_err());

        // The encoder was killed before it could write, and any partial
        // output was removed; nothing is orphaned once it would have
        // finished.
        tokio::time::sleep(Duration::from_secs(2)).await;
        assert!(!dir.path().join("clip.upload.mp4").exists());
        assert!(input.exists());
    }

    #[tokio::test]
    async fn missing_binary_is_an_error() {
        let dir = tempfile::tempdir().unwrap();
        let input = dir.path().join("clip.mp4");
        std::fs::write(&input, b"not a real video").unwrap();

        let compressor = FfmpegCompressor::new("clipvault-test-missing-encoder", 28);
        let result = compressor.compress(&input).await;
        assert!(result.is_err());
        // The original is untouched.
        assert!(input.exists());
    }
}
