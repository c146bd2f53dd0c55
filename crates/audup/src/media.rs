//! Decode/transcode collaborator backed by ffmpeg/ffprobe.
//!
//! The pipeline never parses audio containers itself; duration probing and
//! conversion to wav go through the [`AudioConverter`] trait so tests can
//! substitute a stub.

use std::path::Path;
use std::process::{Command, Stdio};

use log::{debug, info};

use crate::error::MediaError;

/// External decode-and-transcode capability.
pub trait AudioConverter: Send + Sync {
    /// Audio duration in seconds, or `None` when the file is unreadable.
    fn probe_duration(&self, path: &Path) -> Option<f64>;

    /// Decodes `input` and writes a wav file at `output`.
    fn transcode_to_wav(&self, input: &Path, output: &Path) -> Result<(), MediaError>;
}

/// Production converter shelling out to `ffprobe` / `ffmpeg`.
#[derive(Debug, Default, Clone)]
pub struct FfmpegConverter;

impl AudioConverter for FfmpegConverter {
    fn probe_duration(&self, path: &Path) -> Option<f64> {
        match probe_duration_seconds(path) {
            Ok(duration) => Some(duration),
            Err(e) => {
                debug!("Duration probe failed for {}: {}", path.display(), e);
                None
            }
        }
    }

    fn transcode_to_wav(&self, input: &Path, output: &Path) -> Result<(), MediaError> {
        let started = std::time::Instant::now();

        let status = silent_ffmpeg_command()
            .args(["-y", "-i"])
            .arg(input)
            .arg(output)
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .status()
            .map_err(|e| MediaError::Spawn {
                tool: "ffmpeg",
                path: input.to_path_buf(),
                source: e,
            })?;

        if !status.success() {
            return Err(MediaError::ToolFailed {
                tool: "ffmpeg",
                path: input.to_path_buf(),
                detail: format!("exit code {}", status.code().unwrap_or(-1)),
            });
        }

        info!(
            "Converted {} -> {} in {:.2}s",
            input.display(),
            output.display(),
            started.elapsed().as_secs_f64()
        );
        Ok(())
    }
}

/// Uses ffprobe to extract the duration in seconds.
fn probe_duration_seconds(path: &Path) -> Result<f64, MediaError> {
    let output = Command::new("ffprobe")
        .args([
            "-v",
            "error",
            "-show_entries",
            "format=duration",
            "-of",
            "default=noprint_wrappers=1:nokey=1",
        ])
        .arg(path)
        .output()
        .map_err(|e| MediaError::Spawn {
            tool: "ffprobe",
            path: path.to_path_buf(),
            source: e,
        })?;

    if !output.status.success() {
        return Err(MediaError::ToolFailed {
            tool: "ffprobe",
            path: path.to_path_buf(),
            detail: String::from_utf8_lossy(&output.stderr).trim().to_string(),
        });
    }

    let text = String::from_utf8_lossy(&output.stdout);
    text.trim()
        .parse::<f64>()
        .map_err(|e| MediaError::BadProbeOutput {
            path: path.to_path_buf(),
            detail: e.to_string(),
        })
}

fn silent_ffmpeg_command() -> Command {
    let mut cmd = Command::new("ffmpeg");
    cmd.args(["-v", "quiet", "-hide_banner", "-nostats", "-nostdin"]);
    cmd
}

/// Size and mtime of a file, or `None` when it is not a regular file.
pub fn file_attributes(path: &Path) -> Option<std::fs::Metadata> {
    let meta = std::fs::metadata(path).ok()?;
    if meta.is_file() {
        Some(meta)
    } else {
        None
    }
}
