//! Candidate-file validation.
//!
//! Decides the canonical wav path the pipeline operates on. wav files pass
//! through; mp3/gsm are transcoded to a wav sibling (reused when one
//! already exists). Anything else is skipped.

use std::path::{Path, PathBuf};
use std::sync::Arc;

use log::debug;

use crate::error::ValidateError;
use crate::media::AudioConverter;

pub const WAV_EXTEN: &str = "wav";
pub const MP3_EXTEN: &str = "mp3";
pub const GSM_EXTEN: &str = "gsm";

pub struct FileValidator {
    converter: Arc<dyn AudioConverter>,
}

impl FileValidator {
    pub fn new(converter: Arc<dyn AudioConverter>) -> Self {
        Self { converter }
    }

    /// Returns the wav path to operate on for `path`.
    ///
    /// May write a new `.wav` next to the source when transcoding is
    /// required. Errors are non-fatal to the caller: the file is skipped
    /// and nothing is recorded in the ledger.
    pub fn validate(&self, path: &Path) -> Result<PathBuf, ValidateError> {
        let ext = path
            .extension()
            .and_then(|e| e.to_str())
            .map(|e| e.to_ascii_lowercase())
            .ok_or_else(|| ValidateError::NotAudio(path.to_path_buf()))?;

        // A bare ".wav" with no stem is not a usable audio file.
        let stem_ok = path
            .file_stem()
            .and_then(|s| s.to_str())
            .map(|s| !s.is_empty())
            .unwrap_or(false);
        if !stem_ok {
            return Err(ValidateError::NotAudio(path.to_path_buf()));
        }

        match ext.as_str() {
            WAV_EXTEN => Ok(path.to_path_buf()),
            MP3_EXTEN | GSM_EXTEN => {
                let wav_path = path.with_extension(WAV_EXTEN);
                if wav_path.is_file() {
                    debug!("Reusing existing wav sibling: {}", wav_path.display());
                    return Ok(wav_path);
                }
                self.converter
                    .transcode_to_wav(path, &wav_path)
                    .map_err(|e| ValidateError::Transcode {
                        path: path.to_path_buf(),
                        source: e,
                    })?;
                Ok(wav_path)
            }
            _ => Err(ValidateError::NotAudio(path.to_path_buf())),
        }
    }
}
