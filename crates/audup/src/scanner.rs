//! Directory scanning and job registration.

use std::path::Path;
use std::sync::Arc;

use tracing::{debug, info, warn};
use walkdir::WalkDir;

use crate::db::{job_repo, Database, DatabaseError};
use crate::error::ValidateError;
use crate::media::{file_attributes, AudioConverter};
use crate::status::JobStatus;
use crate::validate::FileValidator;

/// Files at or above this size are rejected (500 MB).
pub const MAX_FILE_SIZE: u64 = 524_288_000;

/// Audio shorter than this is rejected.
pub const MIN_AUDIO_DURATION_SECS: f64 = 10.0;

/// Pre-flight limits applied before a job is created.
#[derive(Debug, Clone, Copy)]
pub struct ScanLimits {
    pub max_file_size: u64,
    pub min_duration_secs: f64,
}

impl Default for ScanLimits {
    fn default() -> Self {
        Self {
            max_file_size: MAX_FILE_SIZE,
            min_duration_secs: MIN_AUDIO_DURATION_SECS,
        }
    }
}

/// Counters from one scan pass.
#[derive(Debug, Default, Clone, Copy, serde::Serialize)]
pub struct ScanSummary {
    /// Files seen under the directory.
    pub discovered: usize,
    /// New jobs created at Pending.
    pub registered: usize,
    /// New jobs created at a terminal rejection.
    pub rejected: usize,
    /// Files whose path already had a job.
    pub duplicates: usize,
    /// Files skipped by validation (not audio / transcode failed).
    pub skipped: usize,
}

/// What registering a single file produced.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RegisterOutcome {
    /// A job row was created (possibly at a rejection status).
    Registered { job_id: i64, status: JobStatus },
    /// The path already has a job; nothing was written.
    Duplicate,
}

pub struct DirectoryScanner {
    db: Database,
    validator: FileValidator,
    converter: Arc<dyn AudioConverter>,
    limits: ScanLimits,
}

impl DirectoryScanner {
    pub fn new(db: Database, converter: Arc<dyn AudioConverter>) -> Self {
        Self::with_limits(db, converter, ScanLimits::default())
    }

    pub fn with_limits(
        db: Database,
        converter: Arc<dyn AudioConverter>,
        limits: ScanLimits,
    ) -> Self {
        Self {
            db,
            validator: FileValidator::new(Arc::clone(&converter)),
            converter,
            limits,
        }
    }

    pub fn validator(&self) -> &FileValidator {
        &self.validator
    }

    /// Recursively enumerates `directory`, validates each file and
    /// registers a job for every accepted one. Synchronous and
    /// exhaustive; never enqueues upload tasks itself.
    pub fn scan(
        &self,
        directory: &str,
        language: Option<&str>,
        path_id: i64,
    ) -> Result<ScanSummary, DatabaseError> {
        let mut summary = ScanSummary::default();

        for entry in WalkDir::new(directory)
            .min_depth(1)
            .into_iter()
            .filter_map(|e| e.ok())
        {
            let path = entry.path();
            if path.is_dir() {
                continue;
            }
            summary.discovered += 1;

            let wav_path = match self.validator.validate(path) {
                Ok(wav_path) => wav_path,
                Err(ValidateError::NotAudio(_)) => {
                    debug!("Skipping non-audio file: {}", path.display());
                    summary.skipped += 1;
                    continue;
                }
                Err(e @ ValidateError::Transcode { .. }) => {
                    warn!("{}", e);
                    summary.skipped += 1;
                    continue;
                }
            };

            match self.register_file(&wav_path, language, path_id)? {
                RegisterOutcome::Duplicate => summary.duplicates += 1,
                RegisterOutcome::Registered { status, .. } => {
                    if status == JobStatus::Pending {
                        summary.registered += 1;
                    } else {
                        summary.rejected += 1;
                    }
                }
            }
        }

        info!(
            directory,
            discovered = summary.discovered,
            registered = summary.registered,
            rejected = summary.rejected,
            duplicates = summary.duplicates,
            skipped = summary.skipped,
            "Scan complete"
        );
        Ok(summary)
    }

    /// Pre-flight checks and job creation for one validated wav file.
    ///
    /// The duplicate check runs before any probing; size and duration
    /// rejections are persisted on the new job. Returns without touching
    /// the ledger when the path is already known.
    pub fn register_file(
        &self,
        wav_path: &Path,
        language: Option<&str>,
        path_id: i64,
    ) -> Result<RegisterOutcome, DatabaseError> {
        let key = wav_path.to_string_lossy();

        if job_repo::find_by_path(&self.db, &key)?.is_some() {
            debug!("Already registered: {}", key);
            return Ok(RegisterOutcome::Duplicate);
        }

        let status = self.preflight_status(wav_path);
        debug!("Registering {} at status {}", key, status);

        let job_id = job_repo::insert(&self.db, &key, language, path_id, status)?;
        Ok(RegisterOutcome::Registered { job_id, status })
    }

    fn preflight_status(&self, wav_path: &Path) -> JobStatus {
        let size = match file_attributes(wav_path) {
            Some(meta) => meta.len(),
            None => return JobStatus::Unreadable,
        };

        let duration = match self.converter.probe_duration(wav_path) {
            Some(duration) => duration,
            None => return JobStatus::Unreadable,
        };

        info!(
            file = %wav_path.display(),
            size,
            duration,
            "Pre-flight"
        );

        let mut status = JobStatus::Pending;
        if size >= self.limits.max_file_size {
            status = JobStatus::TooLarge;
        }
        // Duration rejection takes precedence, as in the flag ordering
        // of the upload table.
        if duration < self.limits.min_duration_secs {
            status = JobStatus::TooShort;
        }
        status
    }
}
