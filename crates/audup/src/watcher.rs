//! Filesystem watch adapter.
//!
//! Feeds newly completed files straight into validation, registration
//! and the upload queue without a full rescan. Uses a debounced
//! PollWatcher so partially written files settle before processing.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info, warn};
use notify::{Config as NotifyConfig, PollWatcher, RecursiveMode};
use notify_debouncer_mini::{new_debouncer_opt, Config as DebouncerConfig, DebouncedEventKind};

use crate::db::path_repo::WatchedPath;
use crate::db::Database;
use crate::error::{DatabaseErrorExt, WorkerError};
use crate::media::{file_attributes, AudioConverter};
use crate::pipeline::{task_for, TaskSubmitter};
use crate::db::job_repo;
use crate::scanner::{DirectoryScanner, RegisterOutcome, ScanLimits};
use crate::status::JobStatus;

/// Files at or below a wav header's size are treated as still being
/// written and skipped.
pub const MIN_EVENT_FILE_SIZE: u64 = 44;

/// What the watcher did with one observed file.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WatchOutcome {
    /// Job created and queued for upload.
    Queued,
    /// Job created but the queue was full; left for reconciliation.
    Parked,
    /// Job created at a terminal rejection status.
    Rejected,
    /// Nothing done (duplicate, incomplete, or invalid file).
    Ignored,
}

pub struct DirectoryWatcher {
    db: Database,
    scanner: DirectoryScanner,
    path: WatchedPath,
    submitter: TaskSubmitter,
}

impl DirectoryWatcher {
    pub fn new(
        db: Database,
        converter: Arc<dyn AudioConverter>,
        path: WatchedPath,
        submitter: TaskSubmitter,
    ) -> Self {
        Self::with_limits(db, converter, path, submitter, ScanLimits::default())
    }

    pub fn with_limits(
        db: Database,
        converter: Arc<dyn AudioConverter>,
        path: WatchedPath,
        submitter: TaskSubmitter,
        limits: ScanLimits,
    ) -> Self {
        let scanner = DirectoryScanner::with_limits(db.clone(), converter, limits);
        Self {
            db,
            scanner,
            path,
            submitter,
        }
    }

    /// Handles one observed file: completeness guard, validation,
    /// pre-flight, registration, direct enqueue.
    pub fn process_event(&self, observed: &Path) -> WatchOutcome {
        if observed.is_dir() {
            return WatchOutcome::Ignored;
        }

        let size = match file_attributes(observed) {
            Some(meta) => meta.len(),
            None => return WatchOutcome::Ignored,
        };
        if size <= MIN_EVENT_FILE_SIZE {
            warn!(
                "Empty or incomplete file observed: {} ({} bytes)",
                observed.display(),
                size
            );
            return WatchOutcome::Ignored;
        }

        let wav_path = match self.scanner.validator().validate(observed) {
            Ok(wav_path) => wav_path,
            Err(e) => {
                debug!("Observed file skipped: {}", e);
                return WatchOutcome::Ignored;
            }
        };

        let outcome = match self
            .scanner
            .register_file(&wav_path, self.path.language.as_deref(), self.path.id)
        {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Registration for {} failed: {}", wav_path.display(), e);
                return WatchOutcome::Ignored;
            }
        };

        match outcome {
            RegisterOutcome::Duplicate => WatchOutcome::Ignored,
            RegisterOutcome::Registered { status, .. } if status != JobStatus::Pending => {
                WatchOutcome::Rejected
            }
            RegisterOutcome::Registered { job_id, .. } => {
                let job = match job_repo::get(&self.db, job_id) {
                    Ok(Some(job)) => job,
                    Ok(None) | Err(_) => {
                        error!("Job {} vanished after registration", job_id);
                        return WatchOutcome::Ignored;
                    }
                };

                match self.submitter.try_submit(task_for(&job, &self.path)) {
                    Ok(()) => {
                        info!("Queued new file for upload: {}", wav_path.display());
                        WatchOutcome::Queued
                    }
                    Err(WorkerError::QueueFull) => {
                        warn!("Upload queue is full, parking job {}", job_id);
                        job_repo::set_status(&self.db, job_id, "", JobStatus::QueueFull)
                            .log_storage_error();
                        WatchOutcome::Parked
                    }
                    Err(e) => {
                        error!("Submit for job {} failed: {}", job_id, e);
                        WatchOutcome::Ignored
                    }
                }
            }
        }
    }

    /// Blocking watch loop over the path's directory (recursive,
    /// including future subdirectories) until shutdown.
    pub fn watch(&self, shutdown: Arc<AtomicBool>) -> Result<(), WorkerError> {
        let poll_config = NotifyConfig::default().with_poll_interval(Duration::from_secs(2));

        let debouncer_config = DebouncerConfig::default()
            .with_timeout(Duration::from_millis(500))
            .with_notify_config(poll_config);

        let (tx, rx) = std::sync::mpsc::channel();

        let mut debouncer = new_debouncer_opt::<_, PollWatcher>(debouncer_config, tx)
            .map_err(|e| WorkerError::WatchError(e.to_string()))?;

        debouncer
            .watcher()
            .watch(Path::new(&self.path.directory), RecursiveMode::Recursive)
            .map_err(|e| WorkerError::WatchError(e.to_string()))?;

        info!("Watching directory: {}", self.path.directory);

        loop {
            if shutdown.load(Ordering::Relaxed) {
                info!("Watch mode shutting down...");
                break;
            }

            match rx.recv_timeout(Duration::from_millis(100)) {
                Ok(Ok(events)) => {
                    for event in events {
                        if matches!(event.kind, DebouncedEventKind::Any) && event.path.exists() {
                            self.process_event(&event.path);
                        }
                    }
                }
                Ok(Err(errors)) => {
                    warn!("Watch error: {:?}", errors);
                }
                Err(std::sync::mpsc::RecvTimeoutError::Timeout) => {
                    continue;
                }
                Err(std::sync::mpsc::RecvTimeoutError::Disconnected) => {
                    error!("Watch channel disconnected");
                    break;
                }
            }
        }

        Ok(())
    }
}
