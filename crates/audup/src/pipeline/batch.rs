//! One-shot scan-and-upload run for a watched path.

use std::sync::Arc;

use tracing::{info, warn};

use crate::db::path_repo::WatchedPath;
use crate::db::Database;
use crate::error::Result;
use crate::media::AudioConverter;
use crate::pipeline::{
    default_worker_count, enqueue_uploadable, WorkerPool, DEFAULT_QUEUE_CAPACITY,
};
use crate::scanner::{DirectoryScanner, ScanSummary};
use crate::transport::{client_for, RetryPolicy, Uploader};

#[derive(Debug, Clone, Copy)]
pub struct BatchOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub retry: RetryPolicy,
}

impl Default for BatchOptions {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            retry: RetryPolicy::default(),
        }
    }
}

/// Outcome of one batch run over a single path.
#[derive(Debug, Clone, serde::Serialize)]
pub struct BatchReport {
    pub path_id: i64,
    pub directory: String,
    pub scan: ScanSummary,
    pub enqueued: usize,
    pub queue_full: usize,
}

/// Scans `path` and drives every uploadable job through the pipeline,
/// returning once the queue is drained and all workers have stopped.
pub fn upload_batch(
    db: &Database,
    converter: Arc<dyn AudioConverter>,
    path: &WatchedPath,
    opts: &BatchOptions,
) -> Result<BatchReport> {
    let uploader = client_for(&path.transport, opts.retry);
    upload_batch_with(db, converter, uploader, path, opts)
}

/// [`upload_batch`] with an injected upload client.
pub fn upload_batch_with(
    db: &Database,
    converter: Arc<dyn AudioConverter>,
    uploader: Arc<dyn Uploader>,
    path: &WatchedPath,
    opts: &BatchOptions,
) -> Result<BatchReport> {
    info!(path_id = path.id, directory = %path.directory, "Processing path");

    let scanner = DirectoryScanner::new(db.clone(), converter);
    let scan = scanner.scan(&path.directory, path.language.as_deref(), path.id)?;

    let pool = WorkerPool::new(uploader, db.clone(), opts.workers, opts.queue_capacity);
    let stats = enqueue_uploadable(db, &pool.submitter(), path)?;
    if stats.queue_full > 0 {
        warn!(
            "{} jobs could not be queued (queue capacity {})",
            stats.queue_full, opts.queue_capacity
        );
    }

    // Completion barrier: every queued task is processed before we return.
    pool.wait();

    Ok(BatchReport {
        path_id: path.id,
        directory: path.directory.clone(),
        scan,
        enqueued: stats.enqueued,
        queue_full: stats.queue_full,
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::db::{job_repo, path_repo};
    use crate::error::MediaError;
    use crate::status::JobStatus;
    use crate::transport::UploadOutcome;
    use std::path::Path;
    use tempfile::TempDir;

    struct FixedDuration(f64);

    impl AudioConverter for FixedDuration {
        fn probe_duration(&self, _path: &Path) -> Option<f64> {
            Some(self.0)
        }

        fn transcode_to_wav(&self, input: &Path, _output: &Path) -> std::result::Result<(), MediaError> {
            Err(MediaError::ToolFailed {
                tool: "ffmpeg",
                path: input.to_path_buf(),
                detail: "unexpected transcode in test".into(),
            })
        }
    }

    struct EchoUploader;

    impl Uploader for EchoUploader {
        fn upload(
            &self,
            _file: &Path,
            _language: Option<&str>,
        ) -> std::result::Result<UploadOutcome, crate::error::TransportError> {
            Ok(UploadOutcome::Transcript("echo".into()))
        }
    }

    fn watched_path(dir: &Path, result_dir: &Path) -> WatchedPath {
        WatchedPath {
            id: 1,
            directory: format!("{}/", dir.display()),
            language: None,
            transport: path_repo::Transport::Server {
                uri: "ws://127.0.0.1:1".into(),
            },
            result_dir: result_dir.display().to_string(),
            result_interval: 0,
            result_attempts: 0,
        }
    }

    #[test]
    fn test_batch_scans_uploads_and_drains() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::write(dir.path().join("one.wav"), vec![0u8; 256]).unwrap();
        std::fs::write(dir.path().join("two.wav"), vec![0u8; 256]).unwrap();
        std::fs::write(dir.path().join("skip.txt"), b"not audio").unwrap();

        let db = Database::open_in_memory().unwrap();
        let path = watched_path(dir.path(), out.path());

        let report = upload_batch_with(
            &db,
            Arc::new(FixedDuration(30.0)),
            Arc::new(EchoUploader),
            &path,
            &BatchOptions {
                workers: 2,
                queue_capacity: 16,
                retry: RetryPolicy::immediate(1),
            },
        )
        .unwrap();

        assert_eq!(report.scan.registered, 2);
        assert_eq!(report.enqueued, 2);
        assert_eq!(report.queue_full, 0);

        let delivered =
            job_repo::list_by_status(&db, JobStatus::Delivered.code(), job_repo::StatusCmp::Eq)
                .unwrap();
        assert_eq!(delivered.len(), 2);
        assert!(out.path().join("one.txt").is_file());
        assert!(out.path().join("two.txt").is_file());
    }

    #[test]
    fn test_batch_requeues_previous_failures() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::write(dir.path().join("one.wav"), vec![0u8; 256]).unwrap();

        let db = Database::open_in_memory().unwrap();
        let path = watched_path(dir.path(), out.path());

        // A job left in a retryable failure state from an earlier run.
        let failed = job_repo::insert(
            &db,
            &format!("{}ghost.wav", path.directory),
            None,
            path.id,
            JobStatus::Pending,
        )
        .unwrap();
        job_repo::set_status(&db, failed, "", JobStatus::UploadFailed).unwrap();

        let report = upload_batch_with(
            &db,
            Arc::new(FixedDuration(30.0)),
            Arc::new(EchoUploader),
            &path,
            &BatchOptions {
                workers: 1,
                queue_capacity: 16,
                retry: RetryPolicy::immediate(1),
            },
        )
        .unwrap();

        // one.wav freshly scanned + ghost.wav requeued.
        assert_eq!(report.enqueued, 2);
        let row = job_repo::get(&db, failed).unwrap().unwrap();
        assert_eq!(row.job_status(), Some(JobStatus::Delivered));
    }

    #[test]
    fn test_too_short_file_never_uploads() {
        let dir = TempDir::new().unwrap();
        let out = TempDir::new().unwrap();
        std::fs::write(dir.path().join("short.wav"), vec![0u8; 256]).unwrap();

        let db = Database::open_in_memory().unwrap();
        let path = watched_path(dir.path(), out.path());

        let report = upload_batch_with(
            &db,
            Arc::new(FixedDuration(5.0)),
            Arc::new(EchoUploader),
            &path,
            &BatchOptions {
                workers: 1,
                queue_capacity: 16,
                retry: RetryPolicy::immediate(1),
            },
        )
        .unwrap();

        assert_eq!(report.enqueued, 0);
        let rejected =
            job_repo::list_by_status(&db, JobStatus::TooShort.code(), job_repo::StatusCmp::Eq)
                .unwrap();
        assert_eq!(rejected.len(), 1);
        assert!(!out.path().join("short.txt").exists());
    }
}
