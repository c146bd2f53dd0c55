//! Pipeline engine: bounded queue, worker pool, and the periodic loops
//! that keep the ledger converging (result polling, reconciliation).

use std::path::{Path, PathBuf};

use crate::db::job_repo::JobRow;
use crate::db::path_repo::WatchedPath;
use crate::db::{job_repo, Database};
use crate::error::{DatabaseErrorExt, WorkerError};
use crate::status::JobStatus;

pub mod batch;
pub mod poller;
pub mod pool;
pub mod reconciler;

pub use batch::{upload_batch, upload_batch_with, BatchOptions, BatchReport};
pub use poller::ResultPoller;
pub use pool::{TaskSubmitter, UploadTask, WorkerPool};
pub use reconciler::Reconciler;

/// Default bound of the upload queue.
pub const DEFAULT_QUEUE_CAPACITY: usize = 10_000;

/// Default worker count: one per core, capped at five.
pub fn default_worker_count() -> usize {
    num_cpus::get().clamp(1, 5)
}

/// Builds the queue task for a job, snapshotting the owning path's
/// language and output directory at enqueue time.
pub fn task_for(job: &JobRow, path: &WatchedPath) -> UploadTask {
    UploadTask {
        job_id: job.id,
        file_path: PathBuf::from(&job.file_path),
        language: job.language.clone().or_else(|| path.language.clone()),
        result_dir: PathBuf::from(&path.result_dir),
    }
}

/// Writes a transcript to `<result_dir>/<source stem>.txt`.
pub fn write_transcript(
    result_dir: &Path,
    source: &Path,
    text: &str,
) -> Result<PathBuf, WorkerError> {
    std::fs::create_dir_all(result_dir).map_err(|e| WorkerError::WriteTranscript {
        path: result_dir.to_path_buf(),
        source: e,
    })?;

    let stem = source
        .file_stem()
        .map(|s| s.to_string_lossy().to_string())
        .unwrap_or_else(|| "transcript".to_string());
    let out = result_dir.join(format!("{}.txt", stem));

    std::fs::write(&out, text).map_err(|e| WorkerError::WriteTranscript {
        path: out.clone(),
        source: e,
    })?;
    Ok(out)
}

/// Counters from one producer pass.
#[derive(Debug, Default, Clone, Copy)]
pub struct EnqueueStats {
    pub enqueued: usize,
    pub queue_full: usize,
}

/// Producer stage: enqueues every job under `path` with status Pending
/// or a retryable failure.
///
/// Jobs coming back from a failure state are marked Pending before the
/// submit so a fast worker can never be overwritten afterwards; a full
/// queue marks the job QueueFull instead of blocking.
pub fn enqueue_uploadable(
    db: &Database,
    submitter: &TaskSubmitter,
    path: &WatchedPath,
) -> Result<EnqueueStats, crate::db::DatabaseError> {
    let jobs = job_repo::list_uploadable(db, path.id)?;
    Ok(submit_jobs(db, submitter, path, &jobs))
}

/// Submits a batch of jobs, recording QueueFull for rejected ones.
/// Shared by the producer and the reconciler sweep.
pub(crate) fn submit_jobs(
    db: &Database,
    submitter: &TaskSubmitter,
    path: &WatchedPath,
    jobs: &[JobRow],
) -> EnqueueStats {
    let mut stats = EnqueueStats::default();

    for job in jobs {
        if job.status != JobStatus::Pending.code() {
            job_repo::set_status(db, job.id, "", JobStatus::Pending).log_storage_error();
        }

        match submitter.try_submit(task_for(job, path)) {
            Ok(()) => stats.enqueued += 1,
            Err(WorkerError::QueueFull) => {
                log::warn!("Upload queue is full, parking job {}", job.id);
                job_repo::set_status(db, job.id, "", JobStatus::QueueFull).log_storage_error();
                stats.queue_full += 1;
            }
            Err(e) => {
                log::error!("Submit for job {} failed: {}", job.id, e);
                break;
            }
        }
    }

    stats
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_write_transcript_names_after_source() {
        let dir = TempDir::new().unwrap();
        let out_dir = dir.path().join("txt");

        let out = write_transcript(&out_dir, Path::new("/calls/hello.wav"), "hi there").unwrap();
        assert_eq!(out, out_dir.join("hello.txt"));
        assert_eq!(std::fs::read_to_string(out).unwrap(), "hi there");
    }

    #[test]
    fn test_task_language_falls_back_to_path() {
        use crate::db::path_repo::{ApiMode, Transport};

        let path = WatchedPath {
            id: 1,
            directory: "/calls/".into(),
            language: Some("bg-BG".into()),
            transport: Transport::Hosted {
                api_key: "k".into(),
                mode: ApiMode::Http,
            },
            result_dir: "./txt/".into(),
            result_interval: 0,
            result_attempts: 0,
        };
        let job = JobRow {
            id: 7,
            file_path: "/calls/a.wav".into(),
            language: None,
            remote_id: String::new(),
            created_ts: 0,
            uploaded_ts: None,
            finished_ts: None,
            status: 0,
            path_id: 1,
            poll_attempts: 0,
        };

        let task = task_for(&job, &path);
        assert_eq!(task.language.as_deref(), Some("bg-BG"));
        assert_eq!(task.result_dir, PathBuf::from("./txt/"));
    }
}
