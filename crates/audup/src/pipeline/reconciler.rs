//! Reconciliation: periodic re-enqueue of jobs left in a retryable
//! failure state (upload failed, queue full).

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};

use crate::db::path_repo::WatchedPath;
use crate::db::{job_repo, Database};
use crate::pipeline::poller::sleep_interruptible;
use crate::pipeline::{submit_jobs, TaskSubmitter};
use crate::status::JobStatus;

/// Default seconds between reconciliation sweeps.
pub const DEFAULT_SWEEP_INTERVAL: Duration = Duration::from_secs(300);

pub struct Reconciler {
    db: Database,
    submitter: TaskSubmitter,
    path: WatchedPath,
    interval: Duration,
}

impl Reconciler {
    pub fn new(
        db: Database,
        submitter: TaskSubmitter,
        path: WatchedPath,
        interval: Duration,
    ) -> Self {
        Self {
            db,
            submitter,
            path,
            interval,
        }
    }

    /// One sweep: requeues every retryable-failure job under the path.
    /// There is no retry cap; a job keeps coming back until it succeeds
    /// or hits a terminal rejection. Returns the number of jobs swept.
    pub fn sweep(&self) -> usize {
        let jobs = match job_repo::list_by_path_status(
            &self.db,
            self.path.id,
            JobStatus::UploadFailed.code(),
            job_repo::StatusCmp::Le,
        ) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Reconciliation query failed: {}", e);
                return 0;
            }
        };

        if jobs.is_empty() {
            return 0;
        }

        let stats = submit_jobs(&self.db, &self.submitter, &self.path, &jobs);
        info!(
            "Reconciled {} jobs for path {} ({} requeued, {} queue-full)",
            jobs.len(),
            self.path.id,
            stats.enqueued,
            stats.queue_full
        );
        jobs.len()
    }

    /// Periodic loop until shutdown.
    pub fn run(&self, shutdown: Arc<AtomicBool>) {
        info!(
            "Reconciler for path {} every {:?}",
            self.path.id, self.interval
        );

        while !shutdown.load(Ordering::Relaxed) {
            sleep_interruptible(self.interval, &shutdown);
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            self.sweep();
        }

        debug!("Reconciler for path {} stopped", self.path.id);
    }
}
