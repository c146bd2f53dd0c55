//! Result polling for jobs uploaded over the two-phase HTTP transport.

use std::path::Path;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;

use log::{debug, error, info};

use crate::db::path_repo::WatchedPath;
use crate::db::{job_repo, Database};
use crate::error::DatabaseErrorExt;
use crate::pipeline::write_transcript;
use crate::status::JobStatus;
use crate::transport::ResultFetcher;

pub struct ResultPoller {
    db: Database,
    fetcher: Arc<dyn ResultFetcher>,
    path: WatchedPath,
}

impl ResultPoller {
    pub fn new(db: Database, fetcher: Arc<dyn ResultFetcher>, path: WatchedPath) -> Self {
        Self { db, fetcher, path }
    }

    /// One polling pass over the path's jobs awaiting a result.
    ///
    /// A successful fetch writes the transcript and finishes the job.
    /// A failed fetch increments the attempt counter exactly once; when
    /// the counter reaches the path's budget the job becomes terminal.
    /// Returns the number of jobs examined.
    pub fn poll_once(&self) -> usize {
        let jobs = match job_repo::list_by_path_status(
            &self.db,
            self.path.id,
            JobStatus::Uploaded.code(),
            job_repo::StatusCmp::Eq,
        ) {
            Ok(jobs) => jobs,
            Err(e) => {
                error!("Listing jobs awaiting results failed: {}", e);
                return 0;
            }
        };

        let examined = jobs.len();
        for job in jobs {
            match self.fetcher.fetch_transcript(&job.remote_id) {
                Some(text) => {
                    match write_transcript(
                        Path::new(&self.path.result_dir),
                        Path::new(&job.file_path),
                        &text,
                    ) {
                        Ok(out) => {
                            info!("Job {} finished, transcript at {}", job.id, out.display());
                            job_repo::set_status(
                                &self.db,
                                job.id,
                                &job.remote_id,
                                JobStatus::Finished,
                            )
                            .log_storage_error();
                        }
                        Err(e) => {
                            // Leave the job at Uploaded; the next poll
                            // retries the write with a fresh fetch.
                            error!("Job {}: {}", job.id, e);
                        }
                    }
                }
                None => {
                    let attempts = job.poll_attempts + 1;
                    info!(
                        "No result yet for '{}' (attempt {}/{})",
                        job.file_path, attempts, self.path.result_attempts
                    );
                    job_repo::set_poll_attempts(&self.db, job.id, attempts).log_storage_error();

                    if attempts >= i64::from(self.path.result_attempts) {
                        job_repo::set_status(&self.db, job.id, &job.remote_id, JobStatus::NoResult)
                            .log_storage_error();
                    }
                }
            }
        }

        examined
    }

    /// Periodic loop at the path's configured interval.
    pub fn run(&self, shutdown: Arc<AtomicBool>) {
        let interval = Duration::from_secs(self.path.result_interval.max(1));
        info!(
            "Result poller for path {} every {:?}",
            self.path.id, interval
        );

        while !shutdown.load(Ordering::Relaxed) {
            sleep_interruptible(interval, &shutdown);
            if shutdown.load(Ordering::Relaxed) {
                break;
            }
            let examined = self.poll_once();
            if examined > 0 {
                debug!("Polled results for {} jobs", examined);
            }
        }

        debug!("Result poller for path {} stopped", self.path.id);
    }
}

/// One result-fetch pass over every path that polls for results.
/// Returns the number of jobs examined.
pub fn fetch_results_batch(
    db: &Database,
    retry: crate::transport::RetryPolicy,
) -> Result<usize, crate::db::DatabaseError> {
    use crate::db::path_repo::{self, Transport};

    let mut examined = 0;
    for path in path_repo::list(db)? {
        if !path.transport.polls_results() {
            continue;
        }
        if let Transport::Hosted { api_key, .. } = &path.transport {
            let fetcher = Arc::new(crate::transport::HttpApiClient::new(api_key.clone(), retry));
            let poller = ResultPoller::new(db.clone(), fetcher, path.clone());
            examined += poller.poll_once();
        }
    }
    Ok(examined)
}

/// Sleeps in short ticks so shutdown is observed promptly.
pub(crate) fn sleep_interruptible(total: Duration, shutdown: &AtomicBool) {
    let tick = Duration::from_millis(100);
    let mut remaining = total;
    while !remaining.is_zero() && !shutdown.load(Ordering::Relaxed) {
        let step = remaining.min(tick);
        std::thread::sleep(step);
        remaining -= step;
    }
}
