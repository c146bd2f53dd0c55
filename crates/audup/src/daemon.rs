//! Event-driven mode: one worker pool, watcher, reconciler and result
//! poller per watched path, running until SIGINT/SIGTERM.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::{self, JoinHandle};
use std::time::Duration;

use log::{error, info, warn};

use crate::db::path_repo::{self, Transport};
use crate::db::Database;
use crate::error::{Result, WorkerError};
use crate::media::AudioConverter;
use crate::pipeline::reconciler::DEFAULT_SWEEP_INTERVAL;
use crate::pipeline::{
    default_worker_count, enqueue_uploadable, Reconciler, ResultPoller, WorkerPool,
    DEFAULT_QUEUE_CAPACITY,
};
use crate::scanner::DirectoryScanner;
use crate::transport::{client_for, HttpApiClient, RetryPolicy};
use crate::watcher::DirectoryWatcher;

#[derive(Debug, Clone, Copy)]
pub struct DaemonOptions {
    pub workers: usize,
    pub queue_capacity: usize,
    pub sweep_interval: Duration,
    pub retry: RetryPolicy,
}

impl Default for DaemonOptions {
    fn default() -> Self {
        Self {
            workers: default_worker_count(),
            queue_capacity: DEFAULT_QUEUE_CAPACITY,
            sweep_interval: DEFAULT_SWEEP_INTERVAL,
            retry: RetryPolicy::default(),
        }
    }
}

/// Runs the event-driven pipeline until a termination signal arrives.
pub fn run(db: &Database, converter: Arc<dyn AudioConverter>, opts: &DaemonOptions) -> Result<()> {
    let shutdown = Arc::new(AtomicBool::new(false));

    let flag = Arc::clone(&shutdown);
    ctrlc::set_handler(move || {
        info!("Shutdown signal received");
        flag.store(true, Ordering::Relaxed);
    })
    .map_err(|e| WorkerError::Signal(e.to_string()))?;

    run_with_shutdown(db, converter, opts, shutdown)
}

/// [`run`] with an externally owned shutdown flag.
pub fn run_with_shutdown(
    db: &Database,
    converter: Arc<dyn AudioConverter>,
    opts: &DaemonOptions,
    shutdown: Arc<AtomicBool>,
) -> Result<()> {
    let paths = path_repo::list(db)?;
    if paths.is_empty() {
        warn!("No watched paths configured; nothing to do");
        return Ok(());
    }

    let mut pools = Vec::new();
    let mut producers: Vec<JoinHandle<()>> = Vec::new();

    for path in paths {
        if let Err(e) = std::fs::create_dir_all(&path.result_dir) {
            warn!(
                "Could not create result directory {}: {}",
                path.result_dir, e
            );
        }

        let uploader = client_for(&path.transport, opts.retry);
        let pool = WorkerPool::new(uploader, db.clone(), opts.workers, opts.queue_capacity);

        // Catch up on anything that appeared or failed while we were down.
        let scanner = DirectoryScanner::new(db.clone(), Arc::clone(&converter));
        if let Err(e) = scanner.scan(&path.directory, path.language.as_deref(), path.id) {
            error!("Initial scan of {} failed: {}", path.directory, e);
        }
        if let Err(e) = enqueue_uploadable(db, &pool.submitter(), &path) {
            error!("Initial enqueue for {} failed: {}", path.directory, e);
        }

        let watcher = DirectoryWatcher::new(
            db.clone(),
            Arc::clone(&converter),
            path.clone(),
            pool.submitter(),
        );
        let watcher_shutdown = Arc::clone(&shutdown);
        let watcher_dir = path.directory.clone();
        producers.push(thread::spawn(move || {
            if let Err(e) = watcher.watch(watcher_shutdown) {
                error!("Watcher for {} stopped: {}", watcher_dir, e);
            }
        }));

        let reconciler = Reconciler::new(
            db.clone(),
            pool.submitter(),
            path.clone(),
            opts.sweep_interval,
        );
        let reconciler_shutdown = Arc::clone(&shutdown);
        producers.push(thread::spawn(move || reconciler.run(reconciler_shutdown)));

        if path.transport.polls_results() && path.result_interval > 0 {
            if let Transport::Hosted { api_key, .. } = &path.transport {
                let fetcher = Arc::new(HttpApiClient::new(api_key.clone(), opts.retry));
                let poller = ResultPoller::new(db.clone(), fetcher, path.clone());
                let poller_shutdown = Arc::clone(&shutdown);
                producers.push(thread::spawn(move || poller.run(poller_shutdown)));
            }
        }

        pools.push(pool);
    }

    info!("Event-driven pipeline running over {} path(s)", pools.len());

    while !shutdown.load(Ordering::Relaxed) {
        thread::sleep(Duration::from_millis(100));
    }

    // Graceful drain: producers stop enqueueing first, then workers
    // finish their in-flight task.
    info!("Draining pipeline...");
    for producer in producers {
        if producer.join().is_err() {
            error!("Producer thread panicked during shutdown");
        }
    }
    for pool in pools {
        pool.shutdown();
        pool.wait();
    }

    info!("Shutdown complete");
    Ok(())
}
