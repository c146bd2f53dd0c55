use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::Arc;
use std::time::Duration;

use clap::{Parser, Subcommand};
use log::error;

use audup::db::job_repo::{self, JobRow, StatusCmp};
use audup::db::path_repo::{self, ApiMode, PathConfig, Transport, WatchedPath};
use audup::db::Database;
use audup::daemon::{self, DaemonOptions};
use audup::media::FfmpegConverter;
use audup::pipeline::poller::fetch_results_batch;
use audup::pipeline::{default_worker_count, upload_batch, BatchOptions, DEFAULT_QUEUE_CAPACITY};
use audup::status::JobStatus;
use audup::transport::RetryPolicy;

#[derive(Parser)]
#[command(
    name = "audup",
    version,
    about = "Watches directories for audio files and uploads them for transcription"
)]
struct Cli {
    /// Ledger database file (default: ~/.audup/data/audup.db).
    #[arg(long, global = true)]
    db: Option<PathBuf>,

    #[command(subcommand)]
    command: Command,
}

#[derive(Subcommand)]
enum Command {
    /// Create the ledger database.
    Init,
    /// Insert or update a watched path.
    Insert {
        /// Directory with audio files.
        #[arg(long)]
        path: String,
        /// ASR locale, e.g. en-US.
        #[arg(long)]
        lang: Option<String>,
        /// API key for the hosted service.
        #[arg(long)]
        api: Option<String>,
        /// URI of a self-hosted transcription server.
        #[arg(long)]
        uri: Option<String>,
        /// Directory for transcript TXT files.
        #[arg(long, default_value = path_repo::DEFAULT_RESULT_DIR)]
        txt: String,
        /// Seconds between result polls (HTTP mode).
        #[arg(long = "res-interval", default_value_t = 0)]
        res_interval: u64,
        /// Failed polls allowed before giving up (HTTP mode).
        #[arg(long = "res-attempts", default_value_t = 0)]
        res_attempts: u32,
        /// Use the two-phase HTTP upload instead of streaming.
        #[arg(long)]
        http: bool,
    },
    /// List watched paths.
    List,
    /// List jobs waiting for upload.
    Pending,
    /// List successfully processed jobs.
    Success,
    /// List jobs that ended in an error status.
    Errors,
    /// Remove a watched path by id.
    Remove {
        #[arg(long)]
        id: i64,
    },
    /// Delete all job rows.
    Flush,
    /// Run one scan-and-upload batch over every watched path.
    Upload {
        #[arg(long, default_value_t = default_worker_count())]
        workers: usize,
        #[arg(long = "queue-size", default_value_t = DEFAULT_QUEUE_CAPACITY)]
        queue_size: usize,
    },
    /// Fetch pending transcripts once.
    Fetch,
    /// Watch directories and process new files until interrupted.
    Watch {
        #[arg(long, default_value_t = default_worker_count())]
        workers: usize,
        #[arg(long = "queue-size", default_value_t = DEFAULT_QUEUE_CAPACITY)]
        queue_size: usize,
        /// Seconds between reconciliation sweeps.
        #[arg(long = "sweep-interval", default_value_t = 300)]
        sweep_interval: u64,
    },
}

fn main() -> ExitCode {
    init_logging();
    let cli = Cli::parse();

    let db_path = match cli.db.clone().or_else(audup::db::default_database_path) {
        Some(path) => path,
        None => {
            eprintln!("Could not determine a ledger path; pass --db explicitly.");
            return ExitCode::from(2);
        }
    };

    if !matches!(cli.command, Command::Init) && !db_path.is_file() {
        eprintln!(
            "No ledger at {}.\nRun 'audup init' first (or pass --db).",
            db_path.display()
        );
        return ExitCode::from(2);
    }

    let db = match Database::open(&db_path) {
        Ok(db) => db,
        Err(e) => {
            eprintln!("Could not open ledger: {}", e);
            return ExitCode::from(2);
        }
    };

    match run_command(&cli, &db) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}

fn run_command(cli: &Cli, db: &Database) -> audup::Result<()> {
    match &cli.command {
        Command::Init => {
            println!("Ledger ready.");
            Ok(())
        }
        Command::Insert {
            path,
            lang,
            api,
            uri,
            txt,
            res_interval,
            res_attempts,
            http,
        } => {
            let transport = match (api, uri) {
                (Some(api_key), None) => Transport::Hosted {
                    api_key: api_key.clone(),
                    mode: if *http {
                        ApiMode::Http
                    } else {
                        ApiMode::Streaming
                    },
                },
                (None, Some(uri)) => Transport::Server { uri: uri.clone() },
                _ => {
                    eprintln!("Pass exactly one of --api or --uri.");
                    return Ok(());
                }
            };

            let directory = match path_repo::normalize_directory(path) {
                Ok(directory) => directory,
                Err(e) => {
                    eprintln!("'{}' is not a usable directory: {}", path, e);
                    return Ok(());
                }
            };

            let config = PathConfig {
                directory,
                language: lang.clone(),
                transport,
                result_dir: txt.clone(),
                result_interval: *res_interval,
                result_attempts: *res_attempts,
            };
            path_repo::upsert(db, &config)?;
            print_paths(&path_repo::list(db)?);
            Ok(())
        }
        Command::List => {
            print_paths(&path_repo::list(db)?);
            Ok(())
        }
        Command::Pending => {
            print_jobs(&job_repo::list_by_status(
                db,
                JobStatus::Pending.code(),
                StatusCmp::Eq,
            )?);
            Ok(())
        }
        Command::Success => {
            print_jobs(&job_repo::list_by_status(
                db,
                JobStatus::Pending.code(),
                StatusCmp::Gt,
            )?);
            Ok(())
        }
        Command::Errors => {
            print_jobs(&job_repo::list_by_status(
                db,
                JobStatus::Pending.code(),
                StatusCmp::Lt,
            )?);
            Ok(())
        }
        Command::Remove { id } => {
            path_repo::delete(db, *id)?;
            println!("Removed path {}.", id);
            print_paths(&path_repo::list(db)?);
            Ok(())
        }
        Command::Flush => {
            job_repo::flush(db)?;
            println!("Flushed the job table.");
            Ok(())
        }
        Command::Upload {
            workers,
            queue_size,
        } => {
            let paths = path_repo::list(db)?;
            if paths.is_empty() {
                eprintln!("No watched paths configured. Insert one first.");
                return Ok(());
            }

            let opts = BatchOptions {
                workers: *workers,
                queue_capacity: *queue_size,
                retry: RetryPolicy::default(),
            };
            let converter = Arc::new(FfmpegConverter);

            println!(
                "{:<6} {:<40} {:>10} {:>10} {:>10} {:>10}",
                "id", "directory", "found", "queued", "rejected", "q-full"
            );
            for path in &paths {
                let report = upload_batch(db, converter.clone(), path, &opts)?;
                println!(
                    "{:<6} {:<40} {:>10} {:>10} {:>10} {:>10}",
                    report.path_id,
                    report.directory,
                    report.scan.discovered,
                    report.enqueued,
                    report.scan.rejected,
                    report.queue_full
                );
            }
            Ok(())
        }
        Command::Fetch => {
            let examined = fetch_results_batch(db, RetryPolicy::default())?;
            println!("Checked {} job(s) awaiting results.", examined);
            Ok(())
        }
        Command::Watch {
            workers,
            queue_size,
            sweep_interval,
        } => {
            let opts = DaemonOptions {
                workers: *workers,
                queue_capacity: *queue_size,
                sweep_interval: Duration::from_secs((*sweep_interval).max(1)),
                retry: RetryPolicy::default(),
            };
            daemon::run(db, Arc::new(FfmpegConverter), &opts)
        }
    }
}

fn init_logging() {
    let _ = tracing_log::LogTracer::init();
    let filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new("info"));
    let _ = tracing_subscriber::fmt().with_env_filter(filter).try_init();
}

fn print_paths(paths: &[WatchedPath]) {
    println!(
        "{:<6} {:<36} {:<8} {:<10} {:<26} {:>8} {:>8} {:<20}",
        "id", "directory", "lang", "transport", "target", "poll(s)", "tries", "txt dir"
    );
    for path in paths {
        let (kind, target) = match &path.transport {
            Transport::Hosted { api_key, mode } => (
                match mode {
                    ApiMode::Http => "http",
                    ApiMode::Streaming => "stream",
                },
                mask_key(api_key),
            ),
            Transport::Server { uri } => ("server", uri.clone()),
        };
        println!(
            "{:<6} {:<36} {:<8} {:<10} {:<26} {:>8} {:>8} {:<20}",
            path.id,
            path.directory,
            path.language.as_deref().unwrap_or("-"),
            kind,
            target,
            path.result_interval,
            path.result_attempts,
            path.result_dir
        );
    }
    println!("Rows: {}", paths.len());
}

fn print_jobs(jobs: &[JobRow]) {
    println!(
        "{:<6} {:<44} {:<8} {:<20} {:<20} {:<20} {:>5} {}",
        "id", "file", "lang", "created", "uploaded", "finished", "code", "status"
    );
    for job in jobs {
        println!(
            "{:<6} {:<44} {:<8} {:<20} {:<20} {:<20} {:>5} {}",
            job.id,
            job.file_path,
            job.language.as_deref().unwrap_or("-"),
            format_ts(Some(job.created_ts)),
            format_ts(job.uploaded_ts),
            format_ts(job.finished_ts),
            job.status,
            job.job_status()
                .map(|s| s.reason())
                .unwrap_or("unknown status"),
        );
    }
    println!("Rows: {}", jobs.len());
}

fn format_ts(ts: Option<i64>) -> String {
    match ts.and_then(|ts| chrono::DateTime::from_timestamp(ts, 0)) {
        Some(dt) => dt.format("%Y-%m-%d %H:%M:%S").to_string(),
        None => "-".to_string(),
    }
}

fn mask_key(key: &str) -> String {
    if key.len() <= 8 {
        "*".repeat(key.len())
    } else {
        format!("{}...{}", &key[..4], &key[key.len() - 4..])
    }
}
