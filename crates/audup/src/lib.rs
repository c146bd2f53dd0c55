pub mod daemon;
pub mod db;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod scanner;
pub mod status;
pub mod transport;
pub mod validate;
pub mod watcher;

pub use error::{
    AudupError, MediaError, Result, TransportError, ValidateError, WorkerError,
};
pub use media::{AudioConverter, FfmpegConverter};
pub use pipeline::{upload_batch, BatchOptions, BatchReport, ResultPoller, WorkerPool};
pub use scanner::{DirectoryScanner, ScanLimits, ScanSummary};
pub use status::JobStatus;
pub use transport::{RetryPolicy, UploadOutcome, Uploader};
pub use validate::FileValidator;
pub use watcher::DirectoryWatcher;
