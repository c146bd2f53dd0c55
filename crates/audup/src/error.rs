use std::path::PathBuf;
use thiserror::Error;

#[derive(Error, Debug)]
pub enum AudupError {
    #[error("Media error: {0}")]
    Media(#[from] MediaError),

    #[error("Validation error: {0}")]
    Validate(#[from] ValidateError),

    #[error("Transport error: {0}")]
    Transport(#[from] TransportError),

    #[error("Worker error: {0}")]
    Worker(#[from] WorkerError),

    #[error("Database error: {0}")]
    Database(#[from] crate::db::DatabaseError),
}

#[derive(Error, Debug)]
pub enum MediaError {
    #[error("Failed to spawn '{tool}' for '{path}': {source}")]
    Spawn {
        tool: &'static str,
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },

    #[error("'{tool}' failed for '{path}': {detail}")]
    ToolFailed {
        tool: &'static str,
        path: PathBuf,
        detail: String,
    },

    #[error("Unparsable probe output for '{path}': {detail}")]
    BadProbeOutput { path: PathBuf, detail: String },
}

#[derive(Error, Debug)]
pub enum ValidateError {
    /// The file has no recognized audio extension. Non-fatal: the file is
    /// skipped and never recorded.
    #[error("Not an audio file: {0}")]
    NotAudio(PathBuf),

    /// Transcoding to wav failed. Non-fatal: the file is skipped and never
    /// recorded.
    #[error("Transcoding '{path}' failed: {source}")]
    Transcode {
        path: PathBuf,
        #[source]
        source: MediaError,
    },
}

#[derive(Error, Debug)]
pub enum TransportError {
    #[error("Failed to read wav '{path}': {detail}")]
    ReadWav { path: PathBuf, detail: String },

    #[error("Unsupported wav layout in '{path}': {detail}")]
    WavLayout { path: PathBuf, detail: String },

    #[error("Connection to '{endpoint}' failed: {detail}")]
    Connect { endpoint: String, detail: String },

    #[error("Streaming exchange failed: {0}")]
    Stream(String),

    #[error("HTTP request failed: {0}")]
    Http(#[from] reqwest::Error),

    #[error("Server rejected {what} with status {status}: {body}")]
    Rejected {
        what: &'static str,
        status: u16,
        body: String,
    },

    #[error("Malformed server response: {0}")]
    BadResponse(String),

    #[error("Gave up after {attempts} attempts: {last}")]
    RetriesExhausted { attempts: u32, last: String },
}

#[derive(Error, Debug)]
pub enum WorkerError {
    #[error("Upload queue is full")]
    QueueFull,

    #[error("Worker channel closed unexpectedly")]
    ChannelClosed,

    #[error("Directory scan failed for '{path}': {source}")]
    ScanFailed {
        path: PathBuf,
        #[source]
        source: walkdir::Error,
    },

    #[error("Watch error: {0}")]
    WatchError(String),

    #[error("Failed to install signal handler: {0}")]
    Signal(String),

    #[error("Failed to write transcript '{path}': {source}")]
    WriteTranscript {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

pub type Result<T> = std::result::Result<T, AudupError>;

/// Storage failures are logged at the ledger boundary; the caller must
/// treat the job's state as unchanged and safe to retry later.
pub trait DatabaseErrorExt {
    fn log_storage_error(self);
}

impl<T> DatabaseErrorExt for std::result::Result<T, crate::db::DatabaseError> {
    fn log_storage_error(self) {
        if let Err(e) = self {
            log::error!("Ledger update failed, state unchanged: {}", e);
        }
    }
}
