//! Per-file job states.
//!
//! Each state carries both the integer code persisted in the ledger and
//! the human-readable reason shown in job listings. Negative codes are
//! failures; `UploadFailed` and `QueueFull` are the only ones the
//! reconciler will pick up again.

use std::fmt;

/// Status of a file job in the upload pipeline.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum JobStatus {
    /// Registered, waiting to be queued for upload.
    Pending,
    /// Uploaded; the transcript must be fetched later by polling.
    Uploaded,
    /// Transcript fetched via polling and written out.
    Finished,
    /// Transcript delivered inline by the transport and written out.
    Delivered,
    /// Rejected: file size over the configured limit.
    TooLarge,
    /// Rejected: audio duration under the configured minimum.
    TooShort,
    /// Rejected: duration could not be read from the file.
    Unreadable,
    /// The path already has a job; no new row is ever written for this.
    Duplicate,
    /// No transcript after the configured number of poll attempts.
    NoResult,
    /// Upload failed (connection or protocol error).
    UploadFailed,
    /// The local upload queue was full when the job was submitted.
    QueueFull,
}

impl JobStatus {
    /// The integer code stored in the ledger.
    pub fn code(self) -> i64 {
        match self {
            JobStatus::Pending => 0,
            JobStatus::Uploaded => 1,
            JobStatus::Finished => 4,
            JobStatus::Delivered => 5,
            JobStatus::TooLarge => -2,
            JobStatus::TooShort => -3,
            JobStatus::Unreadable => -6,
            JobStatus::Duplicate => -7,
            JobStatus::NoResult => -8,
            JobStatus::UploadFailed => -9,
            JobStatus::QueueFull => -10,
        }
    }

    /// Human-readable reason for job listings.
    pub fn reason(self) -> &'static str {
        match self {
            JobStatus::Pending => "waiting for upload",
            JobStatus::Uploaded => "uploaded, awaiting result",
            JobStatus::Finished => "transcript fetched, finished",
            JobStatus::Delivered => "transcript saved, finished",
            JobStatus::TooLarge => "file size over limit",
            JobStatus::TooShort => "duration under limit",
            JobStatus::Unreadable => "unreadable audio",
            JobStatus::Duplicate => "duplicate of existing job",
            JobStatus::NoResult => "no result after max attempts",
            JobStatus::UploadFailed => "upload failed",
            JobStatus::QueueFull => "upload queue full",
        }
    }

    /// True when no further automated transition occurs from this state.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            JobStatus::Finished
                | JobStatus::Delivered
                | JobStatus::TooLarge
                | JobStatus::TooShort
                | JobStatus::Unreadable
                | JobStatus::Duplicate
                | JobStatus::NoResult
        )
    }

    /// True when the reconciler may re-enqueue a job in this state.
    pub fn is_retryable(self) -> bool {
        matches!(self, JobStatus::UploadFailed | JobStatus::QueueFull)
    }
}

impl TryFrom<i64> for JobStatus {
    type Error = UnknownStatus;

    fn try_from(code: i64) -> Result<Self, Self::Error> {
        match code {
            0 => Ok(JobStatus::Pending),
            1 => Ok(JobStatus::Uploaded),
            4 => Ok(JobStatus::Finished),
            5 => Ok(JobStatus::Delivered),
            -2 => Ok(JobStatus::TooLarge),
            -3 => Ok(JobStatus::TooShort),
            -6 => Ok(JobStatus::Unreadable),
            -7 => Ok(JobStatus::Duplicate),
            -8 => Ok(JobStatus::NoResult),
            -9 => Ok(JobStatus::UploadFailed),
            -10 => Ok(JobStatus::QueueFull),
            other => Err(UnknownStatus(other)),
        }
    }
}

impl fmt::Display for JobStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({})", self.code(), self.reason())
    }
}

/// A status code read from the ledger that maps to no known state.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct UnknownStatus(pub i64);

impl fmt::Display for UnknownStatus {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "unknown job status code: {}", self.0)
    }
}

impl std::error::Error for UnknownStatus {}
