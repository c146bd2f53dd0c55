//! Job repository — per-file rows in the `file_jobs` table.

use rusqlite::{params, OptionalExtension, Row};

use super::{now_ts, Database, DatabaseError};
use crate::status::JobStatus;

/// A raw job row from the ledger.
#[derive(Debug, Clone)]
pub struct JobRow {
    pub id: i64,
    pub file_path: String,
    pub language: Option<String>,
    /// Identifier assigned by the remote service; empty until upload.
    pub remote_id: String,
    pub created_ts: i64,
    pub uploaded_ts: Option<i64>,
    pub finished_ts: Option<i64>,
    pub status: i64,
    pub path_id: i64,
    pub poll_attempts: i64,
}

impl JobRow {
    fn from_row(row: &Row<'_>) -> Result<Self, rusqlite::Error> {
        Ok(Self {
            id: row.get("id")?,
            file_path: row.get("file_path")?,
            language: row.get("language")?,
            remote_id: row.get("remote_id")?,
            created_ts: row.get("created_ts")?,
            uploaded_ts: row.get("uploaded_ts")?,
            finished_ts: row.get("finished_ts")?,
            status: row.get("status")?,
            path_id: row.get("path_id")?,
            poll_attempts: row.get("poll_attempts")?,
        })
    }

    /// Decoded status, when the stored code is a known state.
    pub fn job_status(&self) -> Option<JobStatus> {
        JobStatus::try_from(self.status).ok()
    }
}

/// Comparison operator for status queries.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StatusCmp {
    Eq,
    Lt,
    Gt,
    Le,
}

impl StatusCmp {
    fn as_sql(self) -> &'static str {
        match self {
            StatusCmp::Eq => "=",
            StatusCmp::Lt => "<",
            StatusCmp::Gt => ">",
            StatusCmp::Le => "<=",
        }
    }
}

/// Inserts a job for `file_path` at the given status.
///
/// Idempotent on the file path: if a job already exists, nothing is
/// written and the existing id is returned.
pub fn insert(
    db: &Database,
    file_path: &str,
    language: Option<&str>,
    path_id: i64,
    status: JobStatus,
) -> Result<i64, DatabaseError> {
    db.with_conn(|conn| {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM file_jobs WHERE file_path = ?1",
                params![file_path],
                |r| r.get(0),
            )
            .optional()?;

        if let Some(id) = existing {
            return Ok(id);
        }

        // INSERT OR IGNORE so a concurrent registration of the same path
        // cannot produce a second row; the follow-up SELECT resolves the
        // winner's id either way.
        conn.execute(
            "INSERT OR IGNORE INTO file_jobs
             (file_path, language, remote_id, created_ts, status, path_id, poll_attempts)
             VALUES (?1, ?2, '', ?3, ?4, ?5, 0)",
            params![file_path, language, now_ts(), status.code(), path_id],
        )?;

        let id: i64 = conn.query_row(
            "SELECT id FROM file_jobs WHERE file_path = ?1",
            params![file_path],
            |r| r.get(0),
        )?;
        Ok(id)
    })
}

/// Finds a job id by its file path.
pub fn find_by_path(db: &Database, file_path: &str) -> Result<Option<i64>, DatabaseError> {
    db.with_conn(|conn| {
        let id = conn
            .query_row(
                "SELECT id FROM file_jobs WHERE file_path = ?1",
                params![file_path],
                |r| r.get(0),
            )
            .optional()?;
        Ok(id)
    })
}

/// Fetches a single job row by id.
pub fn get(db: &Database, id: i64) -> Result<Option<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM file_jobs WHERE id = ?1")?;
        let mut rows = stmt.query_map(params![id], JobRow::from_row)?;
        match rows.next() {
            Some(Ok(row)) => Ok(Some(row)),
            Some(Err(e)) => Err(DatabaseError::Sqlite(e)),
            None => Ok(None),
        }
    })
}

/// Updates status and remote id, stamping the upload timestamp; a
/// finished timestamp is stamped as well when the new status is a
/// successful terminal one.
pub fn set_status(
    db: &Database,
    id: i64,
    remote_id: &str,
    status: JobStatus,
) -> Result<(), DatabaseError> {
    let now = now_ts();
    db.with_conn(|conn| {
        if matches!(status, JobStatus::Finished | JobStatus::Delivered) {
            conn.execute(
                "UPDATE file_jobs
                 SET status = ?2, remote_id = ?3, uploaded_ts = ?4, finished_ts = ?4
                 WHERE id = ?1",
                params![id, status.code(), remote_id, now],
            )?;
        } else {
            conn.execute(
                "UPDATE file_jobs SET status = ?2, remote_id = ?3, uploaded_ts = ?4 WHERE id = ?1",
                params![id, status.code(), remote_id, now],
            )?;
        }
        Ok(())
    })
}

/// Overwrites the poll-attempt counter.
pub fn set_poll_attempts(db: &Database, id: i64, attempts: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute(
            "UPDATE file_jobs SET poll_attempts = ?2, uploaded_ts = ?3 WHERE id = ?1",
            params![id, attempts, now_ts()],
        )?;
        Ok(())
    })
}

/// Lists jobs whose status compares to `code` under `cmp`, ordered by id.
pub fn list_by_status(
    db: &Database,
    code: i64,
    cmp: StatusCmp,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT * FROM file_jobs WHERE status {} ?1 ORDER BY id",
            cmp.as_sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params![code], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Lists jobs for one watched path whose status compares to `code`.
pub fn list_by_path_status(
    db: &Database,
    path_id: i64,
    code: i64,
    cmp: StatusCmp,
) -> Result<Vec<JobRow>, DatabaseError> {
    db.with_conn(|conn| {
        let sql = format!(
            "SELECT * FROM file_jobs WHERE path_id = ?1 AND status {} ?2 ORDER BY id",
            cmp.as_sql()
        );
        let mut stmt = conn.prepare(&sql)?;
        let rows: Vec<JobRow> = stmt
            .query_map(params![path_id, code], JobRow::from_row)?
            .collect::<Result<Vec<_>, _>>()?;
        Ok(rows)
    })
}

/// Jobs eligible for upload under a path: pending, plus retryable failures.
pub fn list_uploadable(db: &Database, path_id: i64) -> Result<Vec<JobRow>, DatabaseError> {
    let mut jobs = list_by_path_status(db, path_id, JobStatus::Pending.code(), StatusCmp::Eq)?;
    jobs.extend(list_by_path_status(
        db,
        path_id,
        JobStatus::UploadFailed.code(),
        StatusCmp::Le,
    )?);
    Ok(jobs)
}

/// Deletes every job row. The watched-path table is untouched.
pub fn flush(db: &Database) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM file_jobs", [])?;
        Ok(())
    })
}
