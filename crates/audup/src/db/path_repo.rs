//! Watched-path repository — configuration rows for source directories.

use std::path::Path;

use rusqlite::{params, OptionalExtension, Row};

use super::{now_ts, Database, DatabaseError};

/// Default directory for transcript output files.
pub const DEFAULT_RESULT_DIR: &str = "./txt/";

/// How a watched path talks to the transcription service.
///
/// Exactly one variant is authoritative per path; a row carrying both a
/// credential and an endpoint (or neither) is rejected on load.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Transport {
    /// Hosted API, authenticated with an API key.
    Hosted { api_key: String, mode: ApiMode },
    /// Self-hosted transcription server, addressed by URI.
    Server { uri: String },
}

/// Upload protocol for the hosted API.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApiMode {
    /// Persistent-socket streaming; transcript is delivered inline.
    Streaming,
    /// Two-phase HTTP upload; transcript is fetched later by polling.
    Http,
}

impl Transport {
    /// True when results must be fetched by polling after upload.
    pub fn polls_results(&self) -> bool {
        matches!(
            self,
            Transport::Hosted {
                mode: ApiMode::Http,
                ..
            }
        )
    }
}

/// A configured source directory.
#[derive(Debug, Clone)]
pub struct WatchedPath {
    pub id: i64,
    /// Absolute, trailing-separated directory.
    pub directory: String,
    pub language: Option<String>,
    pub transport: Transport,
    pub result_dir: String,
    /// Seconds between result polls; 0 disables the polling loop.
    pub result_interval: u64,
    /// Failed polls allowed before a job becomes terminal.
    pub result_attempts: u32,
}

/// Insert/update form for a watched path.
#[derive(Debug, Clone)]
pub struct PathConfig {
    pub directory: String,
    pub language: Option<String>,
    pub transport: Transport,
    pub result_dir: String,
    pub result_interval: u64,
    pub result_attempts: u32,
}

impl PathConfig {
    pub fn new(directory: String, transport: Transport) -> Self {
        Self {
            directory,
            language: None,
            transport,
            result_dir: DEFAULT_RESULT_DIR.to_string(),
            result_interval: 0,
            result_attempts: 0,
        }
    }
}

/// Normalizes a directory to absolute form with a trailing separator.
/// Fails when the directory does not exist.
pub fn normalize_directory(dir: &str) -> Result<String, std::io::Error> {
    let canonical = Path::new(dir).canonicalize()?;
    if !canonical.is_dir() {
        return Err(std::io::Error::new(
            std::io::ErrorKind::NotADirectory,
            format!("{} is not a directory", canonical.display()),
        ));
    }
    let mut s = canonical.to_string_lossy().to_string();
    if !s.ends_with(std::path::MAIN_SEPARATOR) {
        s.push(std::path::MAIN_SEPARATOR);
    }
    Ok(s)
}

fn from_row(row: &Row<'_>) -> Result<WatchedPath, DatabaseError> {
    let id: i64 = row.get("id").map_err(DatabaseError::Sqlite)?;
    let api_key: Option<String> = row.get("api_key").map_err(DatabaseError::Sqlite)?;
    let uri: Option<String> = row.get("uri").map_err(DatabaseError::Sqlite)?;
    let http_mode: i64 = row.get("http_mode").map_err(DatabaseError::Sqlite)?;

    let api_key = api_key.filter(|k| !k.is_empty());
    let uri = uri.filter(|u| !u.is_empty());

    let transport = match (api_key, uri) {
        (Some(api_key), None) => Transport::Hosted {
            api_key,
            mode: if http_mode == 1 {
                ApiMode::Http
            } else {
                ApiMode::Streaming
            },
        },
        (None, Some(uri)) => Transport::Server { uri },
        (Some(_), Some(_)) => {
            return Err(DatabaseError::CorruptRow {
                table: "watched_paths",
                id,
                reason: "both api_key and uri are set".into(),
            })
        }
        (None, None) => {
            return Err(DatabaseError::CorruptRow {
                table: "watched_paths",
                id,
                reason: "neither api_key nor uri is set".into(),
            })
        }
    };

    Ok(WatchedPath {
        id,
        directory: row.get("directory").map_err(DatabaseError::Sqlite)?,
        language: row.get("language").map_err(DatabaseError::Sqlite)?,
        transport,
        result_dir: row.get("result_dir").map_err(DatabaseError::Sqlite)?,
        result_interval: row
            .get::<_, i64>("result_interval")
            .map_err(DatabaseError::Sqlite)? as u64,
        result_attempts: row
            .get::<_, i64>("result_attempts")
            .map_err(DatabaseError::Sqlite)? as u32,
    })
}

fn transport_columns(transport: &Transport) -> (Option<&str>, Option<&str>, i64) {
    match transport {
        Transport::Hosted { api_key, mode } => (
            Some(api_key.as_str()),
            None,
            match mode {
                ApiMode::Http => 1,
                ApiMode::Streaming => 0,
            },
        ),
        Transport::Server { uri } => (None, Some(uri.as_str()), 0),
    }
}

/// Inserts a new watched path, or updates the existing row keyed by
/// directory. Returns the row id either way.
pub fn upsert(db: &Database, config: &PathConfig) -> Result<i64, DatabaseError> {
    let (api_key, uri, http_mode) = transport_columns(&config.transport);

    db.with_conn(|conn| {
        let existing: Option<i64> = conn
            .query_row(
                "SELECT id FROM watched_paths WHERE directory = ?1",
                params![config.directory],
                |r| r.get(0),
            )
            .optional()?;

        match existing {
            Some(id) => {
                conn.execute(
                    "UPDATE watched_paths
                     SET language = ?2, api_key = ?3, uri = ?4, http_mode = ?5,
                         result_dir = ?6, result_interval = ?7, result_attempts = ?8
                     WHERE id = ?1",
                    params![
                        id,
                        config.language,
                        api_key,
                        uri,
                        http_mode,
                        config.result_dir,
                        config.result_interval as i64,
                        config.result_attempts as i64,
                    ],
                )?;
                Ok(id)
            }
            None => {
                conn.execute(
                    "INSERT INTO watched_paths
                     (directory, language, api_key, uri, http_mode,
                      result_dir, result_interval, result_attempts, created_ts)
                     VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9)",
                    params![
                        config.directory,
                        config.language,
                        api_key,
                        uri,
                        http_mode,
                        config.result_dir,
                        config.result_interval as i64,
                        config.result_attempts as i64,
                        now_ts(),
                    ],
                )?;
                Ok(conn.last_insert_rowid())
            }
        }
    })
}

/// Lists all watched paths.
pub fn list(db: &Database) -> Result<Vec<WatchedPath>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM watched_paths ORDER BY id")?;
        let mut rows = stmt.query([])?;
        let mut paths = Vec::new();
        while let Some(row) = rows.next()? {
            paths.push(from_row(row)?);
        }
        Ok(paths)
    })
}

/// Finds a watched path by its directory key.
pub fn find_by_directory(
    db: &Database,
    directory: &str,
) -> Result<Option<WatchedPath>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM watched_paths WHERE directory = ?1")?;
        let mut rows = stmt.query(params![directory])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// Finds a watched path by id.
pub fn find_by_id(db: &Database, id: i64) -> Result<Option<WatchedPath>, DatabaseError> {
    db.with_conn(|conn| {
        let mut stmt = conn.prepare("SELECT * FROM watched_paths WHERE id = ?1")?;
        let mut rows = stmt.query(params![id])?;
        match rows.next()? {
            Some(row) => Ok(Some(from_row(row)?)),
            None => Ok(None),
        }
    })
}

/// Deletes a watched path by id. Jobs under the path are kept.
pub fn delete(db: &Database, id: i64) -> Result<(), DatabaseError> {
    db.with_conn(|conn| {
        conn.execute("DELETE FROM watched_paths WHERE id = ?1", params![id])?;
        Ok(())
    })
}
