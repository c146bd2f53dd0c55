//! Database migration system.
//!
//! Tracks applied migrations in a `_migrations` table and applies
//! pending ones in order.

use rusqlite::Connection;

use super::error::DatabaseError;

/// A single migration definition.
struct Migration {
    version: u32,
    description: &'static str,
    sql: &'static str,
}

/// All migrations in order. Each is applied at most once.
const MIGRATIONS: &[Migration] = &[
    Migration {
        version: 1,
        description: "create_watched_paths_table",
        sql: "CREATE TABLE watched_paths (
                id INTEGER PRIMARY KEY,
                directory TEXT NOT NULL UNIQUE,
                language TEXT,
                api_key TEXT,
                uri TEXT,
                http_mode INTEGER NOT NULL DEFAULT 0,
                result_dir TEXT NOT NULL,
                result_interval INTEGER NOT NULL DEFAULT 0,
                result_attempts INTEGER NOT NULL DEFAULT 0,
                created_ts INTEGER NOT NULL
            );",
    },
    Migration {
        version: 2,
        description: "create_file_jobs_table",
        sql: "CREATE TABLE file_jobs (
                id INTEGER PRIMARY KEY,
                file_path TEXT NOT NULL UNIQUE,
                language TEXT,
                remote_id TEXT NOT NULL DEFAULT '',
                created_ts INTEGER NOT NULL,
                uploaded_ts INTEGER,
                finished_ts INTEGER,
                status INTEGER NOT NULL DEFAULT 0,
                path_id INTEGER NOT NULL,
                poll_attempts INTEGER NOT NULL DEFAULT 0
            );",
    },
    Migration {
        version: 3,
        description: "index_file_jobs_status",
        sql: "CREATE INDEX idx_file_jobs_status ON file_jobs (status);
              CREATE INDEX idx_file_jobs_path_status ON file_jobs (path_id, status);",
    },
];

/// Runs all pending migrations on the given connection.
pub fn run_all(conn: &Connection) -> Result<(), DatabaseError> {
    conn.execute_batch(
        "CREATE TABLE IF NOT EXISTS _migrations (
            version INTEGER PRIMARY KEY,
            description TEXT NOT NULL,
            applied_at TEXT NOT NULL DEFAULT (datetime('now'))
        );",
    )?;

    let current_version: u32 = conn.query_row(
        "SELECT COALESCE(MAX(version), 0) FROM _migrations",
        [],
        |r| r.get(0),
    )?;

    for migration in MIGRATIONS {
        if migration.version <= current_version {
            continue;
        }

        log::info!(
            "Running migration v{}: {}",
            migration.version,
            migration.description
        );

        conn.execute_batch(migration.sql)
            .map_err(|e| DatabaseError::Migration {
                version: migration.version,
                reason: e.to_string(),
            })?;

        conn.execute(
            "INSERT INTO _migrations (version, description) VALUES (?1, ?2)",
            rusqlite::params![migration.version, migration.description],
        )?;
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_on_fresh_db() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_migrations_are_idempotent() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();
        // Running again should be a no-op.
        run_all(&conn).unwrap();

        let count: u32 = conn
            .query_row("SELECT COUNT(*) FROM _migrations", [], |r| r.get(0))
            .unwrap();
        assert_eq!(count, MIGRATIONS.len() as u32);
    }

    #[test]
    fn test_tables_exist() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO watched_paths (directory, result_dir, created_ts)
             VALUES ('/calls/', './txt/', 0)",
            [],
        )
        .unwrap();
        conn.execute(
            "INSERT INTO file_jobs (file_path, created_ts, path_id)
             VALUES ('/calls/a.wav', 0, 1)",
            [],
        )
        .unwrap();
    }

    #[test]
    fn test_file_path_is_unique() {
        let conn = Connection::open_in_memory().unwrap();
        run_all(&conn).unwrap();

        conn.execute(
            "INSERT INTO file_jobs (file_path, created_ts, path_id)
             VALUES ('/calls/a.wav', 0, 1)",
            [],
        )
        .unwrap();
        let dup = conn.execute(
            "INSERT INTO file_jobs (file_path, created_ts, path_id)
             VALUES ('/calls/a.wav', 0, 1)",
            [],
        );
        assert!(dup.is_err());
    }
}
