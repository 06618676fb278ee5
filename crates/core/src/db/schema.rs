//! Database schema definitions and migration runner.
//!
//! Migrations are plain SQL strings applied in order. The SQLite
//! `user_version` pragma records which of them have already run.

use rusqlite::Connection;
use tracing::{debug, info};

use crate::errors::DatabaseError;

/// All migrations, in order, as `(version, description, sql)`.
static MIGRATIONS: &[(u32, &str, &str)] = &[
    (
        1,
        "initial schema",
        r#"
        CREATE TABLE IF NOT EXISTS merge_runs (
            id              TEXT PRIMARY KEY,
            mode            TEXT NOT NULL,
            upstream_ref    TEXT NOT NULL,
            baseline        TEXT NOT NULL DEFAULT '',
            upstream_head   TEXT,
            merge_status    TEXT NOT NULL,
            dry_run         INTEGER NOT NULL DEFAULT 0,
            success         INTEGER NOT NULL,
            resolved_count  INTEGER NOT NULL DEFAULT 0,
            manual_count    INTEGER NOT NULL DEFAULT 0,
            error_message   TEXT,
            started_at      TEXT NOT NULL,
            completed_at    TEXT NOT NULL
        );

        CREATE INDEX IF NOT EXISTS idx_merge_runs_started_at ON merge_runs (started_at);

        CREATE TABLE IF NOT EXISTS merge_run_files (
            id          INTEGER PRIMARY KEY AUTOINCREMENT,
            run_id      TEXT NOT NULL REFERENCES merge_runs (id) ON DELETE CASCADE,
            path        TEXT NOT NULL,
            outcome     TEXT NOT NULL,
            detail      TEXT,
            regions     TEXT NOT NULL DEFAULT '[]'
        );

        CREATE INDEX IF NOT EXISTS idx_merge_run_files_run_id ON merge_run_files (run_id);

        CREATE TABLE IF NOT EXISTS kv_state (
            key         TEXT PRIMARY KEY,
            value       TEXT NOT NULL,
            updated_at  TEXT NOT NULL
        );
        "#,
    ),
];

/// Run all pending migrations against `conn`.
pub fn run_migrations(conn: &Connection) -> Result<(), DatabaseError> {
    let current_version = get_schema_version(conn)?;
    info!(
        current_version,
        target_version = MIGRATIONS.last().map(|m| m.0).unwrap_or(0),
        "checking database migrations"
    );

    for &(version, description, sql) in MIGRATIONS {
        if version > current_version {
            info!(version, description, "applying migration");
            conn.execute_batch(sql)
                .map_err(|e| DatabaseError::MigrationFailed {
                    version,
                    detail: e.to_string(),
                })?;
            set_schema_version(conn, version)?;
            debug!(version, "migration applied");
        }
    }

    Ok(())
}

fn get_schema_version(conn: &Connection) -> Result<u32, DatabaseError> {
    let version: u32 = conn.pragma_query_value(None, "user_version", |row| row.get(0))?;
    Ok(version)
}

fn set_schema_version(conn: &Connection, version: u32) -> Result<(), DatabaseError> {
    conn.pragma_update(None, "user_version", version)?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_migrations_run_idempotently() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();
        run_migrations(&conn).unwrap();
        assert_eq!(get_schema_version(&conn).unwrap(), 1);
    }

    #[test]
    fn test_tables_created() {
        let conn = Connection::open_in_memory().unwrap();
        run_migrations(&conn).unwrap();

        let tables: Vec<String> = {
            let mut stmt = conn
                .prepare("SELECT name FROM sqlite_master WHERE type='table' ORDER BY name")
                .unwrap();
            stmt.query_map([], |row| row.get(0))
                .unwrap()
                .filter_map(|r| r.ok())
                .collect()
        };

        for table in ["merge_runs", "merge_run_files", "kv_state"] {
            assert!(tables.contains(&table.to_string()), "missing {}", table);
        }
    }
}
