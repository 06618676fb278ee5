//! SQLite run history.
//!
//! Every orchestrator run is recorded with its per-file outcomes, and the
//! upstream head of the last committed merge is kept as the baseline for
//! the next one. A [`Database`] is always migrated before it is handed out.

pub mod queries;
pub mod schema;

use std::path::Path;
use std::sync::{Mutex, MutexGuard, PoisonError};

use rusqlite::Connection;
use tracing::info;

use crate::errors::DatabaseError;

const FILE_PRAGMAS: &str = "\
PRAGMA journal_mode = WAL;
PRAGMA foreign_keys = ON;
PRAGMA busy_timeout = 5000;";

/// The run-history store.
pub struct Database {
    conn: Mutex<Connection>,
}

impl Database {
    /// Open the history file at `path`, creating it and its directory on
    /// first use.
    pub fn open(path: &Path) -> Result<Self, DatabaseError> {
        if let Some(dir) = path.parent().filter(|d| !d.as_os_str().is_empty()) {
            std::fs::create_dir_all(dir)?;
        }
        let conn = Connection::open(path)?;
        conn.execute_batch(FILE_PRAGMAS)?;
        info!(path = %path.display(), "opened run history");
        Self::with_schema(conn)
    }

    #[cfg(test)]
    pub(crate) fn in_memory() -> Result<Self, DatabaseError> {
        let conn = Connection::open_in_memory()?;
        conn.execute_batch("PRAGMA foreign_keys = ON;")?;
        Self::with_schema(conn)
    }

    fn with_schema(conn: Connection) -> Result<Self, DatabaseError> {
        schema::run_migrations(&conn)?;
        Ok(Self {
            conn: Mutex::new(conn),
        })
    }

    /// A panic while holding the lock leaves SQLite itself consistent, so a
    /// poisoned mutex is simply taken over.
    pub(crate) fn lock(&self) -> MutexGuard<'_, Connection> {
        self.conn.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Run `f` in a transaction that commits only when `f` succeeds.
    pub(crate) fn transaction<T>(
        &self,
        f: impl FnOnce(&Connection) -> Result<T, DatabaseError>,
    ) -> Result<T, DatabaseError> {
        let mut conn = self.lock();
        let tx = conn.transaction()?;
        let value = f(&tx)?;
        tx.commit()?;
        Ok(value)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_open_creates_directory_and_persists() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join(".forkmerge").join("forkmerge.db");

        let db = Database::open(&path).unwrap();
        db.set_baseline("abc123").unwrap();
        drop(db);
        assert!(path.exists());

        // Reopening runs the migrations again without touching the data.
        let db = Database::open(&path).unwrap();
        assert_eq!(db.get_baseline().unwrap().as_deref(), Some("abc123"));
    }

    #[test]
    fn test_failed_transaction_is_rolled_back() {
        let db = Database::in_memory().unwrap();

        let result: Result<(), DatabaseError> = db.transaction(|conn| {
            conn.execute(
                "INSERT INTO kv_state (key, value, updated_at) VALUES ('k', 'v', 'now')",
                [],
            )?;
            Err(DatabaseError::SqliteError(rusqlite::Error::QueryReturnedNoRows))
        });
        assert!(result.is_err());
        assert!(db.get_state("k").unwrap().is_none());
    }
}
