//! Typed query helpers for the run-history tables.

use chrono::Utc;
use rusqlite::{params, Row};
use serde::Serialize;
use tracing::debug;

use super::Database;
use crate::errors::DatabaseError;
use crate::merge_engine::{MergeReport, RunMode};

/// `kv_state` key holding the upstream head of the last successful merge.
pub const BASELINE_KEY: &str = "last_merged_upstream_commit";

// ---------------------------------------------------------------------------
// Row structs
// ---------------------------------------------------------------------------

/// A row from the `merge_runs` table.
#[derive(Debug, Clone, Serialize)]
pub struct RunEntry {
    pub id: String,
    pub mode: String,
    pub upstream_ref: String,
    pub baseline: String,
    pub upstream_head: Option<String>,
    pub merge_status: String,
    pub dry_run: bool,
    pub success: bool,
    pub resolved_count: i64,
    pub manual_count: i64,
    pub error_message: Option<String>,
    pub started_at: String,
    pub completed_at: String,
}

/// A row from the `merge_run_files` table.
#[derive(Debug, Clone, Serialize)]
pub struct RunFileEntry {
    pub id: i64,
    pub run_id: String,
    pub path: String,
    pub outcome: String,
    pub detail: Option<String>,
    /// JSON array of region verdicts.
    pub regions: String,
}

const RUN_COLUMNS: &str = "id, mode, upstream_ref, baseline, upstream_head, merge_status, \
     dry_run, success, resolved_count, manual_count, error_message, started_at, completed_at";

fn run_from_row(row: &Row<'_>) -> rusqlite::Result<RunEntry> {
    Ok(RunEntry {
        id: row.get(0)?,
        mode: row.get(1)?,
        upstream_ref: row.get(2)?,
        baseline: row.get(3)?,
        upstream_head: row.get(4)?,
        merge_status: row.get(5)?,
        dry_run: row.get::<_, i64>(6)? != 0,
        success: row.get::<_, i64>(7)? != 0,
        resolved_count: row.get(8)?,
        manual_count: row.get(9)?,
        error_message: row.get(10)?,
        started_at: row.get(11)?,
        completed_at: row.get(12)?,
    })
}

// ---------------------------------------------------------------------------
// Query implementations
// ---------------------------------------------------------------------------

impl Database {
    // -- merge_runs ---------------------------------------------------------

    /// Record a finished run together with its per-file outcomes.
    pub fn insert_run(&self, report: &MergeReport) -> Result<(), DatabaseError> {
        let files = report
            .files
            .iter()
            .map(|f| Ok((f, serde_json::to_string(&f.regions)?)))
            .collect::<Result<Vec<_>, serde_json::Error>>()?;

        self.transaction(|conn| {
            conn.execute(
                "INSERT INTO merge_runs (id, mode, upstream_ref, baseline, upstream_head,
                     merge_status, dry_run, success, resolved_count, manual_count,
                     error_message, started_at, completed_at)
                 VALUES (?1, ?2, ?3, ?4, ?5, ?6, ?7, ?8, ?9, ?10, NULL, ?11, ?12)",
                params![
                    report.run_id,
                    report.mode.to_string(),
                    report.upstream_ref,
                    report.baseline,
                    report.upstream_head,
                    report.merge_status.to_string(),
                    report.dry_run as i64,
                    report.success() as i64,
                    report.resolved.len() as i64,
                    report.manual.len() as i64,
                    report.started_at.to_rfc3339(),
                    report.completed_at.to_rfc3339(),
                ],
            )?;

            let mut stmt = conn.prepare(
                "INSERT INTO merge_run_files (run_id, path, outcome, detail, regions)
                 VALUES (?1, ?2, ?3, ?4, ?5)",
            )?;
            for (file, regions) in &files {
                stmt.execute(params![
                    report.run_id,
                    file.path,
                    file.outcome.label(),
                    file.outcome.detail(),
                    regions,
                ])?;
            }
            Ok(())
        })?;

        debug!(run_id = %report.run_id, files = files.len(), "recorded merge run");
        Ok(())
    }

    /// Record a run that aborted before producing a report.
    pub fn insert_failed_run(
        &self,
        mode: RunMode,
        upstream_ref: &str,
        baseline: &str,
        dry_run: bool,
        error: &str,
    ) -> Result<String, DatabaseError> {
        let id = uuid::Uuid::new_v4().to_string();
        let now = Utc::now().to_rfc3339();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO merge_runs (id, mode, upstream_ref, baseline, upstream_head,
                 merge_status, dry_run, success, resolved_count, manual_count,
                 error_message, started_at, completed_at)
             VALUES (?1, ?2, ?3, ?4, NULL, 'failed', ?5, 0, 0, 0, ?6, ?7, ?7)",
            params![id, mode.to_string(), upstream_ref, baseline, dry_run as i64, error, now],
        )?;
        debug!(run_id = %id, "recorded failed merge run");
        Ok(id)
    }

    /// Most recent runs first.
    pub fn list_runs(&self, limit: u32) -> Result<Vec<RunEntry>, DatabaseError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM merge_runs ORDER BY started_at DESC, rowid DESC LIMIT ?1",
            RUN_COLUMNS
        ))?;
        let rows = stmt.query_map(params![limit], run_from_row)?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    pub fn get_run(&self, id: &str) -> Result<Option<RunEntry>, DatabaseError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(&format!(
            "SELECT {} FROM merge_runs WHERE id = ?1",
            RUN_COLUMNS
        ))?;
        let mut rows = stmt.query_map(params![id], run_from_row)?;
        match rows.next() {
            Some(Ok(entry)) => Ok(Some(entry)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    pub fn count_runs(&self) -> Result<i64, DatabaseError> {
        let conn = self.lock();
        let count: i64 = conn.query_row("SELECT COUNT(*) FROM merge_runs", [], |row| row.get(0))?;
        Ok(count)
    }

    // -- merge_run_files ----------------------------------------------------

    /// Files of one run, in the order they were triaged.
    pub fn list_run_files(&self, run_id: &str) -> Result<Vec<RunFileEntry>, DatabaseError> {
        let conn = self.lock();
        let mut stmt = conn.prepare(
            "SELECT id, run_id, path, outcome, detail, regions
             FROM merge_run_files WHERE run_id = ?1 ORDER BY id",
        )?;
        let rows = stmt.query_map(params![run_id], |row| {
            Ok(RunFileEntry {
                id: row.get(0)?,
                run_id: row.get(1)?,
                path: row.get(2)?,
                outcome: row.get(3)?,
                detail: row.get(4)?,
                regions: row.get(5)?,
            })
        })?;
        let mut entries = Vec::new();
        for row in rows {
            entries.push(row?);
        }
        Ok(entries)
    }

    // -- kv_state -----------------------------------------------------------

    /// Get a key-value state entry.
    pub fn get_state(&self, key: &str) -> Result<Option<String>, DatabaseError> {
        let conn = self.lock();
        let mut stmt = conn.prepare("SELECT value FROM kv_state WHERE key = ?1")?;
        let mut rows = stmt.query_map(params![key], |row| row.get::<_, String>(0))?;
        match rows.next() {
            Some(Ok(val)) => Ok(Some(val)),
            Some(Err(e)) => Err(e.into()),
            None => Ok(None),
        }
    }

    /// Set a key-value state entry (upsert).
    pub fn set_state(&self, key: &str, value: &str) -> Result<(), DatabaseError> {
        let now = Utc::now().to_rfc3339();
        let conn = self.lock();
        conn.execute(
            "INSERT INTO kv_state (key, value, updated_at) VALUES (?1, ?2, ?3)
             ON CONFLICT(key) DO UPDATE SET value = excluded.value, updated_at = excluded.updated_at",
            params![key, value, now],
        )?;
        debug!(key, value, "set kv_state");
        Ok(())
    }

    /// Upstream head recorded by the last successful merge, if any.
    pub fn get_baseline(&self) -> Result<Option<String>, DatabaseError> {
        Ok(self.get_state(BASELINE_KEY)?.filter(|v| !v.is_empty()))
    }

    pub fn set_baseline(&self, revision: &str) -> Result<(), DatabaseError> {
        self.set_state(BASELINE_KEY, revision)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::conflict::decider::ResolutionVerdict;
    use crate::merge_engine::{FileOutcome, FileReport, MergeStatus, RegionVerdict};

    fn setup_db() -> Database {
        Database::in_memory().unwrap()
    }

    fn sample_report() -> MergeReport {
        let now = Utc::now();
        MergeReport {
            run_id: uuid::Uuid::new_v4().to_string(),
            mode: RunMode::Merge,
            upstream_ref: "upstream/main".into(),
            baseline: "abc123".into(),
            upstream_head: Some("def456".into()),
            upstream_merged: false,
            merge_status: MergeStatus::Conflicted,
            dry_run: false,
            files: vec![
                FileReport {
                    path: "src/a.rs".into(),
                    regions: vec![RegionVerdict {
                        start_line: 3,
                        end_line: 7,
                        verdict: ResolutionVerdict::new(true, false, true),
                    }],
                    outcome: FileOutcome::Resolved,
                },
                FileReport {
                    path: "src/b.rs".into(),
                    regions: Vec::new(),
                    outcome: FileOutcome::Manual {
                        reason: "line 2: upstream changed the file".into(),
                    },
                },
            ],
            resolved: vec!["src/a.rs".into()],
            manual: vec!["src/b.rs".into()],
            started_at: now,
            completed_at: now,
        }
    }

    #[test]
    fn test_insert_and_list_run() {
        let db = setup_db();
        let report = sample_report();
        db.insert_run(&report).unwrap();

        let runs = db.list_runs(10).unwrap();
        assert_eq!(runs.len(), 1);
        let run = &runs[0];
        assert_eq!(run.id, report.run_id);
        assert_eq!(run.mode, "merge");
        assert_eq!(run.merge_status, "conflicted");
        assert_eq!(run.upstream_head.as_deref(), Some("def456"));
        assert!(!run.success);
        assert_eq!(run.resolved_count, 1);
        assert_eq!(run.manual_count, 1);

        let files = db.list_run_files(&report.run_id).unwrap();
        assert_eq!(files.len(), 2);
        assert_eq!(files[0].path, "src/a.rs");
        assert_eq!(files[0].outcome, "resolved");
        assert!(files[0].regions.contains("\"is_custom_marked\":true"));
        assert_eq!(files[1].outcome, "manual");
        assert_eq!(
            files[1].detail.as_deref(),
            Some("line 2: upstream changed the file")
        );
    }

    #[test]
    fn test_failed_run() {
        let db = setup_db();
        let id = db
            .insert_failed_run(RunMode::Merge, "upstream/main", "", false, "fetch failed")
            .unwrap();
        let run = db.get_run(&id).unwrap().unwrap();
        assert_eq!(run.merge_status, "failed");
        assert_eq!(run.error_message.as_deref(), Some("fetch failed"));
        assert!(db.get_run("nope").unwrap().is_none());
        assert_eq!(db.count_runs().unwrap(), 1);
    }

    #[test]
    fn test_list_runs_limit() {
        let db = setup_db();
        for _ in 0..3 {
            db.insert_run(&sample_report()).unwrap();
        }
        assert_eq!(db.list_runs(2).unwrap().len(), 2);
        assert_eq!(db.count_runs().unwrap(), 3);
    }

    #[test]
    fn test_kv_state() {
        let db = setup_db();
        assert!(db.get_state("foo").unwrap().is_none());
        db.set_state("foo", "bar").unwrap();
        assert_eq!(db.get_state("foo").unwrap().as_deref(), Some("bar"));
        db.set_state("foo", "baz").unwrap();
        assert_eq!(db.get_state("foo").unwrap().as_deref(), Some("baz"));
    }

    #[test]
    fn test_baseline_watermark() {
        let db = setup_db();
        assert!(db.get_baseline().unwrap().is_none());
        db.set_baseline("").unwrap();
        assert!(db.get_baseline().unwrap().is_none());
        db.set_baseline("def456").unwrap();
        assert_eq!(db.get_baseline().unwrap().as_deref(), Some("def456"));
    }
}
