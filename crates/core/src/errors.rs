//! Error types for the forkmerge core library.
//!
//! Each subsystem has its own error type derived with `thiserror`. Fatal
//! run errors wrap gateway errors through [`MergeError::GitError`].

use thiserror::Error;

// ---------------------------------------------------------------------------
// Git errors
// ---------------------------------------------------------------------------

/// Errors from the version-control gateway.
#[derive(Debug, Error)]
pub enum GitError {
    /// The `git` binary was not found on `$PATH`.
    #[error("git binary not found: {0}")]
    BinaryNotFound(String),

    /// A `git` command exited with a non-zero status.
    #[error("git {command} failed (exit {exit_code}): {stderr}")]
    CommandFailed {
        command: String,
        exit_code: i32,
        stderr: String,
    },

    /// A revision could not be resolved.
    #[error("git revision not found: {0}")]
    RevisionNotFound(String),

    /// A `git2` library error.
    #[error("git2 error: {0}")]
    Git2Error(#[from] git2::Error),

    /// Generic I/O wrapper.
    #[error("git I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Conflict errors
// ---------------------------------------------------------------------------

/// Errors from conflict parsing and rewriting.
#[derive(Debug, Error)]
pub enum ConflictError {
    /// A conflicted file could not be read or written.
    #[error("conflict file I/O error at '{path}': {source}")]
    FileIo {
        path: String,
        #[source]
        source: std::io::Error,
    },

    /// The file is not valid UTF-8 and cannot be rewritten line by line.
    #[error("file '{0}' is not valid UTF-8")]
    NotUtf8(String),

    /// A custom-code start marker was never closed.
    #[error("unbalanced custom code markers: start marker on line {line} is never closed")]
    UnbalancedCustomMarkers { line: usize },

    /// A region's line indices do not fit the text it was parsed from.
    #[error("conflict region {start_line}..={end_line} is outside a text of {line_count} lines")]
    RegionOutOfBounds {
        start_line: usize,
        end_line: usize,
        line_count: usize,
    },
}

// ---------------------------------------------------------------------------
// Merge orchestration errors
// ---------------------------------------------------------------------------

/// Fatal errors that abort an entire merge run.
#[derive(Debug, Error)]
pub enum MergeError {
    /// The working directory is not a git repository.
    #[error("not a git repository: {0}")]
    NotARepository(String),

    /// Tracked files have uncommitted changes.
    #[error("working tree has uncommitted changes on branch '{branch}'")]
    DirtyWorkingTree { branch: String },

    /// Fetching the upstream remote failed.
    #[error("fetch from '{remote}' failed: {detail}")]
    FetchFailed { remote: String, detail: String },

    /// The merge ended in a state other than clean or conflicted.
    #[error("merge of '{upstream}' failed: {detail}")]
    MergeFailed { upstream: String, detail: String },

    /// Underlying gateway error during a fatal step.
    #[error("merge git error: {0}")]
    GitError(#[from] GitError),
}

// ---------------------------------------------------------------------------
// Configuration errors
// ---------------------------------------------------------------------------

/// Errors from configuration loading and validation.
#[derive(Debug, Error)]
pub enum ConfigError {
    /// Config file not found.
    #[error("configuration file not found: {0}")]
    FileNotFound(String),

    /// TOML parse error.
    #[error("configuration parse error: {0}")]
    ParseError(String),

    /// A config value is invalid.
    #[error("invalid configuration value for '{field}': {detail}")]
    InvalidValue { field: String, detail: String },

    /// Generic I/O error reading the config file.
    #[error("configuration I/O error: {0}")]
    IoError(#[from] std::io::Error),
}

// ---------------------------------------------------------------------------
// Database errors
// ---------------------------------------------------------------------------

/// Errors from the SQLite run-history store.
#[derive(Debug, Error)]
pub enum DatabaseError {
    /// Underlying rusqlite error.
    #[error("database error: {0}")]
    SqliteError(#[from] rusqlite::Error),

    /// A migration failed.
    #[error("database migration failed (version {version}): {detail}")]
    MigrationFailed { version: u32, detail: String },

    /// A record could not be serialized for storage.
    #[error("database serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    /// Generic I/O error (e.g. file permissions).
    #[error("database I/O error: {0}")]
    IoError(#[from] std::io::Error),
}
