//! Per-run log collector.
//!
//! A [`RunLog`] is created by the caller for each run and passed by mutable
//! reference to every stage that wants to leave a user-visible trace. Each
//! entry is also forwarded to `tracing`, so the collector adds a report view
//! on top of normal logging rather than replacing it. Recording an entry
//! never fails.

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{debug, error, info, warn};

/// Severity of a run-log entry.
#[derive(Debug, Clone, Copy, Serialize, Deserialize, PartialEq, Eq, PartialOrd, Ord)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    Debug,
    Info,
    Warn,
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// A single collected log line.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogEntry {
    /// RFC 3339 timestamp.
    pub timestamp: String,
    pub level: LogLevel,
    pub message: String,
    /// Repository-relative path the entry is about, if any.
    pub file: Option<String>,
}

/// Collector for the log entries of one run.
#[derive(Debug, Default, Clone, Serialize, Deserialize)]
pub struct RunLog {
    entries: Vec<LogEntry>,
}

impl RunLog {
    pub fn new() -> Self {
        Self::default()
    }

    /// Record an entry and forward it to `tracing`.
    pub fn record(&mut self, level: LogLevel, file: Option<&str>, message: impl Into<String>) {
        let message = message.into();
        match (level, file) {
            (LogLevel::Debug, Some(f)) => debug!(file = f, "{}", message),
            (LogLevel::Debug, None) => debug!("{}", message),
            (LogLevel::Info, Some(f)) => info!(file = f, "{}", message),
            (LogLevel::Info, None) => info!("{}", message),
            (LogLevel::Warn, Some(f)) => warn!(file = f, "{}", message),
            (LogLevel::Warn, None) => warn!("{}", message),
            (LogLevel::Error, Some(f)) => error!(file = f, "{}", message),
            (LogLevel::Error, None) => error!("{}", message),
        }
        self.entries.push(LogEntry {
            timestamp: Utc::now().to_rfc3339(),
            level,
            message,
            file: file.map(str::to_string),
        });
    }

    pub fn debug(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Debug, None, message);
    }

    pub fn info(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Info, None, message);
    }

    pub fn warn(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Warn, None, message);
    }

    pub fn error(&mut self, message: impl Into<String>) {
        self.record(LogLevel::Error, None, message);
    }

    /// Record an entry about a specific file.
    pub fn file(&mut self, level: LogLevel, path: &str, message: impl Into<String>) {
        self.record(level, Some(path), message);
    }

    pub fn entries(&self) -> &[LogEntry] {
        &self.entries
    }

    /// Entries at or above `level`.
    pub fn at_least(&self, level: LogLevel) -> impl Iterator<Item = &LogEntry> {
        self.entries.iter().filter(move |e| e.level >= level)
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }
}
