//! forkmerge core library.
//!
//! Merges an upstream branch into a fork and resolves the conflicts that
//! fall inside custom-code marker blocks, provided upstream did not touch
//! the file since the previous merge. Everything else is left for a human.

pub mod config;
pub mod conflict;
pub mod db;
pub mod errors;
pub mod git;
pub mod merge_engine;
pub mod run_log;

// Re-exports for convenience.
pub use config::ForkConfig;
pub use db::Database;
pub use git::{GitCli, VersionControlGateway};
pub use merge_engine::{MergeOptions, MergeOrchestrator, MergeReport};
pub use run_log::RunLog;
