//! Git access for forkmerge.

pub mod gateway;

#[cfg(test)]
pub(crate) mod mock;

pub use gateway::{CommandOutput, GitCli, MergeOutcome, RepoStatus, VersionControlGateway};
