//! In-memory gateway used by unit tests.

use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::Mutex;

use super::gateway::{MergeOutcome, RepoStatus, VersionControlGateway};
use crate::errors::GitError;

pub struct MockGateway {
    pub root: PathBuf,
    pub status: RepoStatus,
    pub fetch_error: Option<String>,
    pub merge_outcome: MergeOutcome,
    /// Per-path diff text; `Err` simulates a failing `git diff`.
    pub diffs: HashMap<String, Result<String, String>>,
    pub heads: HashMap<String, String>,
    pub conflicted: Vec<String>,
    pub stage_error: Option<String>,
    pub staged: Mutex<Vec<String>>,
    pub diff_calls: Mutex<Vec<(String, String, String)>>,
    pub merge_called: Mutex<bool>,
}

impl MockGateway {
    pub fn new(root: &Path) -> Self {
        Self {
            root: root.to_path_buf(),
            status: RepoStatus {
                is_repository: true,
                is_dirty: false,
                current_branch: Some("main".into()),
            },
            fetch_error: None,
            merge_outcome: MergeOutcome {
                success: true,
                ..Default::default()
            },
            diffs: HashMap::new(),
            heads: HashMap::from([("upstream/main".to_string(), "f00dcafe".to_string())]),
            conflicted: Vec::new(),
            stage_error: None,
            staged: Mutex::new(Vec::new()),
            diff_calls: Mutex::new(Vec::new()),
            merge_called: Mutex::new(false),
        }
    }

    pub fn with_conflicts(mut self, files: &[&str]) -> Self {
        let files: Vec<String> = files.iter().map(|f| f.to_string()).collect();
        self.merge_outcome = MergeOutcome {
            success: false,
            conflict_files: files.clone(),
            error: None,
        };
        self.conflicted = files;
        self
    }

    pub fn with_diff(mut self, path: &str, diff: &str) -> Self {
        self.diffs.insert(path.to_string(), Ok(diff.to_string()));
        self
    }

    pub fn with_diff_error(mut self, path: &str, error: &str) -> Self {
        self.diffs.insert(path.to_string(), Err(error.to_string()));
        self
    }

    pub fn staged(&self) -> Vec<String> {
        self.staged.lock().unwrap().clone()
    }

    pub fn diff_call_count(&self) -> usize {
        self.diff_calls.lock().unwrap().len()
    }
}

impl VersionControlGateway for MockGateway {
    fn repo_root(&self) -> &Path {
        &self.root
    }

    async fn fetch(&self, remote: &str) -> Result<(), GitError> {
        match &self.fetch_error {
            Some(msg) => Err(GitError::CommandFailed {
                command: format!("fetch {}", remote),
                exit_code: 128,
                stderr: msg.clone(),
            }),
            None => Ok(()),
        }
    }

    async fn merge(&self, _remote: &str, _branch: &str) -> Result<MergeOutcome, GitError> {
        *self.merge_called.lock().unwrap() = true;
        Ok(self.merge_outcome.clone())
    }

    async fn diff(&self, from_rev: &str, to_rev: &str, path: &str) -> Result<String, GitError> {
        self.diff_calls
            .lock()
            .unwrap()
            .push((from_rev.to_string(), to_rev.to_string(), path.to_string()));
        if from_rev.is_empty() {
            return Err(GitError::RevisionNotFound("<empty baseline>".into()));
        }
        match self.diffs.get(path) {
            Some(Ok(diff)) => Ok(diff.clone()),
            Some(Err(msg)) => Err(GitError::CommandFailed {
                command: "diff".into(),
                exit_code: 128,
                stderr: msg.clone(),
            }),
            None => Ok(String::new()),
        }
    }

    async fn stage(&self, path: &str) -> Result<(), GitError> {
        if let Some(msg) = &self.stage_error {
            return Err(GitError::CommandFailed {
                command: "add".into(),
                exit_code: 128,
                stderr: msg.clone(),
            });
        }
        self.staged.lock().unwrap().push(path.to_string());
        Ok(())
    }

    async fn status(&self) -> Result<RepoStatus, GitError> {
        Ok(self.status.clone())
    }

    async fn rev_parse(&self, rev: &str) -> Result<String, GitError> {
        self.heads
            .get(rev)
            .cloned()
            .ok_or_else(|| GitError::RevisionNotFound(rev.to_string()))
    }

    async fn conflicted_files(&self) -> Result<Vec<String>, GitError> {
        Ok(self.conflicted.clone())
    }

    /// Upstream is only part of `HEAD` after a merge that committed itself.
    async fn is_ancestor(&self, _ancestor: &str, _descendant: &str) -> Result<bool, GitError> {
        Ok(*self.merge_called.lock().unwrap() && self.merge_outcome.success)
    }
}
