//! Version-control gateway.
//!
//! [`VersionControlGateway`] is the seam between the merge engine and git.
//! [`GitCli`] implements it by spawning the `git` binary, the same way the
//! working tree would be driven by hand, and uses `git2` only for the
//! read-only repository status check.

use std::path::{Path, PathBuf};
use std::process::Stdio;

use git2::{Repository, StatusOptions};
use serde::{Deserialize, Serialize};
use tokio::process::Command;
use tracing::{debug, info, instrument, warn};

use crate::errors::GitError;

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// Raw result of one `git` invocation.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CommandOutput {
    pub exit_code: i32,
    pub stdout: String,
    pub stderr: String,
}

impl CommandOutput {
    pub fn success(&self) -> bool {
        self.exit_code == 0
    }
}

/// Result of merging the upstream branch into the current branch.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct MergeOutcome {
    /// The merge completed without conflicts.
    pub success: bool,
    /// Repository-relative paths left in a conflicted state.
    pub conflict_files: Vec<String>,
    /// Error text when the merge failed for a reason other than conflicts.
    pub error: Option<String>,
}

/// Repository preconditions checked before a run.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct RepoStatus {
    pub is_repository: bool,
    /// Tracked files differ from HEAD (untracked files are ignored).
    pub is_dirty: bool,
    /// Short name of the checked-out branch; `None` when detached or unborn.
    pub current_branch: Option<String>,
}

/// Operations the merge engine needs from version control.
#[allow(async_fn_in_trait)]
pub trait VersionControlGateway {
    /// Root of the working tree; conflicted paths are relative to it.
    fn repo_root(&self) -> &Path;

    async fn fetch(&self, remote: &str) -> Result<(), GitError>;

    async fn merge(&self, remote: &str, branch: &str) -> Result<MergeOutcome, GitError>;

    /// Diff of `path` between two revisions. Empty means unchanged.
    async fn diff(&self, from_rev: &str, to_rev: &str, path: &str) -> Result<String, GitError>;

    async fn stage(&self, path: &str) -> Result<(), GitError>;

    async fn status(&self) -> Result<RepoStatus, GitError>;

    /// Resolve a revision to a full commit SHA.
    async fn rev_parse(&self, rev: &str) -> Result<String, GitError>;

    /// Paths git currently reports as unmerged.
    async fn conflicted_files(&self) -> Result<Vec<String>, GitError>;

    /// Whether `ancestor` is reachable from `descendant`.
    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, GitError>;
}

// ---------------------------------------------------------------------------
// git CLI implementation
// ---------------------------------------------------------------------------

/// Gateway backed by the `git` command-line tool.
#[derive(Debug, Clone)]
pub struct GitCli {
    repo_root: PathBuf,
}

impl GitCli {
    /// Create a gateway for the repository containing `path`.
    ///
    /// When `path` is inside a working tree the gateway is rooted at the
    /// top of that tree. Otherwise it keeps `path` as given and
    /// [`status`](VersionControlGateway::status) reports that there is no
    /// repository.
    pub fn new<P: AsRef<Path>>(path: P) -> Self {
        let path = path.as_ref();
        let repo_root = Repository::discover(path)
            .ok()
            .and_then(|repo| repo.workdir().map(Path::to_path_buf))
            .unwrap_or_else(|| path.to_path_buf());
        info!(root = %repo_root.display(), "created git gateway");
        Self { repo_root }
    }

    /// Run `git` in the repository root and capture its output.
    async fn run_git(&self, args: &[&str]) -> Result<CommandOutput, GitError> {
        let mut cmd = Command::new("git");
        cmd.current_dir(&self.repo_root)
            .args(args)
            .env("GIT_TERMINAL_PROMPT", "0")
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped());

        debug!(cmd = ?format!("git {}", args.join(" ")), "running git command");
        let output = cmd.output().await.map_err(|e| {
            if e.kind() == std::io::ErrorKind::NotFound {
                GitError::BinaryNotFound("git".into())
            } else {
                GitError::IoError(e)
            }
        })?;

        Ok(CommandOutput {
            exit_code: output.status.code().unwrap_or(-1),
            stdout: String::from_utf8_lossy(&output.stdout).to_string(),
            stderr: String::from_utf8_lossy(&output.stderr).to_string(),
        })
    }

    /// Like [`run_git`](Self::run_git) but a non-zero exit is an error.
    async fn run_git_checked(&self, args: &[&str]) -> Result<String, GitError> {
        let output = self.run_git(args).await?;
        if !output.success() {
            warn!(exit_code = output.exit_code, stderr = %output.stderr, "git command failed");
            return Err(GitError::CommandFailed {
                command: args.first().copied().unwrap_or("").to_string(),
                exit_code: output.exit_code,
                stderr: output.stderr.trim().to_string(),
            });
        }
        Ok(output.stdout)
    }
}

impl VersionControlGateway for GitCli {
    fn repo_root(&self) -> &Path {
        &self.repo_root
    }

    #[instrument(skip(self))]
    async fn fetch(&self, remote: &str) -> Result<(), GitError> {
        info!(remote, "fetching");
        self.run_git_checked(&["fetch", "--no-tags", remote]).await?;
        debug!("fetch completed");
        Ok(())
    }

    #[instrument(skip(self))]
    async fn merge(&self, remote: &str, branch: &str) -> Result<MergeOutcome, GitError> {
        let upstream = format!("{}/{}", remote, branch);
        info!(%upstream, "merging");
        // Force the two-section marker style; the parser and rewriter
        // expect it even when the user has diff3 configured.
        let output = self
            .run_git(&["-c", "merge.conflictStyle=merge", "merge", "--no-edit", &upstream])
            .await?;

        if output.success() {
            info!("merge completed cleanly");
            return Ok(MergeOutcome {
                success: true,
                ..Default::default()
            });
        }

        let conflict_files = if output.exit_code == 1 {
            self.conflicted_files().await?
        } else {
            Vec::new()
        };

        if conflict_files.is_empty() {
            let detail = if output.stderr.trim().is_empty() {
                output.stdout.trim().to_string()
            } else {
                output.stderr.trim().to_string()
            };
            warn!(exit_code = output.exit_code, %detail, "merge failed without conflicts");
            return Ok(MergeOutcome {
                success: false,
                conflict_files,
                error: Some(detail),
            });
        }

        info!(count = conflict_files.len(), "merge stopped with conflicts");
        Ok(MergeOutcome {
            success: false,
            conflict_files,
            error: None,
        })
    }

    #[instrument(skip(self))]
    async fn diff(&self, from_rev: &str, to_rev: &str, path: &str) -> Result<String, GitError> {
        if from_rev.trim().is_empty() {
            return Err(GitError::RevisionNotFound("<empty baseline>".into()));
        }
        if to_rev.trim().is_empty() {
            return Err(GitError::RevisionNotFound("<empty upstream head>".into()));
        }
        self.run_git_checked(&["diff", "--no-color", from_rev, to_rev, "--", path])
            .await
    }

    #[instrument(skip(self))]
    async fn stage(&self, path: &str) -> Result<(), GitError> {
        self.run_git_checked(&["add", "--", path]).await?;
        debug!(path, "staged");
        Ok(())
    }

    async fn status(&self) -> Result<RepoStatus, GitError> {
        let repo = match Repository::open(&self.repo_root) {
            Ok(repo) => repo,
            Err(e) if e.code() == git2::ErrorCode::NotFound => {
                debug!(root = %self.repo_root.display(), "no repository found");
                return Ok(RepoStatus::default());
            }
            Err(e) => return Err(GitError::Git2Error(e)),
        };

        let mut opts = StatusOptions::new();
        opts.include_untracked(false).include_ignored(false);
        let is_dirty = !repo.statuses(Some(&mut opts))?.is_empty();

        let current_branch = match repo.head() {
            Ok(head) if head.is_branch() => head.shorthand().map(str::to_string),
            _ => None,
        };

        Ok(RepoStatus {
            is_repository: true,
            is_dirty,
            current_branch,
        })
    }

    async fn rev_parse(&self, rev: &str) -> Result<String, GitError> {
        let spec = format!("{}^{{commit}}", rev);
        let output = self.run_git(&["rev-parse", "--verify", "--quiet", &spec]).await?;
        if !output.success() {
            return Err(GitError::RevisionNotFound(rev.to_string()));
        }
        Ok(output.stdout.trim().to_string())
    }

    async fn conflicted_files(&self) -> Result<Vec<String>, GitError> {
        let stdout = self
            .run_git_checked(&["diff", "--name-only", "-z", "--diff-filter=U"])
            .await?;
        let mut files: Vec<String> = Vec::new();
        for name in stdout.split('\0').filter(|s| !s.is_empty()) {
            if !files.iter().any(|f| f == name) {
                files.push(name.to_string());
            }
        }
        Ok(files)
    }

    async fn is_ancestor(&self, ancestor: &str, descendant: &str) -> Result<bool, GitError> {
        let output = self
            .run_git(&["merge-base", "--is-ancestor", ancestor, descendant])
            .await?;
        match output.exit_code {
            0 => Ok(true),
            1 => Ok(false),
            code => Err(GitError::CommandFailed {
                command: "merge-base".into(),
                exit_code: code,
                stderr: output.stderr.trim().to_string(),
            }),
        }
    }
}
