//! Merge orchestration.
//!
//! A run walks `Preflight -> Fetch -> Merge -> PerFileResolution -> Report`.
//! Preflight, fetch and merge failures abort the run with a [`MergeError`].
//! Everything after the merge is file-scoped: a problem with one file sends
//! that file to the manual list and the run moves on to the next one.

use std::path::Path;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use tracing::{debug, info, warn};

use crate::config::ForkConfig;
use crate::conflict::custom::{CustomMarkers, CustomRegionDetector};
use crate::conflict::decider::{AutoResolutionDecider, ResolutionVerdict};
use crate::conflict::oracle::UpstreamChangeOracle;
use crate::conflict::parser::{has_conflict_markers, ConflictParser};
use crate::conflict::rewriter::{read_text, ConflictRewriter, UnbalancedMarkerPolicy};
use crate::errors::{GitError, MergeError};
use crate::git::VersionControlGateway;
use crate::run_log::{LogLevel, RunLog};

// ---------------------------------------------------------------------------
// Report types
// ---------------------------------------------------------------------------

/// Which entry point produced a report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RunMode {
    /// Fetch, merge, then triage conflicts.
    Merge,
    /// Triage the files git currently reports as unmerged.
    Resolve,
}

impl std::fmt::Display for RunMode {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Merge => write!(f, "merge"),
            Self::Resolve => write!(f, "resolve"),
        }
    }
}

/// Result of the `git merge` step.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum MergeStatus {
    Clean,
    Conflicted,
    /// No merge was attempted (resolve mode).
    Skipped,
}

impl std::fmt::Display for MergeStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Clean => write!(f, "clean"),
            Self::Conflicted => write!(f, "conflicted"),
            Self::Skipped => write!(f, "skipped"),
        }
    }
}

/// What happened to one conflicted file.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum FileOutcome {
    /// Rewritten in place and staged.
    Resolved,
    /// No conflict regions left in the file; staged as-is.
    AlreadyResolved,
    /// Dry run: every region qualifies, nothing was written.
    WouldResolve,
    /// At least one region needs a human; file left untouched.
    Manual { reason: String },
    /// The file could not be processed.
    Failed { error: String },
}

impl FileOutcome {
    pub fn is_resolved(&self) -> bool {
        matches!(
            self,
            Self::Resolved | Self::AlreadyResolved | Self::WouldResolve
        )
    }

    /// Short label for tables and the history database.
    pub fn label(&self) -> &'static str {
        match self {
            Self::Resolved => "resolved",
            Self::AlreadyResolved => "already_resolved",
            Self::WouldResolve => "would_resolve",
            Self::Manual { .. } => "manual",
            Self::Failed { .. } => "failed",
        }
    }

    pub fn detail(&self) -> Option<&str> {
        match self {
            Self::Manual { reason } => Some(reason),
            Self::Failed { error } => Some(error),
            _ => None,
        }
    }
}

/// Verdict for one conflict region, addressed by its marker lines.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RegionVerdict {
    pub start_line: usize,
    pub end_line: usize,
    pub verdict: ResolutionVerdict,
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct FileReport {
    pub path: String,
    pub regions: Vec<RegionVerdict>,
    pub outcome: FileOutcome,
}

/// Summary of a single orchestrator run.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MergeReport {
    pub run_id: String,
    pub mode: RunMode,
    pub upstream_ref: String,
    /// Revision the oracle diffed from.
    pub baseline: String,
    /// Resolved `<remote>/<branch>` commit, when it could be determined.
    pub upstream_head: Option<String>,
    /// `upstream_head` is an ancestor of `HEAD`, i.e. the merge is committed.
    pub upstream_merged: bool,
    pub merge_status: MergeStatus,
    pub dry_run: bool,
    pub files: Vec<FileReport>,
    pub resolved: Vec<String>,
    pub manual: Vec<String>,
    pub started_at: DateTime<Utc>,
    pub completed_at: DateTime<Utc>,
}

impl MergeReport {
    fn new(mode: RunMode, options: &MergeOptions) -> Self {
        let now = Utc::now();
        Self {
            run_id: uuid::Uuid::new_v4().to_string(),
            mode,
            upstream_ref: options.upstream_ref(),
            baseline: options.baseline.clone(),
            upstream_head: None,
            upstream_merged: false,
            merge_status: MergeStatus::Skipped,
            dry_run: options.dry_run,
            files: Vec::new(),
            resolved: Vec::new(),
            manual: Vec::new(),
            started_at: now,
            completed_at: now,
        }
    }

    /// True when nothing is left for a human.
    pub fn success(&self) -> bool {
        self.manual.is_empty()
    }

    fn push(&mut self, file: FileReport) {
        if file.outcome.is_resolved() {
            self.resolved.push(file.path.clone());
        } else {
            self.manual.push(file.path.clone());
        }
        self.files.push(file);
    }
}

// ---------------------------------------------------------------------------
// Options
// ---------------------------------------------------------------------------

/// Everything a run needs that does not come from the gateway.
#[derive(Debug, Clone)]
pub struct MergeOptions {
    pub remote: String,
    pub branch: String,
    /// Upstream revision merged last time; empty disables auto-resolution.
    pub baseline: String,
    /// Markers used to decide whether a region is custom code.
    pub markers: CustomMarkers,
    /// Markers removed from resolved files, if any.
    pub strip_markers: Option<CustomMarkers>,
    pub unbalanced: UnbalancedMarkerPolicy,
    pub allow_dirty: bool,
    pub dry_run: bool,
}

impl MergeOptions {
    pub fn from_config(config: &ForkConfig) -> Self {
        Self {
            remote: config.upstream_repository_name.clone(),
            branch: config.upstream_branch_name.clone(),
            baseline: config.last_merged_upstream_commit.clone(),
            markers: config.custom_code_marker.markers(),
            strip_markers: config.strip_markers(),
            unbalanced: config.custom_code_marker.unbalanced,
            allow_dirty: config.merge.allow_dirty,
            dry_run: false,
        }
    }

    pub fn with_baseline(mut self, baseline: impl Into<String>) -> Self {
        self.baseline = baseline.into();
        self
    }

    pub fn with_dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn upstream_ref(&self) -> String {
        format!("{}/{}", self.remote, self.branch)
    }
}

// ---------------------------------------------------------------------------
// Orchestrator
// ---------------------------------------------------------------------------

/// Drives one merge of upstream into the fork.
pub struct MergeOrchestrator<G> {
    gateway: G,
    options: MergeOptions,
}

impl<G: VersionControlGateway> MergeOrchestrator<G> {
    pub fn new(gateway: G, options: MergeOptions) -> Self {
        Self { gateway, options }
    }

    pub fn gateway(&self) -> &G {
        &self.gateway
    }

    pub fn options(&self) -> &MergeOptions {
        &self.options
    }

    /// Fetch and merge upstream, then auto-resolve what qualifies.
    pub async fn run(&self, log: &mut RunLog) -> Result<MergeReport, MergeError> {
        let mut report = MergeReport::new(RunMode::Merge, &self.options);
        let remote = &self.options.remote;
        let branch = &self.options.branch;

        self.preflight(log).await?;

        // Fetch
        log.info(format!("fetching {}", remote));
        self.gateway
            .fetch(remote)
            .await
            .map_err(|e| MergeError::FetchFailed {
                remote: remote.clone(),
                detail: e.to_string(),
            })?;

        let upstream_ref = self.options.upstream_ref();
        report.upstream_head = match self.gateway.rev_parse(&upstream_ref).await {
            Ok(head) => Some(head),
            Err(e) => {
                log.warn(format!("could not resolve {}: {}", upstream_ref, e));
                None
            }
        };

        // Merge
        log.info(format!("merging {}", upstream_ref));
        let outcome = self
            .gateway
            .merge(remote, branch)
            .await
            .map_err(|e| MergeError::MergeFailed {
                upstream: upstream_ref.clone(),
                detail: e.to_string(),
            })?;

        if outcome.success {
            log.info("merge completed without conflicts");
            report.merge_status = MergeStatus::Clean;
        } else if !outcome.conflict_files.is_empty() {
            log.warn(format!(
                "merge stopped with {} conflicted file(s)",
                outcome.conflict_files.len()
            ));
            report.merge_status = MergeStatus::Conflicted;
            self.resolve_files(&outcome.conflict_files, &mut report, log)
                .await;
        } else {
            let detail = outcome
                .error
                .unwrap_or_else(|| "merge failed without conflicts".to_string());
            log.error(format!("merge of {} failed: {}", upstream_ref, detail));
            return Err(MergeError::MergeFailed {
                upstream: upstream_ref,
                detail,
            });
        }

        report.upstream_merged = self.upstream_merged(&report).await;
        self.finish(&mut report, log);
        Ok(report)
    }

    /// Triage the files git currently reports as unmerged, without fetching
    /// or merging.
    pub async fn resolve_conflicts(&self, log: &mut RunLog) -> Result<MergeReport, MergeError> {
        let mut report = MergeReport::new(RunMode::Resolve, &self.options);

        let status = self.gateway.status().await?;
        if !status.is_repository {
            return Err(MergeError::NotARepository(
                self.gateway.repo_root().display().to_string(),
            ));
        }

        // The oracle must diff against what is actually being merged.
        report.upstream_head = match self.gateway.rev_parse("MERGE_HEAD").await {
            Ok(head) => Some(head),
            Err(_) => {
                let upstream_ref = self.options.upstream_ref();
                debug!(%upstream_ref, "no merge in progress, using upstream ref");
                self.gateway.rev_parse(&upstream_ref).await.ok()
            }
        };

        let files = self.gateway.conflicted_files().await?;
        if files.is_empty() {
            log.info("no unmerged files");
        } else {
            self.resolve_files(&files, &mut report, log).await;
        }

        report.upstream_merged = self.upstream_merged(&report).await;
        self.finish(&mut report, log);
        Ok(report)
    }

    // -----------------------------------------------------------------------
    // Steps
    // -----------------------------------------------------------------------

    async fn preflight(&self, log: &mut RunLog) -> Result<(), MergeError> {
        let root = self.gateway.repo_root().display().to_string();
        let status = self.gateway.status().await?;

        if !status.is_repository {
            log.error(format!("{} is not a git repository", root));
            return Err(MergeError::NotARepository(root));
        }

        let branch = status
            .current_branch
            .clone()
            .unwrap_or_else(|| "HEAD".to_string());
        if status.is_dirty {
            if !self.options.allow_dirty {
                log.error(format!("working tree on {} has uncommitted changes", branch));
                return Err(MergeError::DirtyWorkingTree { branch });
            }
            log.warn(format!("merging into {} with uncommitted changes", branch));
        }

        debug!(root = %root, branch = %branch, "preflight passed");
        Ok(())
    }

    async fn resolve_files(&self, files: &[String], report: &mut MergeReport, log: &mut RunLog) {
        let to_rev = report.upstream_head.clone().unwrap_or_default();
        let mut oracle = UpstreamChangeOracle::new(&self.gateway, &self.options.baseline, to_rev);

        if self.options.baseline.is_empty() {
            log.warn("no baseline revision recorded, every conflict needs manual resolution");
        }

        for path in files {
            let file = self.triage_file(path, &mut oracle, log).await;
            match &file.outcome {
                FileOutcome::Manual { reason } => {
                    log.file(LogLevel::Warn, path, format!("manual resolution required: {}", reason))
                }
                FileOutcome::Failed { error } => log.file(LogLevel::Error, path, error.clone()),
                other => log.file(LogLevel::Info, path, other.label()),
            }
            report.push(file);
        }
    }

    async fn triage_file(
        &self,
        path: &str,
        oracle: &mut UpstreamChangeOracle<'_, G>,
        log: &mut RunLog,
    ) -> FileReport {
        let mut file = FileReport {
            path: path.to_string(),
            regions: Vec::new(),
            outcome: FileOutcome::Manual {
                reason: String::new(),
            },
        };

        let full_path = self.gateway.repo_root().join(path);
        let text = match read_text(&full_path) {
            Ok(text) => text,
            Err(e) => {
                file.outcome = FileOutcome::Failed {
                    error: e.to_string(),
                };
                return file;
            }
        };

        let regions = ConflictParser::parse(&text);
        if regions.is_empty() && has_conflict_markers(&text) {
            file.outcome = FileOutcome::Manual {
                reason: "conflict markers could not be parsed".into(),
            };
            return file;
        }
        if regions.is_empty() {
            debug!(path, "no conflict markers left");
            file.outcome = match self.stage(path).await {
                Ok(()) => FileOutcome::AlreadyResolved,
                Err(e) => FileOutcome::Failed {
                    error: e.to_string(),
                },
            };
            return file;
        }

        for region in &regions {
            let upstream_changed = oracle.changed(path, log).await;
            let is_custom_marked =
                CustomRegionDetector::is_marked_as_custom(&text, region, &self.options.markers);
            let verdict = ResolutionVerdict::new(true, upstream_changed, is_custom_marked);
            debug!(
                path,
                start_line = region.start_line,
                upstream_changed,
                is_custom_marked,
                "region triaged"
            );
            file.regions.push(RegionVerdict {
                start_line: region.start_line,
                end_line: region.end_line,
                verdict,
            });
        }

        let verdicts: Vec<ResolutionVerdict> = file.regions.iter().map(|r| r.verdict).collect();
        if !AutoResolutionDecider::file_resolvable(&verdicts) {
            let reason = file
                .regions
                .iter()
                .find_map(|r| {
                    r.verdict
                        .blocker()
                        .map(|b| format!("line {}: {}", r.start_line + 1, b))
                })
                .unwrap_or_default();
            file.outcome = FileOutcome::Manual { reason };
            return file;
        }

        file.outcome = self.apply(path, &full_path, &text).await;
        file
    }

    /// Rewrite and stage a file whose regions all qualify.
    async fn apply(&self, path: &str, full_path: &Path, text: &str) -> FileOutcome {
        let markers = self.options.strip_markers.as_ref();
        let policy = self.options.unbalanced;

        if self.options.dry_run {
            return match ConflictRewriter::resolve_content(text, markers, policy) {
                Ok(_) => FileOutcome::WouldResolve,
                Err(e) => FileOutcome::Failed {
                    error: e.to_string(),
                },
            };
        }

        if let Err(e) = ConflictRewriter::rewrite_text(full_path, text, markers, policy) {
            return FileOutcome::Failed {
                error: e.to_string(),
            };
        }
        match self.gateway.stage(path).await {
            Ok(()) => FileOutcome::Resolved,
            Err(e) => FileOutcome::Failed {
                error: format!("rewritten but not staged: {}", e),
            },
        }
    }

    async fn stage(&self, path: &str) -> Result<(), GitError> {
        if self.options.dry_run {
            return Ok(());
        }
        self.gateway.stage(path).await
    }

    /// True once the upstream head is reachable from `HEAD`. A conflicted
    /// merge that was resolved and staged but not committed is not merged.
    async fn upstream_merged(&self, report: &MergeReport) -> bool {
        let Some(head) = report.upstream_head.as_deref() else {
            return false;
        };
        match self.gateway.is_ancestor(head, "HEAD").await {
            Ok(merged) => merged,
            Err(e) => {
                warn!(error = %e, "could not check whether upstream is merged");
                false
            }
        }
    }

    fn finish(&self, report: &mut MergeReport, log: &mut RunLog) {
        report.completed_at = Utc::now();
        if report.success() {
            info!(
                run_id = %report.run_id,
                resolved = report.resolved.len(),
                "run completed"
            );
        } else {
            warn!(
                run_id = %report.run_id,
                resolved = report.resolved.len(),
                manual = report.manual.len(),
                "run completed with files needing manual resolution"
            );
        }
        log.info(format!(
            "{} resolved, {} manual",
            report.resolved.len(),
            report.manual.len()
        ));
    }
}
