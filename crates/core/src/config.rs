//! TOML-based configuration for forkmerge.
//!
//! The config names the upstream to merge from, the revision last merged
//! (the baseline for upstream-change detection), and the literal marker
//! pair that fences custom code in the fork.

use std::path::{Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::{debug, info};

use crate::conflict::custom::{CustomMarkers, DEFAULT_SEARCH_WINDOW};
use crate::conflict::rewriter::UnbalancedMarkerPolicy;
use crate::errors::ConfigError;

// ---------------------------------------------------------------------------
// Top-level config
// ---------------------------------------------------------------------------

/// Top-level configuration loaded from a TOML file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ForkConfig {
    /// Working tree of the fork (default `.`).
    #[serde(default = "default_repository_path")]
    pub repository_path: PathBuf,

    /// Name of the git remote pointing at upstream.
    pub upstream_repository_name: String,

    /// Upstream branch to merge.
    pub upstream_branch_name: String,

    /// Upstream revision merged last time. Empty means unknown, in which
    /// case every conflict is treated as upstream-changed.
    #[serde(default)]
    pub last_merged_upstream_commit: String,

    /// Custom-code marker settings.
    pub custom_code_marker: CustomCodeMarkerConfig,

    /// Merge behaviour.
    #[serde(default)]
    pub merge: MergeSettings,

    /// Logging settings.
    #[serde(default)]
    pub logging: LoggingConfig,

    /// Run-history storage.
    #[serde(default)]
    pub state: StateConfig,
}

fn default_repository_path() -> PathBuf {
    PathBuf::from(".")
}

// ---------------------------------------------------------------------------
// Custom code markers
// ---------------------------------------------------------------------------

/// Marker pair fencing custom code, plus how they are handled.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CustomCodeMarkerConfig {
    /// Literal substring of the line opening a custom block.
    pub start: String,

    /// Literal substring of the line closing a custom block.
    pub end: String,

    /// Lines searched before and after a conflict's local side (default 5).
    #[serde(default = "default_search_window")]
    pub search_window: usize,

    /// Remove the marker lines from resolved files (default true).
    #[serde(default = "default_true")]
    pub strip_markers: bool,

    /// Handling of a start marker that is never closed.
    #[serde(default)]
    pub unbalanced: UnbalancedMarkerPolicy,
}

fn default_search_window() -> usize {
    DEFAULT_SEARCH_WINDOW
}

fn default_true() -> bool {
    true
}

impl CustomCodeMarkerConfig {
    /// The marker pair and window used by the detector.
    pub fn markers(&self) -> CustomMarkers {
        CustomMarkers::new(&self.start, &self.end).with_window(self.search_window)
    }
}

// ---------------------------------------------------------------------------
// Merge
// ---------------------------------------------------------------------------

/// Merge behaviour settings.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct MergeSettings {
    /// Proceed even when tracked files have uncommitted changes.
    #[serde(default)]
    pub allow_dirty: bool,
}

// ---------------------------------------------------------------------------
// Logging
// ---------------------------------------------------------------------------

/// Logging configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LoggingConfig {
    /// Minimum tracing level: trace, debug, info, warn, error.
    #[serde(default = "default_log_level")]
    pub level: String,

    /// Optional log file; written in addition to stderr.
    #[serde(default)]
    pub file: Option<PathBuf>,
}

fn default_log_level() -> String {
    "info".into()
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
            file: None,
        }
    }
}

// ---------------------------------------------------------------------------
// State
// ---------------------------------------------------------------------------

/// Where run history and the baseline watermark are kept.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StateConfig {
    /// Directory for the history database. Relative paths are resolved
    /// against `repository_path`.
    #[serde(default = "default_data_dir")]
    pub data_dir: PathBuf,

    /// Record runs and advance the baseline after successful merges.
    #[serde(default = "default_true")]
    pub record_history: bool,
}

fn default_data_dir() -> PathBuf {
    PathBuf::from(".forkmerge")
}

impl Default for StateConfig {
    fn default() -> Self {
        Self {
            data_dir: default_data_dir(),
            record_history: true,
        }
    }
}

// ---------------------------------------------------------------------------
// Loading & validation
// ---------------------------------------------------------------------------

impl ForkConfig {
    /// Load a [`ForkConfig`] from a TOML file at the given path.
    pub fn load_from_file<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let path = path.as_ref();
        info!(path = %path.display(), "loading configuration");

        if !path.exists() {
            return Err(ConfigError::FileNotFound(path.display().to_string()));
        }

        let contents = std::fs::read_to_string(path)?;
        let config: ForkConfig =
            toml::from_str(&contents).map_err(|e| ConfigError::ParseError(e.to_string()))?;

        debug!("configuration parsed successfully");
        Ok(config)
    }

    /// Validate that all required fields are present and sane.
    pub fn validate(&self) -> Result<(), ConfigError> {
        if self.upstream_repository_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "upstream_repository_name".into(),
                detail: "upstream remote name must not be empty".into(),
            });
        }
        if self.upstream_branch_name.trim().is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "upstream_branch_name".into(),
                detail: "upstream branch name must not be empty".into(),
            });
        }
        if self.custom_code_marker.start.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "custom_code_marker.start".into(),
                detail: "start marker must not be empty".into(),
            });
        }
        if self.custom_code_marker.end.is_empty() {
            return Err(ConfigError::InvalidValue {
                field: "custom_code_marker.end".into(),
                detail: "end marker must not be empty".into(),
            });
        }
        if self.custom_code_marker.start == self.custom_code_marker.end {
            return Err(ConfigError::InvalidValue {
                field: "custom_code_marker.end".into(),
                detail: "end marker must differ from the start marker".into(),
            });
        }
        if self.custom_code_marker.search_window == 0 {
            return Err(ConfigError::InvalidValue {
                field: "custom_code_marker.search_window".into(),
                detail: "search window must be > 0".into(),
            });
        }

        Ok(())
    }

    /// Convenience: load and validate in one call.
    pub fn load_and_validate<P: AsRef<Path>>(path: P) -> Result<Self, ConfigError> {
        let config = Self::load_from_file(path)?;
        config.validate()?;
        Ok(config)
    }

    /// `<remote>/<branch>` as git names the fetched upstream branch.
    pub fn upstream_ref(&self) -> String {
        format!(
            "{}/{}",
            self.upstream_repository_name, self.upstream_branch_name
        )
    }

    /// Absolute-or-relative path of the history database directory.
    pub fn data_dir(&self) -> PathBuf {
        if self.state.data_dir.is_absolute() {
            self.state.data_dir.clone()
        } else {
            self.repository_path.join(&self.state.data_dir)
        }
    }

    /// Markers handed to the rewriter for stripping, if enabled.
    pub fn strip_markers(&self) -> Option<CustomMarkers> {
        self.custom_code_marker
            .strip_markers
            .then(|| self.custom_code_marker.markers())
    }
}

/// Starter configuration written by `forkmerge init`.
pub const DEFAULT_CONFIG_TOML: &str = r#"# forkmerge configuration

# Working tree of the fork.
repository_path = "."

# Remote and branch to merge from.
upstream_repository_name = "upstream"
upstream_branch_name = "main"

# Upstream commit merged last time. Conflicts are only auto-resolved in
# files upstream has not changed since this revision. After each fully
# successful run the new upstream head is recorded in the history database
# and used instead.
last_merged_upstream_commit = ""

[custom_code_marker]
start = "// CUSTOM-CODE-START"
end = "// CUSTOM-CODE-END"
search_window = 5
strip_markers = true
# "strict" refuses files with an unclosed start marker;
# "drop_remainder" drops everything after it.
unbalanced = "strict"

[merge]
allow_dirty = false

[logging]
level = "info"
# file = "forkmerge.log"

[state]
data_dir = ".forkmerge"
record_history = true
"#;
