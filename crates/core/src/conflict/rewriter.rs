//! Conflict rewriting.
//!
//! Resolving a region keeps the local side and drops the marker lines and
//! the upstream side. After all regions are resolved the custom-code marker
//! lines can be stripped as well. The complete new content is built in
//! memory and written with a single atomic replace.

use std::io::Write;
use std::path::Path;

use serde::{Deserialize, Serialize};
use tracing::{debug, info, instrument};

use super::custom::{classify_line, CustomMarkers, MarkerLine};
use super::parser::{split_lines, ConflictParser, ConflictRegion};
use crate::errors::ConflictError;
use crate::run_log::{LogLevel, RunLog};

/// What to do when a custom start marker is never closed.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum UnbalancedMarkerPolicy {
    /// Refuse to rewrite; the file goes to manual resolution.
    #[default]
    Strict,
    /// Drop everything from the unclosed start marker to end of file.
    DropRemainder,
}

impl std::fmt::Display for UnbalancedMarkerPolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Strict => write!(f, "strict"),
            Self::DropRemainder => write!(f, "drop_remainder"),
        }
    }
}

/// Stateless rewriting operations.
pub struct ConflictRewriter;

impl ConflictRewriter {
    /// Replace one conflict block with its local side.
    ///
    /// Output is the lines before `start_line`, the `ours` range, then the
    /// lines after `end_line`. The upstream side, the diff3 base section
    /// and every marker line are discarded.
    pub fn remove_conflict_markers(
        text: &str,
        region: &ConflictRegion,
    ) -> Result<String, ConflictError> {
        let lines = split_lines(text);
        let ours = region.ours_range();
        if region.end_line >= lines.len() || ours.end > region.end_line {
            return Err(ConflictError::RegionOutOfBounds {
                start_line: region.start_line,
                end_line: region.end_line,
                line_count: lines.len(),
            });
        }

        let mut out: Vec<&str> = Vec::with_capacity(lines.len());
        out.extend_from_slice(&lines[..region.start_line]);
        out.extend_from_slice(&lines[ours]);
        out.extend_from_slice(&lines[region.end_line + 1..]);
        Ok(out.join("\n"))
    }

    /// Remove the custom-code marker lines, keeping the code between them.
    ///
    /// A line containing `start` opens a block and a line containing `end`
    /// closes it; both lines are dropped. Overlapping markers are told apart
    /// with [`classify_line`]. Content inside a block is only
    /// emitted once its end marker is seen. A block that is never closed is
    /// handled according to `policy`.
    pub fn remove_custom_code_markers(
        text: &str,
        start: &str,
        end: &str,
        policy: UnbalancedMarkerPolicy,
    ) -> Result<String, ConflictError> {
        if start.is_empty() || end.is_empty() {
            return Ok(text.to_string());
        }

        let mut out: Vec<&str> = Vec::new();
        let mut pending: Vec<&str> = Vec::new();
        let mut open_at: Option<usize> = None;

        for (idx, line) in split_lines(text).into_iter().enumerate() {
            match (open_at, classify_line(line, start, end)) {
                (None, MarkerLine::Start) => open_at = Some(idx),
                // A one-line `start ... end` marker or a stray end.
                (None, MarkerLine::Both | MarkerLine::End) => {}
                (None, MarkerLine::Plain) => out.push(line),
                (Some(_), MarkerLine::Start) => {}
                (Some(_), MarkerLine::End | MarkerLine::Both) => {
                    out.append(&mut pending);
                    open_at = None;
                }
                (Some(_), MarkerLine::Plain) => pending.push(line),
            }
        }

        if let Some(line) = open_at {
            match policy {
                UnbalancedMarkerPolicy::Strict => {
                    return Err(ConflictError::UnbalancedCustomMarkers { line: line + 1 });
                }
                UnbalancedMarkerPolicy::DropRemainder => {
                    debug!(
                        line = line + 1,
                        dropped = pending.len(),
                        "unclosed custom marker, dropping remainder"
                    );
                }
            }
        }

        Ok(out.join("\n"))
    }

    /// Resolve every conflict in `text` in memory.
    ///
    /// Regions are spliced out from the bottom up so the line numbers of the
    /// regions above stay valid. Custom markers are stripped afterwards when
    /// `markers` is given.
    pub fn resolve_content(
        text: &str,
        markers: Option<&CustomMarkers>,
        policy: UnbalancedMarkerPolicy,
    ) -> Result<String, ConflictError> {
        let regions = ConflictParser::parse(text);
        let mut content = text.to_string();
        for region in regions.iter().rev() {
            content = Self::remove_conflict_markers(&content, region)?;
        }
        if let Some(m) = markers {
            content = Self::remove_custom_code_markers(&content, &m.start, &m.end, policy)?;
        }
        Ok(content)
    }

    /// Load, resolve, and write back one file.
    #[instrument(skip(markers))]
    pub fn rewrite_file(
        path: &Path,
        markers: Option<&CustomMarkers>,
        policy: UnbalancedMarkerPolicy,
    ) -> Result<(), ConflictError> {
        let text = read_text(path)?;
        Self::rewrite_text(path, &text, markers, policy)
    }

    /// Resolve already-loaded `text` and write the result to `path`.
    pub fn rewrite_text(
        path: &Path,
        text: &str,
        markers: Option<&CustomMarkers>,
        policy: UnbalancedMarkerPolicy,
    ) -> Result<(), ConflictError> {
        let resolved = Self::resolve_content(text, markers, policy)?;
        write_atomically(path, &resolved)?;
        info!(path = %path.display(), "conflicts resolved in place");
        Ok(())
    }

    /// [`rewrite_file`](Self::rewrite_file) reporting failures to `log`
    /// instead of returning them.
    pub fn resolve_all_conflicts_in_file(
        path: &Path,
        markers: Option<&CustomMarkers>,
        policy: UnbalancedMarkerPolicy,
        log: &mut RunLog,
    ) -> bool {
        let display = path.display().to_string();
        match Self::rewrite_file(path, markers, policy) {
            Ok(()) => {
                log.file(LogLevel::Info, &display, "conflicts resolved");
                true
            }
            Err(e) => {
                log.file(LogLevel::Error, &display, format!("could not resolve conflicts: {}", e));
                false
            }
        }
    }
}

/// Read a file as UTF-8 text.
pub fn read_text(path: &Path) -> Result<String, ConflictError> {
    let bytes = std::fs::read(path).map_err(|source| ConflictError::FileIo {
        path: path.display().to_string(),
        source,
    })?;
    String::from_utf8(bytes).map_err(|_| ConflictError::NotUtf8(path.display().to_string()))
}

/// Replace `path` with `content` via a sibling temporary file, keeping the
/// original permissions.
fn write_atomically(path: &Path, content: &str) -> Result<(), ConflictError> {
    let io_err = |source: std::io::Error| ConflictError::FileIo {
        path: path.display().to_string(),
        source,
    };

    let parent = match path.parent() {
        Some(p) if !p.as_os_str().is_empty() => p,
        _ => Path::new("."),
    };
    let permissions = std::fs::metadata(path).map_err(io_err)?.permissions();

    let mut tmp = tempfile::NamedTempFile::new_in(parent).map_err(io_err)?;
    tmp.write_all(content.as_bytes()).map_err(io_err)?;
    tmp.as_file().sync_all().map_err(io_err)?;
    tmp.as_file().set_permissions(permissions).map_err(io_err)?;
    tmp.persist(path).map_err(|e| io_err(e.error))?;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn markers() -> CustomMarkers {
        CustomMarkers::new("// CUSTOM-START", "// CUSTOM-END")
    }

    #[test]
    fn test_remove_single_conflict() {
        let text = "a\n<<<<<<< HEAD\nX\n=======\nY\n>>>>>>> up\nb";
        let region = &ConflictParser::parse(text)[0];
        let out = ConflictRewriter::remove_conflict_markers(text, region).unwrap();
        assert_eq!(out, "a\nX\nb");
    }

    #[test]
    fn test_remove_conflict_with_empty_ours() {
        let text = "a\n<<<<<<< HEAD\n=======\nY\n>>>>>>> up\nb\n";
        let region = &ConflictParser::parse(text)[0];
        let out = ConflictRewriter::remove_conflict_markers(text, region).unwrap();
        assert_eq!(out, "a\nb\n");
    }

    #[test]
    fn test_remove_diff3_conflict_drops_base() {
        let text = "<<<<<<< HEAD\nmine\n||||||| base\norig\n=======\nyours\n>>>>>>> up\ntail";
        let region = &ConflictParser::parse(text)[0];
        let out = ConflictRewriter::remove_conflict_markers(text, region).unwrap();
        assert_eq!(out, "mine\ntail");
    }

    #[test]
    fn test_remove_out_of_bounds_region() {
        let text = "a\n<<<<<<< HEAD\nX\n=======\nY\n>>>>>>> up\nb";
        let mut region = ConflictParser::parse(text)[0].clone();
        region.end_line = 42;
        assert!(matches!(
            ConflictRewriter::remove_conflict_markers(text, &region),
            Err(ConflictError::RegionOutOfBounds { .. })
        ));
    }

    #[test]
    fn test_strip_balanced_markers() {
        let text = "keep1\n// CUSTOM-START\n  custom();\n  more();\n// CUSTOM-END\nkeep2\n";
        let out =
            ConflictRewriter::remove_custom_code_markers(text, "// CUSTOM-START", "// CUSTOM-END", UnbalancedMarkerPolicy::Strict)
                .unwrap();
        assert_eq!(out, "keep1\n  custom();\n  more();\nkeep2\n");
    }

    #[test]
    fn test_strip_multiple_blocks_and_stray_end() {
        let text = "// CUSTOM-START\na\n// CUSTOM-END\nb\n// CUSTOM-END\n// CUSTOM-START\nc\n// CUSTOM-END";
        let out = ConflictRewriter::remove_custom_code_markers(
            text,
            "// CUSTOM-START",
            "// CUSTOM-END",
            UnbalancedMarkerPolicy::Strict,
        )
        .unwrap();
        assert_eq!(out, "a\nb\nc");
    }

    #[test]
    fn test_unbalanced_markers_strict() {
        let text = "a\n// CUSTOM-START\nb\nc\n";
        let result = ConflictRewriter::remove_custom_code_markers(
            text,
            "// CUSTOM-START",
            "// CUSTOM-END",
            UnbalancedMarkerPolicy::Strict,
        );
        assert!(matches!(
            result,
            Err(ConflictError::UnbalancedCustomMarkers { line: 2 })
        ));
    }

    #[test]
    fn test_unbalanced_markers_drop_remainder() {
        let text = "a\n// CUSTOM-START\nb\nc\n";
        let out = ConflictRewriter::remove_custom_code_markers(
            text,
            "// CUSTOM-START",
            "// CUSTOM-END",
            UnbalancedMarkerPolicy::DropRemainder,
        )
        .unwrap();
        assert_eq!(out, "a");
    }

    #[test]
    fn test_strip_markers_where_end_contains_start() {
        let text = "a\n// CUSTOM\nmine();\n// CUSTOM END\nb\n";
        for policy in [UnbalancedMarkerPolicy::Strict, UnbalancedMarkerPolicy::DropRemainder] {
            let out = ConflictRewriter::remove_custom_code_markers(
                text,
                "// CUSTOM",
                "// CUSTOM END",
                policy,
            )
            .unwrap();
            assert_eq!(out, "a\nmine();\nb\n", "policy {}", policy);
        }
    }

    #[test]
    fn test_strip_one_line_marker_closes_open_block() {
        let text = "// S\nx();\n// S y(); // E\nz();\n";
        let out = ConflictRewriter::remove_custom_code_markers(
            text,
            "// S",
            "// E",
            UnbalancedMarkerPolicy::Strict,
        )
        .unwrap();
        assert_eq!(out, "x();\nz();\n");
    }

    #[test]
    fn test_resolve_content_multiple_regions() {
        let text = "\
head
// CUSTOM-START
<<<<<<< HEAD
ours one
=======
theirs one
>>>>>>> upstream/main
// CUSTOM-END
middle
<<<<<<< HEAD
// CUSTOM-START
ours two
// CUSTOM-END
=======
theirs two
>>>>>>> upstream/main
tail
";
        let out = ConflictRewriter::resolve_content(text, Some(&markers()), UnbalancedMarkerPolicy::Strict)
            .unwrap();
        assert_eq!(out, "head\nours one\nmiddle\nours two\ntail\n");

        let kept = ConflictRewriter::resolve_content(text, None, UnbalancedMarkerPolicy::Strict).unwrap();
        assert!(kept.contains("// CUSTOM-START"));
        assert!(!kept.contains("<<<<<<<"));
        assert!(!kept.contains("theirs"));
    }

    #[test]
    fn test_resolve_content_preserves_crlf() {
        let text = "a\r\n<<<<<<< HEAD\r\nX\r\n=======\r\nY\r\n>>>>>>> up\r\nb\r\n";
        let out = ConflictRewriter::resolve_content(text, None, UnbalancedMarkerPolicy::Strict).unwrap();
        assert_eq!(out, "a\r\nX\r\nb\r\n");
    }

    #[test]
    fn test_rewrite_file_in_place() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("lib.rs");
        std::fs::write(
            &path,
            "// CUSTOM-START\n<<<<<<< HEAD\nmine();\n=======\ntheirs();\n>>>>>>> up\n// CUSTOM-END\n",
        )
        .unwrap();

        let mut log = RunLog::new();
        assert!(ConflictRewriter::resolve_all_conflicts_in_file(
            &path,
            Some(&markers()),
            UnbalancedMarkerPolicy::Strict,
            &mut log,
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "mine();\n");
        assert_eq!(log.len(), 1);
    }

    #[cfg(unix)]
    #[test]
    fn test_rewrite_file_keeps_permissions() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("run.sh");
        std::fs::write(&path, "<<<<<<< HEAD\necho mine\n=======\necho theirs\n>>>>>>> up\n").unwrap();
        std::fs::set_permissions(&path, std::fs::Permissions::from_mode(0o755)).unwrap();

        ConflictRewriter::rewrite_file(&path, None, UnbalancedMarkerPolicy::Strict).unwrap();
        let mode = std::fs::metadata(&path).unwrap().permissions().mode();
        assert_eq!(mode & 0o777, 0o755);
        assert_eq!(std::fs::read_to_string(&path).unwrap(), "echo mine\n");
    }

    #[test]
    fn test_failed_rewrite_leaves_file_untouched() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("broken.rs");
        let original = "<<<<<<< HEAD\n// CUSTOM-START\nmine();\n=======\ntheirs();\n>>>>>>> up\n";
        std::fs::write(&path, original).unwrap();

        let mut log = RunLog::new();
        assert!(!ConflictRewriter::resolve_all_conflicts_in_file(
            &path,
            Some(&markers()),
            UnbalancedMarkerPolicy::Strict,
            &mut log,
        ));
        assert_eq!(std::fs::read_to_string(&path).unwrap(), original);
        assert_eq!(log.at_least(LogLevel::Error).count(), 1);
    }

    #[test]
    fn test_missing_file_reports_failure() {
        let dir = tempfile::tempdir().unwrap();
        let mut log = RunLog::new();
        assert!(!ConflictRewriter::resolve_all_conflicts_in_file(
            &dir.path().join("nope.rs"),
            None,
            UnbalancedMarkerPolicy::Strict,
            &mut log,
        ));
    }
}
