//! Conflict-marker parsing.
//!
//! Scans text produced by `git merge` and extracts every well-formed
//! `<<<<<<<` / `=======` / `>>>>>>>` block as a [`ConflictRegion`].
//! Malformed blocks (a start marker with no separator or end marker after
//! it) are skipped without error.

use std::ops::Range;

use serde::{Deserialize, Serialize};
use tracing::debug;

/// Prefix of the line that opens a conflict block.
pub const CONFLICT_START: &str = "<<<<<<<";
/// Prefix of the diff3 base-section line.
pub const CONFLICT_BASE: &str = "|||||||";
/// Prefix of the line separating the two sides.
pub const CONFLICT_SEPARATOR: &str = "=======";
/// Prefix of the line that closes a conflict block.
pub const CONFLICT_END: &str = ">>>>>>>";

// ---------------------------------------------------------------------------
// Types
// ---------------------------------------------------------------------------

/// One conflict block found in a file. All line indices are zero-based.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConflictRegion {
    /// Line of the `<<<<<<<` marker.
    pub start_line: usize,
    /// Line of the diff3 `|||||||` marker, when the block has a base section.
    pub base_line: Option<usize>,
    /// Line of the `=======` separator.
    pub marker_line: usize,
    /// Line of the `>>>>>>>` marker.
    pub end_line: usize,
    /// First line of the local side.
    pub ours_start: usize,
    /// Last line of the local side (inclusive). Equal to `ours_start - 1`
    /// when the side is empty.
    pub ours_end: usize,
    /// First line of the upstream side.
    pub theirs_start: usize,
    /// Last line of the upstream side (inclusive). Equal to
    /// `theirs_start - 1` when the side is empty.
    pub theirs_end: usize,
    /// Local side, lines joined with `\n`.
    pub ours: String,
    /// Upstream side, lines joined with `\n`.
    pub theirs: String,
}

impl ConflictRegion {
    /// Half-open line range of the local side.
    pub fn ours_range(&self) -> Range<usize> {
        self.ours_start..self.ours_end + 1
    }

    /// Half-open line range of the upstream side.
    pub fn theirs_range(&self) -> Range<usize> {
        self.theirs_start..self.theirs_end + 1
    }

    pub fn ours_is_empty(&self) -> bool {
        self.ours_range().is_empty()
    }

    pub fn theirs_is_empty(&self) -> bool {
        self.theirs_range().is_empty()
    }
}

// ---------------------------------------------------------------------------
// Parser
// ---------------------------------------------------------------------------

/// Split text into lines on `\n`.
///
/// A trailing `\r` stays attached to its line so that joining the result
/// with `\n` reproduces the input exactly, whatever its line endings.
pub fn split_lines(text: &str) -> Vec<&str> {
    text.split('\n').collect()
}

/// Stateless conflict-marker parser.
pub struct ConflictParser;

impl ConflictParser {
    /// Extract all well-formed conflict regions, in file order.
    pub fn parse(text: &str) -> Vec<ConflictRegion> {
        let lines = split_lines(text);
        let mut regions = Vec::new();

        let mut i = 0;
        while i < lines.len() {
            if !lines[i].starts_with(CONFLICT_START) {
                i += 1;
                continue;
            }

            let start_line = i;
            let Some(marker_line) = find_prefix(&lines, start_line + 1, CONFLICT_SEPARATOR) else {
                debug!(line = start_line, "conflict start without separator, skipping");
                i += 1;
                continue;
            };
            let Some(end_line) = find_prefix(&lines, marker_line + 1, CONFLICT_END) else {
                debug!(line = start_line, "conflict start without end marker, skipping");
                i += 1;
                continue;
            };

            let base_line = find_prefix(&lines[..marker_line], start_line + 1, CONFLICT_BASE);
            let ours_start = start_line + 1;
            let ours_end = base_line.unwrap_or(marker_line) - 1;
            let theirs_start = marker_line + 1;
            let theirs_end = end_line - 1;

            regions.push(ConflictRegion {
                start_line,
                base_line,
                marker_line,
                end_line,
                ours_start,
                ours_end,
                theirs_start,
                theirs_end,
                ours: join_side(&lines[ours_start..ours_end + 1]),
                theirs: join_side(&lines[theirs_start..theirs_end + 1]),
            });

            i = end_line + 1;
        }

        debug!(count = regions.len(), "parsed conflict regions");
        regions
    }
}

/// Quick check for at least one conflict start line.
pub fn has_conflict_markers(text: &str) -> bool {
    text.split('\n').any(|l| l.starts_with(CONFLICT_START))
}

/// Index of the first line at or after `from` that starts with `prefix`.
fn find_prefix(lines: &[&str], from: usize, prefix: &str) -> Option<usize> {
    lines
        .iter()
        .enumerate()
        .skip(from)
        .find(|(_, l)| l.starts_with(prefix))
        .map(|(idx, _)| idx)
}

fn join_side(lines: &[&str]) -> String {
    lines
        .iter()
        .map(|l| l.strip_suffix('\r').unwrap_or(l))
        .collect::<Vec<_>>()
        .join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_clean_text_has_no_regions() {
        let text = "fn main() {\n    println!(\"hi\");\n}\n";
        assert!(ConflictParser::parse(text).is_empty());
        assert!(!has_conflict_markers(text));
        assert!(ConflictParser::parse("").is_empty());
    }

    #[test]
    fn test_single_conflict() {
        let text = "a\n<<<<<<< HEAD\nX\n=======\nY\n>>>>>>> up\nb";
        let regions = ConflictParser::parse(text);
        assert_eq!(regions.len(), 1);

        let r = &regions[0];
        assert_eq!((r.start_line, r.marker_line, r.end_line), (1, 3, 5));
        assert_eq!((r.ours_start, r.ours_end), (2, 2));
        assert_eq!((r.theirs_start, r.theirs_end), (4, 4));
        assert_eq!(r.ours, "X");
        assert_eq!(r.theirs, "Y");
        assert_eq!(r.base_line, None);
    }

    #[test]
    fn test_multiple_conflicts_in_order() {
        let text = "\
<<<<<<< HEAD
one
=======
uno
>>>>>>> upstream/main
middle
<<<<<<< HEAD
two
three
=======
dos
>>>>>>> upstream/main
";
        let regions = ConflictParser::parse(text);
        assert_eq!(regions.len(), 2);
        assert!(regions[0].end_line < regions[1].start_line);
        assert_eq!(regions[0].ours, "one");
        assert_eq!(regions[1].ours, "two\nthree");
        assert_eq!(regions[1].theirs, "dos");
    }

    #[test]
    fn test_unterminated_start_is_skipped() {
        let text = "a\n<<<<<<< HEAD\nX\nb\n";
        assert!(ConflictParser::parse(text).is_empty());

        let text = "a\n<<<<<<< HEAD\nX\n=======\nY\n";
        assert!(ConflictParser::parse(text).is_empty());
    }

    #[test]
    fn test_stray_start_before_real_conflict() {
        // The stray start finds the real block's separator and end, so the
        // first well-formed match wins and scanning continues after it.
        let text = "<<<<<<< stray\nx\n<<<<<<< HEAD\nours\n=======\ntheirs\n>>>>>>> up\n";
        let regions = ConflictParser::parse(text);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].start_line, 0);
        assert_eq!(regions[0].end_line, 6);
    }

    #[test]
    fn test_empty_sides() {
        let text = "<<<<<<< HEAD\n=======\n>>>>>>> up";
        let regions = ConflictParser::parse(text);
        assert_eq!(regions.len(), 1);
        let r = &regions[0];
        assert_eq!(r.ours, "");
        assert_eq!(r.theirs, "");
        assert!(r.ours_is_empty());
        assert!(r.theirs_is_empty());
        assert_eq!(r.ours_end + 1, r.ours_start);
    }

    #[test]
    fn test_diff3_base_section_excluded_from_ours() {
        let text = "<<<<<<< HEAD\nmine\n||||||| base\norig\n=======\nyours\n>>>>>>> up\n";
        let regions = ConflictParser::parse(text);
        assert_eq!(regions.len(), 1);
        let r = &regions[0];
        assert_eq!(r.base_line, Some(2));
        assert_eq!(r.ours, "mine");
        assert_eq!(r.theirs, "yours");
        assert_eq!(r.ours_end, 1);
    }

    #[test]
    fn test_crlf_lines_are_trimmed_in_sides() {
        let text = "<<<<<<< HEAD\r\nX\r\n=======\r\nY\r\n>>>>>>> up\r\n";
        let regions = ConflictParser::parse(text);
        assert_eq!(regions.len(), 1);
        assert_eq!(regions[0].ours, "X");
        assert_eq!(regions[0].theirs, "Y");
    }
}
