//! Custom-code marker detection.
//!
//! A fork protects its local changes by wrapping them in a pair of literal
//! marker lines (for example `// CUSTOM-CODE-START` / `// CUSTOM-CODE-END`).
//! A conflict counts as custom when a start marker appears shortly before
//! its local side and an end marker shortly after.

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use super::parser::{split_lines, ConflictRegion};
use crate::errors::ConflictError;

/// Default number of lines searched on each side of a conflict.
pub const DEFAULT_SEARCH_WINDOW: usize = 5;

/// The literal marker pair plus the detector window.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct CustomMarkers {
    /// Substring identifying the line that opens a custom block.
    pub start: String,
    /// Substring identifying the line that closes a custom block.
    pub end: String,
    /// How far (in lines) to look before `ours_start` and after `ours_end`.
    #[serde(default = "default_search_window")]
    pub search_window: usize,
}

fn default_search_window() -> usize {
    DEFAULT_SEARCH_WINDOW
}

impl CustomMarkers {
    pub fn new(start: impl Into<String>, end: impl Into<String>) -> Self {
        Self {
            start: start.into(),
            end: end.into(),
            search_window: DEFAULT_SEARCH_WINDOW,
        }
    }

    pub fn with_window(mut self, search_window: usize) -> Self {
        self.search_window = search_window;
        self
    }
}

/// Role of a single line with respect to a marker pair.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum MarkerLine {
    Start,
    End,
    /// Both markers on one line, e.g. `/* START */ x(); /* END */`.
    Both,
    Plain,
}

impl MarkerLine {
    pub fn opens(self) -> bool {
        matches!(self, Self::Start | Self::Both)
    }

    pub fn closes(self) -> bool {
        matches!(self, Self::End | Self::Both)
    }
}

/// Classify `line` against the `start`/`end` markers.
///
/// When one marker contains the other (`// CUSTOM` and `// CUSTOM END`),
/// a line matching both is taken to be the longer marker.
pub fn classify_line(line: &str, start: &str, end: &str) -> MarkerLine {
    match (line.contains(start), line.contains(end)) {
        (true, true) if end.len() > start.len() && end.contains(start) => MarkerLine::End,
        (true, true) if start.len() > end.len() && start.contains(end) => MarkerLine::Start,
        (true, true) => MarkerLine::Both,
        (true, false) => MarkerLine::Start,
        (false, true) => MarkerLine::End,
        (false, false) => MarkerLine::Plain,
    }
}

/// Stateless detector for custom-marked conflict regions.
pub struct CustomRegionDetector;

impl CustomRegionDetector {
    /// Whether `region` is bracketed by the custom markers.
    ///
    /// Looks at lines `ours_start - window ..= ours_start` for the start
    /// marker and `ours_end ..= ours_end + window` for the end marker, both
    /// clamped to the text. Any failure counts as "not marked".
    pub fn is_marked_as_custom(text: &str, region: &ConflictRegion, markers: &CustomMarkers) -> bool {
        match Self::check(text, region, markers) {
            Ok(marked) => marked,
            Err(e) => {
                warn!(error = %e, start_line = region.start_line, "custom marker check failed");
                false
            }
        }
    }

    /// Fallible form of [`is_marked_as_custom`](Self::is_marked_as_custom).
    pub fn check(
        text: &str,
        region: &ConflictRegion,
        markers: &CustomMarkers,
    ) -> Result<bool, ConflictError> {
        if markers.start.is_empty() || markers.end.is_empty() {
            return Ok(false);
        }

        let lines = split_lines(text);
        if region.end_line >= lines.len() || region.ours_start >= lines.len() {
            return Err(ConflictError::RegionOutOfBounds {
                start_line: region.start_line,
                end_line: region.end_line,
                line_count: lines.len(),
            });
        }

        let window = markers.search_window;
        let before_from = region.ours_start.saturating_sub(window);
        let classify = |l: &&str| classify_line(l, &markers.start, &markers.end);
        let has_start = lines[before_from..=region.ours_start]
            .iter()
            .any(|l| classify(l).opens());

        let after_to = (region.ours_end + window).min(lines.len() - 1);
        let has_end = lines[region.ours_end..=after_to]
            .iter()
            .any(|l| classify(l).closes());

        debug!(
            start_line = region.start_line,
            has_start, has_end, "custom marker check"
        );
        Ok(has_start && has_end)
    }
}
