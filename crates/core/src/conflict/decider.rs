//! The auto-resolution rule.

use serde::{Deserialize, Serialize};

/// The three signals evaluated for one conflict region.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ResolutionVerdict {
    pub conflict_exists: bool,
    pub upstream_changed: bool,
    pub is_custom_marked: bool,
}

impl ResolutionVerdict {
    pub fn new(conflict_exists: bool, upstream_changed: bool, is_custom_marked: bool) -> Self {
        Self {
            conflict_exists,
            upstream_changed,
            is_custom_marked,
        }
    }

    pub fn auto_resolvable(&self) -> bool {
        AutoResolutionDecider::can_auto_resolve(
            self.conflict_exists,
            self.upstream_changed,
            self.is_custom_marked,
        )
    }

    /// Short explanation of why the region needs a human, if it does.
    pub fn blocker(&self) -> Option<&'static str> {
        if !self.conflict_exists {
            Some("no conflict")
        } else if self.upstream_changed {
            Some("upstream changed the file")
        } else if !self.is_custom_marked {
            Some("not inside custom code markers")
        } else {
            None
        }
    }
}

/// Stateless decider.
pub struct AutoResolutionDecider;

impl AutoResolutionDecider {
    /// A conflict may be resolved automatically only when upstream left the
    /// file alone and the local side is explicitly marked as custom.
    pub fn can_auto_resolve(
        conflict_exists: bool,
        upstream_changed: bool,
        is_custom_marked: bool,
    ) -> bool {
        conflict_exists && !upstream_changed && is_custom_marked
    }

    /// A file qualifies only if every one of its regions does.
    pub fn file_resolvable(verdicts: &[ResolutionVerdict]) -> bool {
        verdicts.iter().all(ResolutionVerdict::auto_resolvable)
    }
}
