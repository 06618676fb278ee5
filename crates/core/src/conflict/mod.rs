//! Conflict classification and auto-resolution.
//!
//! The conflict subsystem is responsible for:
//! 1. **Parsing** -- finding conflict-marker blocks in merged files.
//! 2. **Classification** -- deciding per block whether it is custom code
//!    that upstream left alone.
//! 3. **Rewriting** -- replacing resolvable blocks with the local side.

pub mod custom;
pub mod decider;
pub mod oracle;
pub mod parser;
pub mod rewriter;

pub use custom::{CustomMarkers, CustomRegionDetector};
pub use decider::{AutoResolutionDecider, ResolutionVerdict};
pub use oracle::UpstreamChangeOracle;
pub use parser::{ConflictParser, ConflictRegion};
pub use rewriter::{ConflictRewriter, UnbalancedMarkerPolicy};
