//! Upstream change detection.
//!
//! Answers "did upstream touch this file since the last merge?" by diffing
//! the file between the recorded baseline and the new upstream head. Any
//! failure answers "yes", which keeps the file out of auto-resolution.

use std::collections::HashMap;

use tracing::debug;

use crate::git::VersionControlGateway;
use crate::run_log::{LogLevel, RunLog};

/// Whether upstream modified `path` between `from_rev` and `to_rev`.
pub async fn upstream_changed<G: VersionControlGateway>(
    gateway: &G,
    path: &str,
    from_rev: &str,
    to_rev: &str,
    log: &mut RunLog,
) -> bool {
    match gateway.diff(from_rev, to_rev, path).await {
        Ok(diff) => {
            let changed = !diff.trim().is_empty();
            debug!(path, changed, "upstream diff checked");
            changed
        }
        Err(e) => {
            log.file(
                LogLevel::Warn,
                path,
                format!("could not diff against upstream, assuming it changed: {}", e),
            );
            true
        }
    }
}

/// Per-run oracle that remembers the answer for each path.
pub struct UpstreamChangeOracle<'a, G> {
    gateway: &'a G,
    from_rev: String,
    to_rev: String,
    answers: HashMap<String, bool>,
}

impl<'a, G: VersionControlGateway> UpstreamChangeOracle<'a, G> {
    pub fn new(gateway: &'a G, from_rev: impl Into<String>, to_rev: impl Into<String>) -> Self {
        Self {
            gateway,
            from_rev: from_rev.into(),
            to_rev: to_rev.into(),
            answers: HashMap::new(),
        }
    }

    pub fn from_rev(&self) -> &str {
        &self.from_rev
    }

    pub fn to_rev(&self) -> &str {
        &self.to_rev
    }

    pub async fn changed(&mut self, path: &str, log: &mut RunLog) -> bool {
        if let Some(&answer) = self.answers.get(path) {
            return answer;
        }
        let answer = upstream_changed(self.gateway, path, &self.from_rev, &self.to_rev, log).await;
        self.answers.insert(path.to_string(), answer);
        answer
    }
}
