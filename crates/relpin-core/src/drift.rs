//! Drift detection over a fetched snapshot.

use tracing::info;

use crate::version::{DriftSet, ReleaseLine};

/// Compares pinned against latest per tracked attribute. Pure equality,
/// no normalization: both sides must already share a format (architecture
/// suffixes stripped, same segment layout) or false drift is reported.
#[derive(Debug, Clone, Copy)]
pub struct DriftDetector {
    force: bool,
}

impl DriftDetector {
    /// `force` retains every candidate line regardless of drift; dry runs
    /// use it so the patch steps get exercised on current data.
    pub fn new(force: bool) -> Self {
        Self { force }
    }

    /// Exact string comparison of one attribute pair.
    pub fn detect(&self, latest: &str, pinned: &str) -> bool {
        latest != pinned
    }

    /// Reduce candidate lines to the drifted ones, in input order.
    pub fn compute(&self, candidates: Vec<ReleaseLine>) -> DriftSet {
        let lines: Vec<ReleaseLine> = candidates
            .into_iter()
            .filter(|line| self.force || line.is_drifted())
            .collect();

        for line in &lines {
            info!(
                line = %line.line,
                pinned = %line.platform.pinned,
                latest = %line.platform.latest,
                forced = self.force,
                "release line retained for update"
            );
        }

        DriftSet::new(lines, self.force)
    }
}
