//! Version identifiers, release lines, and drift.
//!
//! Comparison here is deliberately not semver: published versions are
//! ordered by numeric comparison of dot-separated segments with a lexical
//! fallback, which matches how the release mirrors name their directories.

use std::cmp::Ordering;

use regex::Regex;
use serde::{Deserialize, Serialize};

/// Both sides of one tracked attribute, e.g. pinned vs latest platform
/// version for a release line.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct VersionPair {
    pub pinned: String,
    pub latest: String,
}

impl VersionPair {
    pub fn drifted(&self) -> bool {
        self.pinned != self.latest
    }
}

/// One tracked minor release stream and the versions observed for it in
/// this run. Built fresh from the fetched snapshot, never persisted.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ReleaseLine {
    /// The minor stream identifier, e.g. "4.9".
    pub line: String,

    /// Platform version pair.
    pub platform: VersionPair,

    /// Companion OS image version pair, when the line tracks one.
    pub os: Option<VersionPair>,
}

impl ReleaseLine {
    /// A line is drifted iff either tracked attribute differs.
    pub fn is_drifted(&self) -> bool {
        self.platform.drifted() || self.os.as_ref().is_some_and(|os| os.drifted())
    }

    pub fn platform_drifted(&self) -> bool {
        self.platform.drifted()
    }

    pub fn os_drifted(&self) -> bool {
        self.os.as_ref().is_some_and(|os| os.drifted())
    }
}

/// The drifted release lines of one run, in document order.
///
/// `forced` marks a dry run, where every line is retained (and patched)
/// regardless of actual drift so the downstream steps get exercised.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DriftSet {
    lines: Vec<ReleaseLine>,
    forced: bool,
}

impl DriftSet {
    pub fn new(lines: Vec<ReleaseLine>, forced: bool) -> Self {
        Self { lines, forced }
    }

    pub fn is_empty(&self) -> bool {
        self.lines.is_empty()
    }

    pub fn forced(&self) -> bool {
        self.forced
    }

    pub fn lines(&self) -> &[ReleaseLine] {
        &self.lines
    }

    pub fn line_names(&self) -> Vec<&str> {
        self.lines.iter().map(|l| l.line.as_str()).collect()
    }
}

// ---------------------------------------------------------------------------
// Ordering and selection
// ---------------------------------------------------------------------------

fn split_segments(version: &str) -> Vec<&str> {
    version.split(['.', '-']).collect()
}

/// Order two version strings by dot/dash segments: numeric comparison when
/// both segments parse as integers, lexical otherwise, shorter first on a
/// shared prefix.
pub fn compare_versions(a: &str, b: &str) -> Ordering {
    let sa = split_segments(a);
    let sb = split_segments(b);
    for (x, y) in sa.iter().zip(sb.iter()) {
        let ord = match (x.parse::<u64>(), y.parse::<u64>()) {
            (Ok(nx), Ok(ny)) => nx.cmp(&ny),
            _ => x.cmp(y),
        };
        if ord != Ordering::Equal {
            return ord;
        }
    }
    sa.len().cmp(&sb.len())
}

/// Candidate builds (`-fc`, `-rc`) are skipped unless a line has published
/// nothing else.
pub fn is_pre_release(version: &str) -> bool {
    version.contains("-fc") || version.contains("-rc")
}

fn belongs_to_line(version: &str, line: &str) -> bool {
    match version.strip_prefix(line) {
        Some(rest) => rest.is_empty() || rest.starts_with('.') || rest.starts_with('-'),
        None => false,
    }
}

/// The newest published version of a release line, preferring GA builds
/// over pre-releases. `None` when the line has published nothing at all.
pub fn latest_in_line(line: &str, available: &[String]) -> Option<String> {
    let mut candidates: Vec<&String> = available
        .iter()
        .filter(|v| belongs_to_line(v, line) && !is_pre_release(v))
        .collect();

    if candidates.is_empty() {
        candidates = available.iter().filter(|v| belongs_to_line(v, line)).collect();
    }

    candidates.sort_by(|a, b| compare_versions(a, b));
    candidates.last().map(|v| (*v).to_string())
}

/// The minor stream of a full version: "4.9.12" -> "4.9".
pub fn minor_of(version: &str) -> &str {
    match version.rsplit_once('.') {
        Some((minor, _)) => minor,
        None => version,
    }
}

// ---------------------------------------------------------------------------
// Identifier extraction
// ---------------------------------------------------------------------------

const RELEASE_IMAGE_PATTERN: &str = r"quay\.io/openshift-release-dev/ocp-release:(.*)-x86_64";

const OS_IMAGE_URL_PATTERN: &str =
    r"https://mirror\.openshift\.com/pub/openshift-v4/dependencies/rhcos/.*/(.*)/.*-x86_64-live\.x86_64\.iso";

const BOOT_PARAMS_BUILD_ID_PATTERN: &str = r"coreos\.liveiso=rhcos-(\S+)";

fn capture_first(pattern: &str, text: &str) -> Option<String> {
    let re = Regex::new(pattern).ok()?;
    re.captures(text).map(|c| c[1].to_string())
}

/// Extract the platform version from a release image reference, with the
/// architecture suffix stripped so both comparison sides share a format.
pub fn version_from_release_image(image: &str) -> Option<String> {
    capture_first(RELEASE_IMAGE_PATTERN, image)
}

/// Extract the OS image version from a live-image URL (the version path
/// segment).
pub fn os_version_from_image_url(url: &str) -> Option<String> {
    capture_first(OS_IMAGE_URL_PATTERN, url)
}

/// Extract the OS build id from the boot parameter file carried inside a
/// live image.
pub fn build_id_from_boot_params(text: &str) -> Option<String> {
    capture_first(BOOT_PARAMS_BUILD_ID_PATTERN, text)
}
