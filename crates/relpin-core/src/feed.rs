//! Upstream version documents: the release indexes, the release text
//! document, and the pinned version map.
//!
//! Network retrieval sits behind [`VersionSource`] so the pipeline can be
//! driven by fakes; the parsers here are pure and shared with the
//! production adapter.

use async_trait::async_trait;
use regex::Regex;
use serde::de::{MapAccess, Visitor};
use serde::ser::SerializeMap;
use serde::{Deserialize, Deserializer, Serialize, Serializer};
use serde_json::Value;

use crate::error::Result;

/// Retrieval of the remote version documents.
#[async_trait]
pub trait VersionSource: Send + Sync {
    /// The single newest generally-available platform version.
    async fn latest_release(&self) -> Result<String>;

    /// Every published platform version, from the release index.
    async fn available_releases(&self) -> Result<Vec<String>>;

    /// Every published OS image version for one release line.
    async fn available_os_images(&self, line: &str) -> Result<Vec<String>>;

    /// The currently pinned version map.
    async fn pinned(&self) -> Result<PinnedDocument>;

    /// The build id embedded in the published OS live image.
    async fn os_build_id(&self, line: &str, os_version: &str) -> Result<String>;
}

// ---------------------------------------------------------------------------
// Pinned version map
// ---------------------------------------------------------------------------

/// One release line's entry in the pinned version map.
///
/// Fields the pipeline does not understand are carried in `extra` so a
/// rewrite never drops them.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PinnedEntry {
    pub display_name: String,
    pub release_image: String,
    pub rhcos_image: String,
    pub rhcos_version: String,
    #[serde(flatten)]
    pub extra: serde_json::Map<String, Value>,
}

impl PinnedEntry {
    /// The pinned platform version of this entry.
    pub fn pinned_platform(&self) -> &str {
        &self.display_name
    }

    /// The pinned OS image version, extracted from the live-image URL.
    pub fn pinned_os(&self) -> Option<String> {
        crate::version::os_version_from_image_url(&self.rhcos_image)
    }

    /// Rewrite the platform fields to a new version.
    pub fn bump_platform(&mut self, latest: &str) {
        let old = std::mem::replace(&mut self.display_name, latest.to_string());
        self.release_image = self.release_image.replace(&old, latest);
    }

    /// Rewrite the OS image fields to a new version and build id.
    pub fn bump_os(&mut self, old_os: &str, new_os: &str, build_id: &str) {
        self.rhcos_image = self.rhcos_image.replace(old_os, new_os);
        self.rhcos_version = build_id.to_string();
    }
}

/// The pinned version map, keyed by release line in document order.
///
/// Order is preserved through a rewrite: release lines sort neither
/// lexically ("4.10" < "4.6") nor reliably numerically, so the document's
/// own order is the only one that round-trips.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct PinnedDocument {
    entries: Vec<(String, PinnedEntry)>,
}

impl PinnedDocument {
    pub fn from_json(text: &str) -> serde_json::Result<Self> {
        serde_json::from_str(text)
    }

    /// Serialize with the 8-space indentation the version map is kept in.
    pub fn to_json_indented(&self) -> Result<String> {
        let mut buf = Vec::new();
        let formatter = serde_json::ser::PrettyFormatter::with_indent(b"        ");
        let mut ser = serde_json::Serializer::with_formatter(&mut buf, formatter);
        self.serialize(&mut ser)?;
        Ok(String::from_utf8_lossy(&buf).into_owned())
    }

    pub fn lines(&self) -> impl Iterator<Item = &str> {
        self.entries.iter().map(|(line, _)| line.as_str())
    }

    pub fn get(&self, line: &str) -> Option<&PinnedEntry> {
        self.entries
            .iter()
            .find(|(l, _)| l == line)
            .map(|(_, e)| e)
    }

    pub fn get_mut(&mut self, line: &str) -> Option<&mut PinnedEntry> {
        self.entries
            .iter_mut()
            .find(|(l, _)| l == line)
            .map(|(_, e)| e)
    }

    pub fn entries(&self) -> &[(String, PinnedEntry)] {
        &self.entries
    }
}

impl Serialize for PinnedDocument {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        let mut map = serializer.serialize_map(Some(self.entries.len()))?;
        for (line, entry) in &self.entries {
            map.serialize_entry(line, entry)?;
        }
        map.end()
    }
}

impl<'de> Deserialize<'de> for PinnedDocument {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        struct DocVisitor;

        impl<'de> Visitor<'de> for DocVisitor {
            type Value = PinnedDocument;

            fn expecting(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
                f.write_str("a map of release line to pinned entry")
            }

            fn visit_map<A: MapAccess<'de>>(
                self,
                mut access: A,
            ) -> std::result::Result<Self::Value, A::Error> {
                let mut entries = Vec::new();
                while let Some((line, entry)) = access.next_entry::<String, PinnedEntry>()? {
                    entries.push((line, entry));
                }
                Ok(PinnedDocument { entries })
            }
        }

        deserializer.deserialize_map(DocVisitor)
    }
}

// ---------------------------------------------------------------------------
// Upstream document parsers
// ---------------------------------------------------------------------------

/// Extract the version names from an HTML release index: the `href` values
/// of its anchor tags, with directory slashes stripped. Non-version noise
/// (parent links and the like) is left for line matching to discard.
pub fn parse_release_index(html: &str) -> Vec<String> {
    let re = match Regex::new(r#"<a[^>]+href="([^"]+)""#) {
        Ok(re) => re,
        Err(_) => return Vec::new(),
    };
    re.captures_iter(html)
        .map(|c| c[1].trim_matches('/').to_string())
        .filter(|v| !v.is_empty())
        .collect()
}

/// Extract the release name from the release text document: the payload is
/// `\n---\n`-separated with a YAML section second, whose `Name` field holds
/// the version.
pub fn parse_latest_release_text(text: &str) -> Option<String> {
    let section = text.split("\n---\n").nth(1)?;
    let value: serde_yaml::Value = serde_yaml::from_str(section).ok()?;
    Some(value.get("Name")?.as_str()?.to_string())
}
