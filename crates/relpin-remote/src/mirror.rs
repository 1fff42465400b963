//! Release mirror adapter for the version-feed capability.
//!
//! Retrieval only; the document parsers live in `relpin_core` so the
//! in-memory fakes share them exactly.

use std::io::Write;
use std::process::Command;

use async_trait::async_trait;
use relpin_core::{
    build_id_from_boot_params, parse_latest_release_text, parse_release_index, FeedConfig,
    PinnedDocument, PipelineError, Result, VersionSource,
};
use tracing::{debug, info};

use crate::error::feed_transport;

/// Boot parameter file carried inside the OS live image; holds the build id.
const BOOT_PARAMS_FILE: &str = "zipl.prm";

/// Version source backed by the public release mirror and the raw pinned
/// map on the upstream default branch.
pub struct MirrorVersionSource {
    config: FeedConfig,
    http_client: reqwest::Client,
}

impl MirrorVersionSource {
    pub fn new(config: FeedConfig) -> Self {
        Self {
            config,
            http_client: crate::http_client(),
        }
    }

    async fn fetch_text(&self, url: &str) -> Result<String> {
        debug!(%url, "Fetching version document");
        let response = self
            .http_client
            .get(url)
            .send()
            .await
            .map_err(feed_transport)?;
        if !response.status().is_success() {
            return Err(PipelineError::UpstreamUnavailable {
                url: url.to_string(),
                status: response.status().as_u16(),
            });
        }
        response.text().await.map_err(feed_transport)
    }
}

#[async_trait]
impl VersionSource for MirrorVersionSource {
    async fn latest_release(&self) -> Result<String> {
        let url = &self.config.latest_release_url;
        let text = self.fetch_text(url).await?;
        parse_latest_release_text(&text).ok_or_else(|| PipelineError::MalformedUpstreamData {
            url: url.clone(),
            detail: "release text carries no Name field".to_string(),
        })
    }

    async fn available_releases(&self) -> Result<Vec<String>> {
        let text = self.fetch_text(&self.config.release_index_url).await?;
        Ok(parse_release_index(&text))
    }

    async fn available_os_images(&self, line: &str) -> Result<Vec<String>> {
        let text = self.fetch_text(&self.config.os_image_index_for(line)).await?;
        Ok(parse_release_index(&text))
    }

    async fn pinned(&self) -> Result<PinnedDocument> {
        let url = &self.config.pinned_url;
        let text = self.fetch_text(url).await?;
        PinnedDocument::from_json(&text).map_err(|e| PipelineError::MalformedUpstreamData {
            url: url.clone(),
            detail: e.to_string(),
        })
    }

    async fn os_build_id(&self, line: &str, os_version: &str) -> Result<String> {
        let url = self.config.os_live_image_for(line, os_version);
        info!(%url, "Downloading OS live image to extract the build id");

        let scratch = tempfile::tempdir()?;
        let iso_path = scratch.path().join("live.iso");
        let mut file = std::fs::File::create(&iso_path)?;

        let mut response = self
            .http_client
            .get(&url)
            .send()
            .await
            .map_err(feed_transport)?;
        if !response.status().is_success() {
            return Err(PipelineError::UpstreamUnavailable {
                url,
                status: response.status().as_u16(),
            });
        }
        while let Some(chunk) = response.chunk().await.map_err(feed_transport)? {
            file.write_all(&chunk)?;
        }
        file.flush()?;
        drop(file);

        let extraction = Command::new("7z")
            .args(["x", "-y"])
            .arg(&iso_path)
            .arg(BOOT_PARAMS_FILE)
            .current_dir(scratch.path())
            .output()?;
        if !extraction.status.success() {
            let stderr = String::from_utf8_lossy(&extraction.stderr);
            return Err(PipelineError::MalformedUpstreamData {
                url,
                detail: format!("could not extract {BOOT_PARAMS_FILE}: {}", stderr.trim()),
            });
        }

        let params = std::fs::read_to_string(scratch.path().join(BOOT_PARAMS_FILE))?;
        build_id_from_boot_params(&params).ok_or_else(|| PipelineError::MalformedUpstreamData {
            url,
            detail: format!("{BOOT_PARAMS_FILE} carries no build id"),
        })
    }
}
