//! GitHub adapter for the primary code-host capability.

use async_trait::async_trait;
use relpin_core::{ChangeRequest, ChangeRequestSpec, CodeHost, VendorResult};
use serde::{Deserialize, Serialize};
use tracing::info;

use crate::error::{rejection, transport};

/// Coordinates of the upstream repository change requests are opened
/// against.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GithubConfig {
    pub api_base_url: String,
    pub owner: String,
    pub repo: String,
}

impl Default for GithubConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://api.github.com".to_string(),
            owner: "openshift".to_string(),
            repo: "assisted-service".to_string(),
        }
    }
}

/// Code host backed by the GitHub REST API. Change requests are pull
/// requests with the configured user's fork as head; holding uses the
/// `/hold` and `/unhold` review-bot commands.
pub struct GithubCodeHost {
    config: GithubConfig,
    user: String,
    token: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct OpenedPull {
    number: u64,
    html_url: String,
}

impl GithubCodeHost {
    pub fn new(config: GithubConfig, user: String, token: String) -> Self {
        Self {
            config,
            user,
            token,
            http_client: crate::http_client(),
        }
    }

    fn repo_api(&self, path: &str) -> String {
        format!(
            "{}/repos/{}/{}/{}",
            self.config.api_base_url.trim_end_matches('/'),
            self.config.owner,
            self.config.repo,
            path
        )
    }

    /// Cross-fork head reference of a branch on the user's fork.
    fn head_ref(&self, branch: &str) -> String {
        format!("{}:{}", self.user, branch)
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request
            .basic_auth(&self.user, Some(&self.token))
            .header("Accept", "application/vnd.github+json")
    }
}

#[async_trait]
impl CodeHost for GithubCodeHost {
    async fn open_change_request(&self, spec: ChangeRequestSpec) -> VendorResult<ChangeRequest> {
        let url = self.repo_api("pulls");
        let payload = serde_json::json!({
            "title": spec.title,
            "body": spec.body,
            "head": self.head_ref(&spec.source_branch),
            "base": spec.target_branch,
        });

        let response = self
            .authed(self.http_client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("github", response).await);
        }

        let pull: OpenedPull = response.json().await.map_err(transport)?;
        info!(url = %pull.html_url, "Opened change request");
        Ok(ChangeRequest {
            number: pull.number,
            url: pull.html_url,
        })
    }

    async fn comment(&self, cr: &ChangeRequest, body: &str) -> VendorResult<()> {
        let url = self.repo_api(&format!("issues/{}/comments", cr.number));
        let response = self
            .authed(self.http_client.post(&url))
            .json(&serde_json::json!({"body": body}))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("github", response).await);
        }
        Ok(())
    }

    async fn hold(&self, cr: &ChangeRequest) -> VendorResult<()> {
        self.comment(cr, "/hold").await
    }

    async fn unhold(&self, cr: &ChangeRequest) -> VendorResult<()> {
        self.comment(cr, "/unhold").await
    }
}
