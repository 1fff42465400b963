//! GitLab adapter for the deployment configuration repository capability.

use async_trait::async_trait;
use relpin_core::{
    ChangeRequest, ChangeRequestSpec, ConfigRepo, ForkInfo, PropagationConfig, VendorResult,
};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{rejection, transport};

/// Config repo host backed by the GitLab REST API (v4): forking the
/// deployment repository, opening cross-project merge requests, and the
/// `/hold` note convention.
pub struct GitlabConfigRepo {
    config: PropagationConfig,
    token: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct User {
    username: String,
}

#[derive(Debug, Deserialize)]
struct Project {
    id: u64,
    #[serde(default)]
    ssh_url_to_repo: String,
}

#[derive(Debug, Deserialize)]
struct OpenedMergeRequest {
    iid: u64,
    web_url: String,
}

/// Encode a `group/name` project path for use as a single URL segment.
fn encode_path(path: &str) -> String {
    path.replace('/', "%2F")
}

impl GitlabConfigRepo {
    pub fn new(config: PropagationConfig, token: String) -> Self {
        Self {
            config,
            token,
            http_client: crate::http_client(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!(
            "{}/api/v4/{}",
            self.config.api_base_url.trim_end_matches('/'),
            path
        )
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.header("PRIVATE-TOKEN", &self.token)
    }

    async fn current_username(&self) -> VendorResult<String> {
        let response = self
            .authed(self.http_client.get(self.api("user")))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("gitlab", response).await);
        }
        let user: User = response.json().await.map_err(transport)?;
        Ok(user.username)
    }

    async fn project(&self, path: &str) -> VendorResult<Project> {
        let url = self.api(&format!("projects/{}", encode_path(path)));
        let response = self
            .authed(self.http_client.get(&url))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("gitlab", response).await);
        }
        response.json().await.map_err(transport)
    }
}

#[async_trait]
impl ConfigRepo for GitlabConfigRepo {
    async fn ensure_fork(&self) -> VendorResult<ForkInfo> {
        let upstream = self.project(&self.config.project_path).await?;

        let url = self.api(&format!(
            "projects/{}/fork",
            encode_path(&self.config.project_path)
        ));
        let response = self
            .authed(self.http_client.post(&url))
            .send()
            .await
            .map_err(transport)?;

        let fork: Project = if response.status() == reqwest::StatusCode::CONFLICT {
            // The fork already exists under the token owner's namespace.
            let user = self.current_username().await?;
            let name = self
                .config
                .project_path
                .rsplit('/')
                .next()
                .unwrap_or(&self.config.project_path);
            debug!(%user, "Fork already exists, fetching it");
            self.project(&format!("{user}/{name}")).await?
        } else if response.status().is_success() {
            response.json().await.map_err(transport)?
        } else {
            return Err(rejection("gitlab", response).await);
        };

        info!(fork_id = fork.id, "Using deployment repository fork");
        Ok(ForkInfo {
            push_url: fork.ssh_url_to_repo,
            project_id: fork.id,
            upstream_project_id: upstream.id,
        })
    }

    async fn open_merge_request(
        &self,
        fork: &ForkInfo,
        spec: ChangeRequestSpec,
    ) -> VendorResult<ChangeRequest> {
        let url = self.api(&format!("projects/{}/merge_requests", fork.project_id));
        let payload = serde_json::json!({
            "source_branch": spec.source_branch,
            "target_branch": spec.target_branch,
            "title": spec.title,
            "description": spec.body,
            "target_project_id": fork.upstream_project_id,
        });

        let response = self
            .authed(self.http_client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("gitlab", response).await);
        }

        let mr: OpenedMergeRequest = response.json().await.map_err(transport)?;
        info!(url = %mr.web_url, "Opened merge request");
        Ok(ChangeRequest {
            number: mr.iid,
            url: mr.web_url,
        })
    }

    async fn hold(&self, cr: &ChangeRequest) -> VendorResult<()> {
        // Cross-project merge requests live in the upstream project; the
        // note is posted there under the upstream-scoped iid.
        let upstream = self.project(&self.config.project_path).await?;
        let url = self.api(&format!(
            "projects/{}/merge_requests/{}/notes",
            upstream.id, cr.number
        ));
        let response = self
            .authed(self.http_client.post(&url))
            .json(&serde_json::json!({"body": "/hold"}))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("gitlab", response).await);
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_encode_path_escapes_the_separator() {
        assert_eq!(encode_path("service/app-interface"), "service%2Fapp-interface");
        assert_eq!(encode_path("flat"), "flat");
    }

    #[test]
    fn test_api_url_builds_from_config_base() {
        let repo = GitlabConfigRepo::new(PropagationConfig::default(), "token".to_string());
        assert_eq!(
            repo.api("projects/service%2Fapp-interface/fork"),
            "https://gitlab.example.com/api/v4/projects/service%2Fapp-interface/fork"
        );
    }
}
