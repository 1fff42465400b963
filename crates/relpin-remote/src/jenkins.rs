//! Jenkins adapter for the validation-job capability.

use async_trait::async_trait;
use relpin_core::{BuildStatus, CiRunner, VendorResult};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{rejection, transport};

/// CI runner backed by the Jenkins JSON API. Jobs are addressed by their
/// `/`-separated folder path.
pub struct JenkinsCiRunner {
    base_url: String,
    username: String,
    token: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct JobState {
    #[serde(rename = "nextBuildNumber")]
    next_build_number: u64,
}

#[derive(Debug, Deserialize)]
struct BuildState {
    result: Option<String>,
    url: String,
}

/// Translate a `folder/job` path into the URL form `job/folder/job/job`.
fn job_path(job: &str) -> String {
    job.split('/')
        .map(|segment| format!("job/{segment}"))
        .collect::<Vec<_>>()
        .join("/")
}

impl JenkinsCiRunner {
    pub fn new(base_url: impl Into<String>, username: String, token: String) -> Self {
        Self {
            base_url: base_url.into(),
            username,
            token,
            http_client: crate::http_client(),
        }
    }

    fn job_api(&self, job: &str, tail: &str) -> String {
        format!(
            "{}/{}/{}",
            self.base_url.trim_end_matches('/'),
            job_path(job),
            tail
        )
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(&self.username, Some(&self.token))
    }
}

#[async_trait]
impl CiRunner for JenkinsCiRunner {
    async fn next_build_number(&self, job: &str) -> VendorResult<u64> {
        let url = self.job_api(job, "api/json");
        let response = self
            .authed(self.http_client.get(&url))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("jenkins", response).await);
        }
        let state: JobState = response.json().await.map_err(transport)?;
        Ok(state.next_build_number)
    }

    async fn trigger(&self, job: &str, parameters: &[(String, String)]) -> VendorResult<()> {
        let url = self.job_api(job, "buildWithParameters");
        info!(%job, "Triggering validation build");
        let response = self
            .authed(self.http_client.post(&url))
            .query(parameters)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("jenkins", response).await);
        }
        Ok(())
    }

    async fn build_status(&self, job: &str, build: u64) -> VendorResult<BuildStatus> {
        let url = self.job_api(job, &format!("{build}/api/json"));
        let response = self
            .authed(self.http_client.get(&url))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("jenkins", response).await);
        }
        let state: BuildState = response.json().await.map_err(transport)?;
        debug!(result = ?state.result, "Polled build status");
        Ok(BuildStatus {
            result: state.result,
            url: state.url,
        })
    }
}
