//! Jira adapter for the ticket capability.

use async_trait::async_trait;
use relpin_core::{NewTicket, OpenTicket, TicketConfig, TicketId, TicketStore, VendorResult};
use serde::Deserialize;
use tracing::{debug, info};

use crate::error::{rejection, transport};

/// Ticket store backed by the Jira REST API (v2), scoped by
/// [`TicketConfig`] to one project and component.
pub struct JiraTicketStore {
    config: TicketConfig,
    username: String,
    password: String,
    http_client: reqwest::Client,
}

#[derive(Debug, Deserialize)]
struct SearchResponse {
    issues: Vec<SearchIssue>,
}

#[derive(Debug, Deserialize)]
struct SearchIssue {
    key: String,
    fields: SearchFields,
}

#[derive(Debug, Deserialize)]
struct SearchFields {
    #[serde(default)]
    summary: String,
}

#[derive(Debug, Deserialize)]
struct CreatedIssue {
    key: String,
}

/// The JQL query selecting every open tracking ticket in scope.
fn search_jql(config: &TicketConfig) -> String {
    format!(
        "project = \"{}\" AND component = \"{}\" AND status = \"{}\"",
        config.project, config.component, config.open_status
    )
}

impl JiraTicketStore {
    pub fn new(config: TicketConfig, username: String, password: String) -> Self {
        Self {
            config,
            username,
            password,
            http_client: crate::http_client(),
        }
    }

    fn api(&self, path: &str) -> String {
        format!(
            "{}/rest/api/2/{}",
            self.config.base_url.trim_end_matches('/'),
            path
        )
    }

    fn authed(&self, request: reqwest::RequestBuilder) -> reqwest::RequestBuilder {
        request.basic_auth(&self.username, Some(&self.password))
    }
}

#[async_trait]
impl TicketStore for JiraTicketStore {
    async fn open_tickets(&self) -> VendorResult<Vec<OpenTicket>> {
        let url = self.api("search");
        let jql = search_jql(&self.config);
        debug!(%jql, "Searching for open tickets");

        let response = self
            .authed(self.http_client.get(&url))
            .query(&[
                ("jql", jql.as_str()),
                ("fields", "summary"),
                ("maxResults", "200"),
            ])
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("jira", response).await);
        }

        let found: SearchResponse = response.json().await.map_err(transport)?;
        Ok(found
            .issues
            .into_iter()
            .map(|issue| OpenTicket {
                id: TicketId(issue.key),
                summary: issue.fields.summary,
            })
            .collect())
    }

    async fn create(&self, ticket: NewTicket) -> VendorResult<TicketId> {
        let url = self.api("issue");
        let payload = serde_json::json!({
            "fields": {
                "project": {"key": ticket.project},
                "summary": ticket.summary,
                "description": ticket.description,
                "priority": {"name": ticket.priority},
                "components": [{"name": ticket.component}],
                "issuetype": {"name": ticket.issue_type},
            }
        });

        let response = self
            .authed(self.http_client.post(&url))
            .json(&payload)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("jira", response).await);
        }

        let created: CreatedIssue = response.json().await.map_err(transport)?;
        info!(ticket = %created.key, "Created tracking ticket");
        Ok(TicketId(created.key))
    }

    async fn assign(&self, id: &TicketId, assignee: &str) -> VendorResult<()> {
        let url = self.api(&format!("issue/{id}/assignee"));
        let response = self
            .authed(self.http_client.put(&url))
            .json(&serde_json::json!({"name": assignee}))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("jira", response).await);
        }
        Ok(())
    }

    async fn add_watcher(&self, id: &TicketId, watcher: &str) -> VendorResult<()> {
        let url = self.api(&format!("issue/{id}/watchers"));
        // The watchers endpoint takes a bare JSON-encoded username.
        let response = self
            .authed(self.http_client.post(&url))
            .json(&watcher)
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("jira", response).await);
        }
        Ok(())
    }

    async fn comment(&self, id: &TicketId, body: &str) -> VendorResult<()> {
        let url = self.api(&format!("issue/{id}/comment"));
        let response = self
            .authed(self.http_client.post(&url))
            .json(&serde_json::json!({"body": body}))
            .send()
            .await
            .map_err(transport)?;
        if !response.status().is_success() {
            return Err(rejection("jira", response).await);
        }
        Ok(())
    }
}
