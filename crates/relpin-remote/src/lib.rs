//! Relpin Remote Adapters
//!
//! Production implementations of the pipeline capability traits: Jira for
//! the ticket ledger, GitHub for the primary code host, GitLab for the
//! deployment configuration repository, Jenkins for the validation job,
//! and the public release mirror for the version feed.

mod error;
pub mod github;
pub mod gitlab;
pub mod jenkins;
pub mod jira;
pub mod mirror;

pub use github::{GithubCodeHost, GithubConfig};
pub use gitlab::GitlabConfigRepo;
pub use jenkins::JenkinsCiRunner;
pub use jira::JiraTicketStore;
pub use mirror::MirrorVersionSource;

const USER_AGENT: &str = concat!("relpin/", env!("CARGO_PKG_VERSION"));

/// Shared HTTP client construction. Building fails only when the TLS
/// backend cannot initialize.
pub(crate) fn http_client() -> reqwest::Client {
    reqwest::Client::builder()
        .user_agent(USER_AGENT)
        .build()
        .expect("Failed to create HTTP client")
}
