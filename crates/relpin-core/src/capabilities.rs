//! Capability traits for the external systems the pipeline touches.
//!
//! Each trait carries exactly the operations the pipeline needs, nothing
//! vendor-shaped. Production adapters live in `relpin-remote`; in-memory
//! fakes in [`crate::fakes`].

use std::fmt;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::VendorResult;

/// Identifier of a tracking ticket, e.g. "MGMT-1234".
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct TicketId(pub String);

impl fmt::Display for TicketId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

/// Fields of a ticket about to be created.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct NewTicket {
    pub project: String,
    pub component: String,
    pub summary: String,
    pub description: String,
    pub priority: String,
    pub issue_type: String,
}

/// An open ticket as returned by the scoped search.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct OpenTicket {
    pub id: TicketId,
    pub summary: String,
}

/// Ticket system operations, scoped to one project/component by the
/// adapter's configuration.
#[async_trait]
pub trait TicketStore: Send + Sync {
    /// Every open ticket in scope. Point-in-time linear scan; the caller
    /// owns the race window this leaves.
    async fn open_tickets(&self) -> VendorResult<Vec<OpenTicket>>;

    async fn create(&self, ticket: NewTicket) -> VendorResult<TicketId>;

    async fn assign(&self, id: &TicketId, assignee: &str) -> VendorResult<()>;

    async fn add_watcher(&self, id: &TicketId, watcher: &str) -> VendorResult<()>;

    async fn comment(&self, id: &TicketId, body: &str) -> VendorResult<()>;
}

/// A change request proposed to a code host.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequestSpec {
    pub title: String,
    pub body: String,
    /// Branch name only; the adapter knows which fork it lives in.
    pub source_branch: String,
    pub target_branch: String,
}

/// An opened change request.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChangeRequest {
    pub number: u64,
    pub url: String,
}

/// Primary code host operations: opening and annotating change requests,
/// and the hold/unhold merge-blocking convention.
#[async_trait]
pub trait CodeHost: Send + Sync {
    async fn open_change_request(&self, spec: ChangeRequestSpec) -> VendorResult<ChangeRequest>;

    async fn comment(&self, cr: &ChangeRequest, body: &str) -> VendorResult<()>;

    /// Block the change request from merging.
    async fn hold(&self, cr: &ChangeRequest) -> VendorResult<()>;

    /// Lift the merge block.
    async fn unhold(&self, cr: &ChangeRequest) -> VendorResult<()>;
}

/// Status of one CI build. `result` is `None` while the build is still
/// running.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct BuildStatus {
    pub result: Option<String>,
    pub url: String,
}

/// External validation job operations.
#[async_trait]
pub trait CiRunner: Send + Sync {
    /// The build number the next trigger of `job` will get. Recorded before
    /// triggering so polling addresses the right build.
    async fn next_build_number(&self, job: &str) -> VendorResult<u64>;

    async fn trigger(&self, job: &str, parameters: &[(String, String)]) -> VendorResult<()>;

    async fn build_status(&self, job: &str, build: u64) -> VendorResult<BuildStatus>;
}

/// A fork of the deployment configuration repository.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ForkInfo {
    /// Where the update branch is pushed.
    pub push_url: String,
    pub project_id: u64,
    pub upstream_project_id: u64,
}

/// Secondary code host operations for the deployment configuration
/// repository.
#[async_trait]
pub trait ConfigRepo: Send + Sync {
    /// Create the caller's fork, or return the existing one when the name
    /// is already taken.
    async fn ensure_fork(&self) -> VendorResult<ForkInfo>;

    async fn open_merge_request(
        &self,
        fork: &ForkInfo,
        spec: ChangeRequestSpec,
    ) -> VendorResult<ChangeRequest>;

    /// Block the merge request from merging.
    async fn hold(&self, cr: &ChangeRequest) -> VendorResult<()>;
}
