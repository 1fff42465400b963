//! In-memory fakes for the capability traits (testing only)
//!
//! Provides `MemoryTicketStore`, `MemoryCodeHost`, `ScriptedCiRunner`,
//! `MemoryConfigRepo`, and `StaticVersionSource` that satisfy the trait
//! contracts without any external dependencies. Each fake records the
//! writes it receives so tests can assert on them.

use std::collections::{BTreeMap, VecDeque};
use std::sync::Mutex;

use async_trait::async_trait;

use crate::capabilities::*;
use crate::error::{PipelineError, Result, VendorResult};
use crate::feed::{PinnedDocument, VersionSource};

// ---------------------------------------------------------------------------
// MemoryTicketStore
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeTicket {
    pub id: TicketId,
    pub ticket: NewTicket,
    pub assignee: Option<String>,
    pub watchers: Vec<String>,
    pub comments: Vec<String>,
}

/// In-memory ticket store. Every ticket it holds counts as open.
#[derive(Debug, Default)]
pub struct MemoryTicketStore {
    tickets: Mutex<Vec<FakeTicket>>,
    next_id: Mutex<u64>,
    writes: Mutex<u64>,
}

impl MemoryTicketStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed an already-open ticket, as if a previous run created it.
    pub fn with_open_ticket(self, project: &str, summary: &str) -> Self {
        {
            let mut next = self.next_id.lock().unwrap();
            *next += 1;
            let id = TicketId(format!("{}-{}", project, *next));
            self.tickets.lock().unwrap().push(FakeTicket {
                id,
                ticket: NewTicket {
                    project: project.to_string(),
                    component: String::new(),
                    summary: summary.to_string(),
                    description: summary.to_string(),
                    priority: String::new(),
                    issue_type: String::new(),
                },
                assignee: None,
                watchers: Vec::new(),
                comments: Vec::new(),
            });
        }
        self
    }

    pub fn tickets(&self) -> Vec<FakeTicket> {
        self.tickets.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> u64 {
        *self.writes.lock().unwrap()
    }

    fn record_write(&self) {
        *self.writes.lock().unwrap() += 1;
    }
}

#[async_trait]
impl TicketStore for MemoryTicketStore {
    async fn open_tickets(&self) -> VendorResult<Vec<OpenTicket>> {
        let tickets = self.tickets.lock().unwrap();
        Ok(tickets
            .iter()
            .map(|t| OpenTicket {
                id: t.id.clone(),
                summary: t.ticket.summary.clone(),
            })
            .collect())
    }

    async fn create(&self, ticket: NewTicket) -> VendorResult<TicketId> {
        self.record_write();
        let mut next = self.next_id.lock().unwrap();
        *next += 1;
        let id = TicketId(format!("{}-{}", ticket.project, *next));
        self.tickets.lock().unwrap().push(FakeTicket {
            id: id.clone(),
            ticket,
            assignee: None,
            watchers: Vec::new(),
            comments: Vec::new(),
        });
        Ok(id)
    }

    async fn assign(&self, id: &TicketId, assignee: &str) -> VendorResult<()> {
        self.record_write();
        let mut tickets = self.tickets.lock().unwrap();
        if let Some(ticket) = tickets.iter_mut().find(|t| &t.id == id) {
            ticket.assignee = Some(assignee.to_string());
        }
        Ok(())
    }

    async fn add_watcher(&self, id: &TicketId, watcher: &str) -> VendorResult<()> {
        self.record_write();
        let mut tickets = self.tickets.lock().unwrap();
        if let Some(ticket) = tickets.iter_mut().find(|t| &t.id == id) {
            ticket.watchers.push(watcher.to_string());
        }
        Ok(())
    }

    async fn comment(&self, id: &TicketId, body: &str) -> VendorResult<()> {
        self.record_write();
        let mut tickets = self.tickets.lock().unwrap();
        if let Some(ticket) = tickets.iter_mut().find(|t| &t.id == id) {
            ticket.comments.push(body.to_string());
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// MemoryCodeHost
// ---------------------------------------------------------------------------

#[derive(Debug, Clone)]
pub struct FakeChangeRequest {
    pub number: u64,
    pub spec: ChangeRequestSpec,
    pub comments: Vec<String>,
    pub held: bool,
}

/// In-memory code host recording opened change requests, comments, and
/// hold state.
#[derive(Debug, Default)]
pub struct MemoryCodeHost {
    requests: Mutex<Vec<FakeChangeRequest>>,
    writes: Mutex<u64>,
}

impl MemoryCodeHost {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn requests(&self) -> Vec<FakeChangeRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> u64 {
        *self.writes.lock().unwrap()
    }

    fn record_write(&self) {
        *self.writes.lock().unwrap() += 1;
    }

    fn with_request<T>(&self, number: u64, f: impl FnOnce(&mut FakeChangeRequest) -> T) -> VendorResult<T> {
        let mut requests = self.requests.lock().unwrap();
        let request = requests
            .iter_mut()
            .find(|r| r.number == number)
            .ok_or_else(|| crate::error::VendorError::NotFound(format!("change request {number}")))?;
        Ok(f(request))
    }
}

#[async_trait]
impl CodeHost for MemoryCodeHost {
    async fn open_change_request(&self, spec: ChangeRequestSpec) -> VendorResult<ChangeRequest> {
        self.record_write();
        let mut requests = self.requests.lock().unwrap();
        let number = requests.len() as u64 + 1;
        requests.push(FakeChangeRequest {
            number,
            spec,
            comments: Vec::new(),
            held: false,
        });
        Ok(ChangeRequest {
            number,
            url: format!("https://codehost.invalid/pr/{number}"),
        })
    }

    async fn comment(&self, cr: &ChangeRequest, body: &str) -> VendorResult<()> {
        self.record_write();
        self.with_request(cr.number, |r| r.comments.push(body.to_string()))
    }

    async fn hold(&self, cr: &ChangeRequest) -> VendorResult<()> {
        self.record_write();
        self.with_request(cr.number, |r| r.held = true)
    }

    async fn unhold(&self, cr: &ChangeRequest) -> VendorResult<()> {
        self.record_write();
        self.with_request(cr.number, |r| r.held = false)
    }
}

// ---------------------------------------------------------------------------
// ScriptedCiRunner
// ---------------------------------------------------------------------------

/// CI runner replaying a scripted sequence of build results. Each
/// `build_status` call consumes one script entry; an exhausted script
/// reports the build as still running, so a gate polling it forever will
/// time out rather than finish.
#[derive(Debug, Default)]
pub struct ScriptedCiRunner {
    script: Mutex<VecDeque<Option<String>>>,
    triggers: Mutex<Vec<(String, Vec<(String, String)>)>>,
    polls: Mutex<u64>,
}

impl ScriptedCiRunner {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append one poll result to the script; `None` means still running.
    pub fn push_result(&self, result: Option<&str>) {
        self.script
            .lock()
            .unwrap()
            .push_back(result.map(str::to_string));
    }

    pub fn triggers(&self) -> Vec<(String, Vec<(String, String)>)> {
        self.triggers.lock().unwrap().clone()
    }

    pub fn poll_count(&self) -> u64 {
        *self.polls.lock().unwrap()
    }
}

#[async_trait]
impl CiRunner for ScriptedCiRunner {
    async fn next_build_number(&self, _job: &str) -> VendorResult<u64> {
        Ok(17)
    }

    async fn trigger(&self, job: &str, parameters: &[(String, String)]) -> VendorResult<()> {
        self.triggers
            .lock()
            .unwrap()
            .push((job.to_string(), parameters.to_vec()));
        Ok(())
    }

    async fn build_status(&self, job: &str, build: u64) -> VendorResult<BuildStatus> {
        *self.polls.lock().unwrap() += 1;
        let result = self.script.lock().unwrap().pop_front().flatten();
        Ok(BuildStatus {
            result,
            url: format!("https://ci.invalid/job/{job}/{build}/"),
        })
    }
}

// ---------------------------------------------------------------------------
// MemoryConfigRepo
// ---------------------------------------------------------------------------

/// In-memory secondary code host. The fork push URL is injectable so git
/// tests can point it at a local bare repository.
#[derive(Debug)]
pub struct MemoryConfigRepo {
    push_url: String,
    fork_calls: Mutex<u64>,
    merge_requests: Mutex<Vec<FakeChangeRequest>>,
    writes: Mutex<u64>,
}

impl Default for MemoryConfigRepo {
    fn default() -> Self {
        Self::new("https://configrepo.invalid/fork.git")
    }
}

impl MemoryConfigRepo {
    pub fn new(push_url: &str) -> Self {
        Self {
            push_url: push_url.to_string(),
            fork_calls: Mutex::new(0),
            merge_requests: Mutex::new(Vec::new()),
            writes: Mutex::new(0),
        }
    }

    pub fn fork_calls(&self) -> u64 {
        *self.fork_calls.lock().unwrap()
    }

    pub fn merge_requests(&self) -> Vec<FakeChangeRequest> {
        self.merge_requests.lock().unwrap().clone()
    }

    pub fn write_count(&self) -> u64 {
        *self.writes.lock().unwrap()
    }
}

#[async_trait]
impl ConfigRepo for MemoryConfigRepo {
    async fn ensure_fork(&self) -> VendorResult<ForkInfo> {
        *self.fork_calls.lock().unwrap() += 1;
        *self.writes.lock().unwrap() += 1;
        Ok(ForkInfo {
            push_url: self.push_url.clone(),
            project_id: 424242,
            upstream_project_id: 111111,
        })
    }

    async fn open_merge_request(
        &self,
        _fork: &ForkInfo,
        spec: ChangeRequestSpec,
    ) -> VendorResult<ChangeRequest> {
        *self.writes.lock().unwrap() += 1;
        let mut requests = self.merge_requests.lock().unwrap();
        let number = requests.len() as u64 + 1;
        requests.push(FakeChangeRequest {
            number,
            spec,
            comments: Vec::new(),
            held: false,
        });
        Ok(ChangeRequest {
            number,
            url: format!("https://configrepo.invalid/mr/{number}"),
        })
    }

    async fn hold(&self, cr: &ChangeRequest) -> VendorResult<()> {
        *self.writes.lock().unwrap() += 1;
        let mut requests = self.merge_requests.lock().unwrap();
        if let Some(request) = requests.iter_mut().find(|r| r.number == cr.number) {
            request.held = true;
        }
        Ok(())
    }
}

// ---------------------------------------------------------------------------
// StaticVersionSource
// ---------------------------------------------------------------------------

/// Version source serving fixed documents.
#[derive(Debug, Default)]
pub struct StaticVersionSource {
    pub latest: String,
    pub releases: Vec<String>,
    pub os_images: BTreeMap<String, Vec<String>>,
    pub pinned_json: String,
    /// Build ids keyed by "line/os_version".
    pub build_ids: BTreeMap<String, String>,
}

#[async_trait]
impl VersionSource for StaticVersionSource {
    async fn latest_release(&self) -> Result<String> {
        Ok(self.latest.clone())
    }

    async fn available_releases(&self) -> Result<Vec<String>> {
        Ok(self.releases.clone())
    }

    async fn available_os_images(&self, line: &str) -> Result<Vec<String>> {
        Ok(self.os_images.get(line).cloned().unwrap_or_default())
    }

    async fn pinned(&self) -> Result<PinnedDocument> {
        PinnedDocument::from_json(&self.pinned_json).map_err(PipelineError::from)
    }

    async fn os_build_id(&self, line: &str, os_version: &str) -> Result<String> {
        self.build_ids
            .get(&format!("{line}/{os_version}"))
            .cloned()
            .ok_or_else(|| PipelineError::MalformedUpstreamData {
                url: format!("static://{line}/{os_version}"),
                detail: "no scripted build id".to_string(),
            })
    }
}
