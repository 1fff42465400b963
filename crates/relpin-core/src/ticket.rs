//! Tracking-ticket ledger: at most one open ticket per distinct drift.

use tracing::info;

use crate::capabilities::{NewTicket, TicketId, TicketStore};
use crate::config::TicketConfig;
use crate::error::Result;
use crate::version::DriftSet;

/// Version of the summary text format.
///
/// The summary is the de-duplication key: [`TicketLedger::find_open`]
/// matches it byte-for-byte against open tickets, so the format is a
/// contract. Changing it orphans tickets created under the old format;
/// bump this constant and keep the exact-output tests in sync when that
/// is intended.
pub const SUMMARY_FORMAT_VERSION: u32 = 1;

/// Outcome of [`TicketLedger::ensure`]: either this run created the
/// tracking ticket, or an open one already covers the same drift.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum TicketDisposition {
    Created(TicketId),
    AlreadyOpen(TicketId),
}

/// Wraps a [`TicketStore`] with the summary contract and the
/// create-if-absent idempotency check.
pub struct TicketLedger<'a> {
    store: &'a dyn TicketStore,
    config: &'a TicketConfig,
}

impl<'a> TicketLedger<'a> {
    pub fn new(store: &'a dyn TicketStore, config: &'a TicketConfig) -> Self {
        Self { store, config }
    }

    /// Deterministic drift description, format v1:
    /// `<prefix> (<line>: <pinned> -> <latest>[, <line> OS: <pinned> -> <latest>]...)`.
    ///
    /// A segment appears for each attribute that drifted; forced runs list
    /// every attribute of every retained line.
    pub fn summary_for(&self, drift: &DriftSet) -> String {
        let mut segments = Vec::new();
        for line in drift.lines() {
            if drift.forced() || line.platform_drifted() {
                segments.push(format!(
                    "{}: {} -> {}",
                    line.line, line.platform.pinned, line.platform.latest
                ));
            }
            if let Some(os) = &line.os {
                if drift.forced() || os.drifted() {
                    segments.push(format!("{} OS: {} -> {}", line.line, os.pinned, os.latest));
                }
            }
        }
        format!("{} ({})", self.config.summary_prefix, segments.join(", "))
    }

    /// Exact-summary match over the open tickets in scope.
    pub async fn find_open(&self, summary: &str) -> Result<Option<TicketId>> {
        let open = self.store.open_tickets().await?;
        Ok(open
            .into_iter()
            .find(|ticket| ticket.summary == summary)
            .map(|ticket| ticket.id))
    }

    /// Create the tracking ticket for this drift unless one is already
    /// open, in which case the caller must stop.
    ///
    /// The search-then-create window is not transactional; scheduled
    /// (non-overlapping) invocation is what keeps duplicates out in
    /// practice.
    pub async fn ensure(&self, drift: &DriftSet) -> Result<TicketDisposition> {
        let summary = self.summary_for(drift);

        if let Some(existing) = self.find_open(&summary).await? {
            info!(
                ticket = %existing,
                url = %self.config.browse_url(&existing.0),
                "tracking ticket already open, not creating another"
            );
            return Ok(TicketDisposition::AlreadyOpen(existing));
        }

        let id = self
            .store
            .create(NewTicket {
                project: self.config.project.clone(),
                component: self.config.component.clone(),
                summary: summary.clone(),
                description: summary,
                priority: self.config.priority.clone(),
                issue_type: self.config.issue_type.clone(),
            })
            .await?;

        if let Some(assignee) = &self.config.assignee {
            self.store.assign(&id, assignee).await?;
        }
        for watcher in &self.config.watchers {
            self.store.add_watcher(&id, watcher).await?;
        }

        info!(
            ticket = %id,
            url = %self.config.browse_url(&id.0),
            "tracking ticket created"
        );
        Ok(TicketDisposition::Created(id))
    }

    /// Append a cross-link annotation to the ticket.
    pub async fn comment(&self, id: &TicketId, body: &str) -> Result<()> {
        self.store.comment(id, body).await?;
        Ok(())
    }
}
