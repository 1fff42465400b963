//! Sequential orchestration of one reconciliation run.
//!
//! Steps run strictly in order; the first failure aborts the run and the
//! next scheduled invocation starts over from a fresh snapshot. Partial
//! progress is left in place on purpose: an open ticket or a pushed
//! branch from an aborted run is picked up (or superseded) by the ticket
//! de-duplication on the next run, never rolled back.

use std::path::{Path, PathBuf};

use chrono::{DateTime, Utc};
use tracing::info;
use uuid::Uuid;

use crate::capabilities::{
    ChangeRequest, ChangeRequestSpec, CiRunner, CodeHost, ConfigRepo, TicketId, TicketStore,
};
use crate::config::{PipelineConfig, PropagationPolicy};
use crate::drift::DriftDetector;
use crate::error::{PipelineError, Result};
use crate::feed::{PinnedDocument, VersionSource};
use crate::gate::{GateOutcome, PromotionGate};
use crate::patcher::{GitWorkspace, RepoPatcher};
use crate::propagate::{ConfigPropagator, MergeOutcome};
use crate::ticket::{TicketDisposition, TicketLedger};
use crate::version::{latest_in_line, minor_of, version_from_release_image, DriftSet, ReleaseLine, VersionPair};

/// Which variant of the pipeline this run executes.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RunMode {
    /// Reconcile every pinned release line against the published feeds.
    Reconcile { dry_run: bool },
    /// Bump the single line tracking the newest published release.
    Bump,
}

impl RunMode {
    fn dry_run(&self) -> bool {
        matches!(self, RunMode::Reconcile { dry_run: true })
    }

    fn default_policy(&self) -> PropagationPolicy {
        match self {
            RunMode::Reconcile { .. } => PropagationPolicy::Always,
            RunMode::Bump => PropagationPolicy::RequireGatePass,
        }
    }
}

/// How a run ended when it did not fail.
#[derive(Debug)]
pub enum Outcome {
    /// Every pinned version already matches its latest release.
    NoDrift,
    /// An open ticket already tracks this exact drift; nothing was done.
    AlreadyTracked { ticket: TicketId },
    Completed(Box<RunReport>),
}

/// What one completed run did.
#[derive(Debug)]
pub struct RunReport {
    pub run_id: Uuid,
    pub started_at: DateTime<Utc>,
    pub mode: RunMode,
    pub drifted_lines: Vec<String>,
    pub ticket: TicketId,
    pub branch: String,
    /// `None` on dry runs, which stop before anything is opened.
    pub change_request: Option<ChangeRequest>,
    pub gate: Option<GateOutcome>,
    pub propagation: Option<PropagationReport>,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PropagationReport {
    Opened { url: String },
    NoopNoChanges,
    SkippedByPolicy,
}

/// Runs the whole pipeline against injected capability implementations.
pub struct Orchestrator<'a> {
    config: &'a PipelineConfig,
    /// Code-host account owning the primary fork.
    fork_owner: &'a str,
    /// Key used to clone and push the deployment repository, when set.
    deploy_key: Option<PathBuf>,
    source: &'a dyn VersionSource,
    tickets: &'a dyn TicketStore,
    host: &'a dyn CodeHost,
    ci: &'a dyn CiRunner,
    config_repo: &'a dyn ConfigRepo,
}

impl<'a> Orchestrator<'a> {
    pub fn new(
        config: &'a PipelineConfig,
        fork_owner: &'a str,
        source: &'a dyn VersionSource,
        tickets: &'a dyn TicketStore,
        host: &'a dyn CodeHost,
        ci: &'a dyn CiRunner,
        config_repo: &'a dyn ConfigRepo,
    ) -> Self {
        Self {
            config,
            fork_owner,
            deploy_key: None,
            source,
            tickets,
            host,
            ci,
            config_repo,
        }
    }

    /// Use `key` for git access to the deployment repository.
    pub fn with_deploy_key(mut self, key: PathBuf) -> Self {
        self.deploy_key = Some(key);
        self
    }

    pub async fn run(&self, mode: RunMode) -> Result<Outcome> {
        let run_id = Uuid::new_v4();
        let started_at = Utc::now();
        let dry_run = mode.dry_run();
        info!(%run_id, ?mode, "starting run");

        let (mut pinned, candidates) = self.snapshot(mode).await?;
        let drift = DriftDetector::new(dry_run).compute(candidates);
        if drift.is_empty() {
            info!("every pinned version matches its latest release");
            return Ok(Outcome::NoDrift);
        }

        let ledger = TicketLedger::new(self.tickets, &self.config.ticket);
        let ticket = if dry_run {
            TicketId(self.config.dry_run.sentinel_ticket.clone())
        } else {
            match ledger.ensure(&drift).await? {
                TicketDisposition::Created(id) => id,
                TicketDisposition::AlreadyOpen(id) => {
                    return Ok(Outcome::AlreadyTracked { ticket: id });
                }
            }
        };

        let branch = self.branch_name(mode, &ticket, &drift);

        // Dry runs patch a clone of upstream itself; real runs go through
        // the fork the change request is opened from.
        let scratch = tempfile::tempdir()?;
        let clone_url = if dry_run {
            self.config.patch.upstream_url.clone()
        } else {
            self.config.patch.fork_url(self.fork_owner)
        };
        let patcher = RepoPatcher::prepare(
            &self.config.patch,
            &clone_url,
            &scratch.path().join("primary"),
        )?;

        self.apply_update(mode, &patcher, &mut pinned, &drift).await?;

        if dry_run {
            patcher.verify()?;
            info!("dry run complete, nothing was pushed or created");
            return Ok(Outcome::Completed(Box::new(RunReport {
                run_id,
                started_at,
                mode,
                drifted_lines: drift.line_names().iter().map(|s| s.to_string()).collect(),
                ticket,
                branch,
                change_request: None,
                gate: None,
                propagation: None,
            })));
        }

        patcher.commit_and_push(&ticket.0, &branch)?;
        let template_value = patcher.template_parameter()?;

        let change = self
            .host
            .open_change_request(ChangeRequestSpec {
                title: self.change_title(mode, &ticket, &drift),
                body: self.mention_body(),
                source_branch: branch.clone(),
                target_branch: self.config.patch.default_branch.clone(),
            })
            .await?;
        self.host.hold(&change).await?;
        info!(url = %change.url, "change request opened and held");

        let fork_web_url = self.config.patch.fork_web_url(self.fork_owner);
        let target_version = drift
            .lines()
            .first()
            .map(|line| line.platform.latest.clone())
            .unwrap_or_default();
        let gate = PromotionGate::new(self.ci, self.host, &self.config.gate)
            .run(&change, &branch, &fork_web_url, &target_version)
            .await?;

        let policy = self
            .config
            .propagation_policy
            .unwrap_or_else(|| mode.default_policy());
        let propagation = if policy.admits(gate.passed()) {
            self.propagate(&ledger, &ticket, &change, &branch, &template_value, scratch.path())
                .await?
        } else {
            info!("gate did not pass, propagation skipped by policy");
            PropagationReport::SkippedByPolicy
        };

        let report = RunReport {
            run_id,
            started_at,
            mode,
            drifted_lines: drift.line_names().iter().map(|s| s.to_string()).collect(),
            ticket,
            branch,
            change_request: Some(change),
            gate: Some(gate),
            propagation: Some(propagation),
        };
        info!(
            %run_id,
            ticket = %report.ticket,
            lines = ?report.drifted_lines,
            gate = ?report.gate,
            propagation = ?report.propagation,
            "run finished"
        );
        Ok(Outcome::Completed(Box::new(report)))
    }

    /// Fetch the pinned document and pair every tracked attribute with its
    /// latest published counterpart.
    async fn snapshot(&self, mode: RunMode) -> Result<(PinnedDocument, Vec<ReleaseLine>)> {
        let pinned = self.source.pinned().await?;
        let mut candidates = Vec::new();

        match mode {
            RunMode::Reconcile { .. } => {
                let releases = self.source.available_releases().await?;
                for (line, entry) in pinned.entries() {
                    let latest = latest_in_line(line, &releases).ok_or_else(|| {
                        PipelineError::MalformedUpstreamData {
                            url: self.config.feed.release_index_url.clone(),
                            detail: format!("no published release for line {line}"),
                        }
                    })?;
                    let platform = VersionPair {
                        pinned: entry.pinned_platform().to_string(),
                        latest,
                    };

                    let os = match entry.pinned_os() {
                        Some(pinned_os) => {
                            let images = self.source.available_os_images(line).await?;
                            let latest_os = latest_in_line(line, &images).ok_or_else(|| {
                                PipelineError::MalformedUpstreamData {
                                    url: self.config.feed.os_image_index_for(line),
                                    detail: format!("no published OS image for line {line}"),
                                }
                            })?;
                            Some(VersionPair {
                                pinned: pinned_os,
                                latest: latest_os,
                            })
                        }
                        None => None,
                    };

                    candidates.push(ReleaseLine {
                        line: line.to_string(),
                        platform,
                        os,
                    });
                }
            }
            RunMode::Bump => {
                let latest = self.source.latest_release().await?;
                let line = minor_of(&latest).to_string();
                let entry = pinned.get(&line).ok_or_else(|| {
                    PipelineError::MalformedUpstreamData {
                        url: self.config.feed.pinned_url.clone(),
                        detail: format!("pinned document has no entry for line {line}"),
                    }
                })?;
                let current = version_from_release_image(&entry.release_image).ok_or_else(|| {
                    PipelineError::MalformedUpstreamData {
                        url: self.config.feed.pinned_url.clone(),
                        detail: format!("unparseable release image {}", entry.release_image),
                    }
                })?;

                candidates.push(ReleaseLine {
                    line,
                    platform: VersionPair {
                        pinned: current,
                        latest,
                    },
                    os: None,
                });
            }
        }

        Ok((pinned, candidates))
    }

    /// Patch the working copy: a structural rewrite of the version map on
    /// reconcile runs, textual substitutions on bump runs.
    async fn apply_update(
        &self,
        mode: RunMode,
        patcher: &RepoPatcher<'_>,
        pinned: &mut PinnedDocument,
        drift: &DriftSet,
    ) -> Result<()> {
        match mode {
            RunMode::Reconcile { dry_run } => {
                for line in drift.lines() {
                    let build_id = match &line.os {
                        Some(_) if dry_run => Some(self.config.dry_run.sentinel_os_build.clone()),
                        Some(os) if os.drifted() => {
                            Some(self.source.os_build_id(&line.line, &os.latest).await?)
                        }
                        _ => None,
                    };

                    let Some(entry) = pinned.get_mut(&line.line) else {
                        continue;
                    };
                    entry.bump_platform(&line.platform.latest);
                    if let (Some(os), Some(build_id)) = (&line.os, build_id) {
                        entry.bump_os(&os.pinned, &os.latest, &build_id);
                    }
                }
                patcher.write_version_map(pinned)
            }
            RunMode::Bump => match drift.lines().first() {
                Some(line) => patcher.apply_substitutions(&line.platform.pinned, &line.platform.latest),
                None => Ok(()),
            },
        }
    }

    fn branch_name(&self, mode: RunMode, ticket: &TicketId, drift: &DriftSet) -> String {
        let template = match mode {
            RunMode::Reconcile { .. } => &self.config.patch.reconcile_branch_template,
            RunMode::Bump => &self.config.patch.bump_branch_template,
        };
        let version = drift
            .lines()
            .first()
            .map(|line| line.platform.latest.as_str())
            .unwrap_or_default();
        template
            .replace("{ticket}", &ticket.0)
            .replace("{version}", version)
    }

    fn change_title(&self, mode: RunMode, ticket: &TicketId, drift: &DriftSet) -> String {
        match (mode, drift.lines().first()) {
            (RunMode::Bump, Some(line)) => format!(
                "{}, Bump platform version from {} to {} (auto created)",
                ticket, line.platform.pinned, line.platform.latest
            ),
            _ => format!("{ticket}, Bump platform versions"),
        }
    }

    fn mention_body(&self) -> String {
        self.config
            .patch
            .mentions
            .iter()
            .map(|mention| format!("@{mention}"))
            .collect::<Vec<_>>()
            .join(" ")
    }

    /// Splice the propagated value into the deployment document and open a
    /// held merge request for it, cross-linked from both the ticket and
    /// the primary change request.
    async fn propagate(
        &self,
        ledger: &TicketLedger<'_>,
        ticket: &TicketId,
        change: &ChangeRequest,
        branch: &str,
        value: &str,
        scratch: &Path,
    ) -> Result<PropagationReport> {
        let prop = &self.config.propagation;
        let dir = scratch.join("deployment");
        let workspace = GitWorkspace::clone(&prop.clone_url, &dir, true, self.deploy_key.as_deref())?;

        let document_path = workspace.root().join(&prop.document_path);
        let document = std::fs::read_to_string(&document_path)?;

        match ConfigPropagator::new(prop).merge(&document, value)? {
            MergeOutcome::NoopNoChanges => {
                ledger
                    .comment(
                        ticket,
                        "Every deployment environment is excluded, no deployment update needed",
                    )
                    .await?;
                info!("all environments excluded, deployment document untouched");
                Ok(PropagationReport::NoopNoChanges)
            }
            MergeOutcome::Updated(updated) => {
                std::fs::write(&document_path, updated)?;

                let fork = self.config_repo.ensure_fork().await?;
                workspace.fetch_unshallow("origin")?;
                workspace.add_remote("fork", &fork.push_url)?;
                workspace.checkout_new_branch(branch)?;
                workspace.commit_all(&format!("{ticket} Updating deployment version map"))?;
                workspace.push_set_upstream("fork", branch)?;

                let mut body = self.mention_body();
                if !body.is_empty() {
                    body.push('\n');
                }
                body.push_str(&format!(
                    "See ticket {}",
                    self.config.ticket.browse_url(&ticket.0)
                ));

                let request = self
                    .config_repo
                    .open_merge_request(
                        &fork,
                        ChangeRequestSpec {
                            title: format!("{ticket}, Bump platform versions"),
                            body,
                            source_branch: branch.to_string(),
                            target_branch: prop.target_branch.clone(),
                        },
                    )
                    .await?;
                self.config_repo.hold(&request).await?;

                let note = format!(
                    "Created a merge request in the deployment repository {}",
                    request.url
                );
                ledger.comment(ticket, &note).await?;
                self.host.comment(change, &note).await?;
                info!(url = %request.url, "deployment merge request opened and held");

                Ok(PropagationReport::Opened { url: request.url })
            }
        }
    }
}
