//! Pipeline configuration.
//!
//! Every component receives its configuration section at construction time;
//! nothing reads ambient globals. [`PipelineConfig`] aggregates the sections
//! and can be loaded from a YAML file by the CLI, with every field defaulted
//! so a partial file only overrides what it names.

use std::collections::BTreeSet;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::Result;

/// Where version documents are fetched from.
///
/// URL templates substitute `{line}` with a release line (e.g. "4.9") and
/// `{version}` with a full version string.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct FeedConfig {
    /// HTML index listing every published platform release.
    pub release_index_url: String,

    /// Per-line HTML index listing published OS images.
    pub os_image_index_url: String,

    /// Release text document describing the single newest release.
    pub latest_release_url: String,

    /// Raw URL of the pinned version map on the upstream default branch.
    pub pinned_url: String,

    /// Bootable OS live image, used to extract the OS build id.
    pub os_live_image_url: String,
}

impl Default for FeedConfig {
    fn default() -> Self {
        Self {
            release_index_url: "https://mirror.openshift.com/pub/openshift-v4/x86_64/clients/ocp/"
                .to_string(),
            os_image_index_url:
                "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/{line}"
                    .to_string(),
            latest_release_url:
                "https://mirror.openshift.com/pub/openshift-v4/x86_64/clients/ocp/latest/release.txt"
                    .to_string(),
            pinned_url:
                "https://raw.githubusercontent.com/openshift/assisted-service/master/default_ocp_versions.json"
                    .to_string(),
            os_live_image_url:
                "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/{line}/{version}/rhcos-{version}-x86_64-live.x86_64.iso"
                    .to_string(),
        }
    }
}

impl FeedConfig {
    pub fn os_image_index_for(&self, line: &str) -> String {
        self.os_image_index_url.replace("{line}", line)
    }

    pub fn os_live_image_for(&self, line: &str, version: &str) -> String {
        self.os_live_image_url
            .replace("{line}", line)
            .replace("{version}", version)
    }
}

/// Ticket system scope and defaults for newly created tracking tickets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TicketConfig {
    /// Base URL of the ticket system, used for API calls and browse links.
    pub base_url: String,

    /// Project key new tickets are created under.
    pub project: String,

    /// Component that scopes both creation and the open-ticket search.
    pub component: String,

    /// Status treated as "open" when searching for an existing ticket.
    pub open_status: String,

    pub priority: String,
    pub issue_type: String,

    /// Fixed prefix of every tracking-ticket summary. Load-bearing for
    /// de-duplication; see [`crate::ticket::SUMMARY_FORMAT_VERSION`].
    pub summary_prefix: String,

    /// Account the new ticket is assigned to, when set.
    pub assignee: Option<String>,

    /// Accounts added as watchers on the new ticket.
    pub watchers: Vec<String>,
}

impl Default for TicketConfig {
    fn default() -> Self {
        Self {
            base_url: "https://issues.redhat.com".to_string(),
            project: "MGMT".to_string(),
            component: "Assisted-Installer CI".to_string(),
            open_status: "TO DO".to_string(),
            priority: "Blocker".to_string(),
            issue_type: "Task".to_string(),
            summary_prefix: "Default versions need to be updated".to_string(),
            assignee: None,
            watchers: Vec::new(),
        }
    }
}

impl TicketConfig {
    /// Human-facing link to a ticket, used in annotations.
    pub fn browse_url(&self, ticket: &str) -> String {
        format!("{}/browse/{}", self.base_url.trim_end_matches('/'), ticket)
    }
}

/// Primary repository layout and patch behavior.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PatchConfig {
    /// Upstream clone URL. The working copy is reset hard to its default
    /// branch before any patch is applied.
    pub upstream_url: String,

    /// Clone URL of the contributor fork; `{user}` is substituted with the
    /// code-host login. Branches are pushed here.
    pub fork_url_template: String,

    /// Browsable fork URL passed to the validation job; `{user}` substituted.
    pub fork_web_url_template: String,

    pub default_branch: String,

    /// The JSON version map rewritten structurally on multi-line runs.
    pub version_map_file: String,

    /// Files patched textually on single-line runs.
    pub substituted_files: Vec<String>,

    /// Version-bearing patterns substituted in `substituted_files`;
    /// `{version}` is substituted with the old and new version in turn.
    pub replace_contexts: Vec<String>,

    /// Templated document the propagated version map is read back from
    /// after regeneration.
    pub template_file: String,

    /// Parameter name inside `template_file` holding the version map.
    pub template_parameter: String,

    /// Regeneration command run in the working copy between the first and
    /// second commit. Exit 0 and `no_changes_exit_code` both count as
    /// success.
    pub verify_command: Vec<String>,
    pub no_changes_exit_code: i32,

    /// Branch name templates; `{ticket}` and `{version}` are substituted.
    pub reconcile_branch_template: String,
    pub bump_branch_template: String,

    /// Accounts mentioned in the change-request body.
    pub mentions: Vec<String>,
}

impl Default for PatchConfig {
    fn default() -> Self {
        Self {
            upstream_url: "https://github.com/openshift/assisted-service.git".to_string(),
            fork_url_template: "https://github.com/{user}/assisted-service.git".to_string(),
            fork_web_url_template: "https://github.com/{user}/assisted-service".to_string(),
            default_branch: "master".to_string(),
            version_map_file: "default_ocp_versions.json".to_string(),
            substituted_files: vec![
                "default_ocp_versions.json".to_string(),
                "config/onprem-iso-fcc.yaml".to_string(),
                "onprem-environment".to_string(),
            ],
            replace_contexts: vec![
                "\"{version}\"".to_string(),
                "ocp-release:{version}".to_string(),
            ],
            template_file: "openshift/template.yaml".to_string(),
            template_parameter: "OPENSHIFT_VERSIONS".to_string(),
            verify_command: vec!["make".to_string(), "generate-ocp-version".to_string()],
            no_changes_exit_code: 2,
            reconcile_branch_template: "{ticket}_update_default_versions".to_string(),
            bump_branch_template: "update_version_to_{version}".to_string(),
            mentions: Vec::new(),
        }
    }
}

impl PatchConfig {
    pub fn fork_url(&self, user: &str) -> String {
        self.fork_url_template.replace("{user}", user)
    }

    pub fn fork_web_url(&self, user: &str) -> String {
        self.fork_web_url_template.replace("{user}", user)
    }
}

/// Validation job identity and poll bounds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct GateConfig {
    /// Base URL of the CI server.
    pub base_url: String,

    /// Job path, `/`-separated for nested folders.
    pub job: String,

    /// Value of the `JOB_NAME` parameter passed to the job.
    pub job_label: String,

    /// Terminal result string treated as success.
    pub success_result: String,

    /// Delay before the first status poll, in seconds.
    pub initial_delay_secs: u64,

    /// Interval between status polls, in seconds.
    pub poll_interval_secs: u64,

    /// Upper bound on the whole poll phase, in seconds. Expiry yields a
    /// timed-out gate outcome, distinct from a failed one.
    pub max_wait_secs: u64,
}

impl Default for GateConfig {
    fn default() -> Self {
        Self {
            base_url: "http://localhost:8080".to_string(),
            job: "assisted-test-infra/master".to_string(),
            job_label: "Update_ocp_version".to_string(),
            success_result: "SUCCESS".to_string(),
            initial_delay_secs: 10,
            poll_interval_secs: 30,
            max_wait_secs: 4 * 60 * 60,
        }
    }
}

/// One deployment environment inside the downstream configuration document,
/// identified by the reference path its `namespace` mapping points at.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EnvironmentTarget {
    pub name: String,
    pub namespace_ref: String,
}

/// Secondary (deployment configuration) repository and merge targets.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct PropagationConfig {
    /// API base URL of the secondary code host.
    pub api_base_url: String,

    /// Project path of the upstream deployment repository, `group/name`.
    pub project_path: String,

    /// Clone URL of the upstream deployment repository.
    pub clone_url: String,

    pub target_branch: String,

    /// Path of the environment-keyed document inside the repository.
    pub document_path: String,

    /// Parameter receiving the serialized version map in each target.
    pub parameter: String,

    /// Environments in document order. Order is observable in the merged
    /// output, so it is a `Vec`, not a map.
    pub environments: Vec<EnvironmentTarget>,

    /// Environments never written to, regardless of drift.
    pub excluded_environments: BTreeSet<String>,
}

impl Default for PropagationConfig {
    fn default() -> Self {
        Self {
            api_base_url: "https://gitlab.example.com".to_string(),
            project_path: "service/app-interface".to_string(),
            clone_url: "git@gitlab.example.com:service/app-interface.git".to_string(),
            target_branch: "master".to_string(),
            document_path: "data/services/assisted-installer/cicd/saas.yaml".to_string(),
            parameter: "OPENSHIFT_VERSIONS".to_string(),
            environments: vec![
                EnvironmentTarget {
                    name: "integration".to_string(),
                    namespace_ref:
                        "/services/assisted-installer/namespaces/assisted-installer-integration.yml"
                            .to_string(),
                },
                EnvironmentTarget {
                    name: "staging".to_string(),
                    namespace_ref:
                        "/services/assisted-installer/namespaces/assisted-installer-stage.yml"
                            .to_string(),
                },
                EnvironmentTarget {
                    name: "production".to_string(),
                    namespace_ref:
                        "/services/assisted-installer/namespaces/assisted-installer-production.yml"
                            .to_string(),
                },
            ],
            excluded_environments: ["integration", "staging", "production"]
                .into_iter()
                .map(String::from)
                .collect(),
        }
    }
}

/// Whether downstream propagation waits for the gate to pass.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PropagationPolicy {
    /// Propagate whatever the gate outcome was.
    Always,
    /// Propagate only after a passed gate.
    RequireGatePass,
}

impl PropagationPolicy {
    pub fn admits(&self, gate_passed: bool) -> bool {
        match self {
            PropagationPolicy::Always => true,
            PropagationPolicy::RequireGatePass => gate_passed,
        }
    }
}

/// Sentinel values substituted for live lookups on dry runs.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DryRunConfig {
    pub sentinel_ticket: String,
    pub sentinel_os_build: String,
}

impl Default for DryRunConfig {
    fn default() -> Self {
        Self {
            sentinel_ticket: "TEST-8888".to_string(),
            sentinel_os_build: "8888888".to_string(),
        }
    }
}

/// Aggregated configuration for one pipeline run.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub feed: FeedConfig,
    pub ticket: TicketConfig,
    pub patch: PatchConfig,
    pub gate: GateConfig,
    pub propagation: PropagationConfig,

    /// When unset, the run mode picks its own default: reconcile runs
    /// propagate regardless of the gate, bump runs require a pass.
    pub propagation_policy: Option<PropagationPolicy>,

    pub dry_run: DryRunConfig,
}

impl PipelineConfig {
    /// Load configuration from a YAML file. Missing fields keep their
    /// defaults.
    pub fn from_file(path: &Path) -> Result<Self> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_yaml::from_str(&text)?)
    }
}
