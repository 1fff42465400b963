//! Relpin - Platform Version Reconciler CLI
//!
//! The `relpin` command keeps the pinned platform versions of the service
//! aligned with the latest published releases.
//!
//! ## Commands
//!
//! - `reconcile`: Update every tracked release line that drifted
//! - `bump`: Move the newest release line to its latest version

use std::path::PathBuf;

use anyhow::{bail, Context, Result};
use clap::{Args, Parser, Subcommand};
use tracing::Level;

use relpin_core::{
    init_tracing, GateOutcome, Orchestrator, Outcome, PatchConfig, PipelineConfig,
    PropagationReport, RunMode,
};
use relpin_remote::{
    GithubCodeHost, GithubConfig, GitlabConfigRepo, JenkinsCiRunner, JiraTicketStore,
    MirrorVersionSource,
};

#[derive(Parser)]
#[command(name = "relpin")]
#[command(author = "Stevedores Org")]
#[command(version = env!("CARGO_PKG_VERSION"))]
#[command(about = "Platform version reconciler", long_about = None)]
struct Cli {
    /// Enable verbose output
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Emit JSON-formatted log lines
    #[arg(long, global = true)]
    json: bool,

    /// Pipeline configuration file (YAML); built-in defaults when omitted
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Update every tracked release line that drifted from its latest release
    Reconcile {
        /// Patch a scratch clone only: no ticket, no push, no validation
        #[arg(long)]
        dry_run: bool,

        #[command(flatten)]
        credentials: CredentialArgs,
    },

    /// Move the newest release line to its latest published version
    Bump {
        #[command(flatten)]
        credentials: CredentialArgs,
    },
}

/// Service credentials. Pairs are `user:secret`.
#[derive(Args)]
struct CredentialArgs {
    /// Jira credentials
    #[arg(long, env = "RELPIN_JIRA", value_name = "USER:PASSWORD")]
    jira: Option<String>,

    /// GitHub credentials; the user also owns the primary fork
    #[arg(long, env = "RELPIN_GITHUB", value_name = "USER:TOKEN")]
    github: Option<String>,

    /// GitLab private token for the deployment repository host
    #[arg(long, env = "RELPIN_GITLAB_TOKEN", value_name = "TOKEN")]
    gitlab_token: Option<String>,

    /// SSH key used to push to the deployment repository fork
    #[arg(long, env = "RELPIN_GITLAB_KEY_FILE", value_name = "PATH")]
    gitlab_key_file: Option<PathBuf>,

    /// Jenkins credentials
    #[arg(long, env = "RELPIN_JENKINS", value_name = "USER:TOKEN")]
    jenkins: Option<String>,
}

struct Credentials {
    jira: (String, String),
    github: (String, String),
    gitlab_token: String,
    gitlab_key_file: Option<PathBuf>,
    jenkins: (String, String),
}

impl CredentialArgs {
    /// Resolve the flags into concrete credentials. A dry run never
    /// contacts any service, so placeholders stand in for missing values.
    fn resolve(&self, dry_run: bool) -> Result<Credentials> {
        if dry_run {
            let pair = |raw: &Option<String>| match raw {
                Some(raw) => split_pair(raw),
                None => Ok((String::new(), String::new())),
            };
            return Ok(Credentials {
                jira: pair(&self.jira)?,
                github: pair(&self.github)?,
                gitlab_token: self.gitlab_token.clone().unwrap_or_default(),
                gitlab_key_file: self.gitlab_key_file.clone(),
                jenkins: pair(&self.jenkins)?,
            });
        }

        Ok(Credentials {
            jira: split_pair(
                self.jira
                    .as_deref()
                    .context("--jira (or RELPIN_JIRA) is required")?,
            )?,
            github: split_pair(
                self.github
                    .as_deref()
                    .context("--github (or RELPIN_GITHUB) is required")?,
            )?,
            gitlab_token: self
                .gitlab_token
                .clone()
                .context("--gitlab-token (or RELPIN_GITLAB_TOKEN) is required")?,
            gitlab_key_file: self.gitlab_key_file.clone(),
            jenkins: split_pair(
                self.jenkins
                    .as_deref()
                    .context("--jenkins (or RELPIN_JENKINS) is required")?,
            )?,
        })
    }
}

/// Split a `user:secret` credential flag.
fn split_pair(raw: &str) -> Result<(String, String)> {
    match raw.split_once(':') {
        Some((user, secret)) if !user.is_empty() && !secret.is_empty() => {
            Ok((user.to_string(), secret.to_string()))
        }
        _ => bail!("credential must be of the form user:secret"),
    }
}

/// Owner and repository name from the upstream clone URL. Accepts both the
/// https and the scp-like ssh form.
fn github_coordinates(upstream_url: &str) -> Option<(String, String)> {
    let trimmed = upstream_url.trim_end_matches('/').trim_end_matches(".git");
    let mut segments = trimmed.rsplit(['/', ':']);
    let repo = segments.next()?.to_string();
    let owner = segments.next()?.to_string();
    if owner.is_empty() || repo.is_empty() {
        return None;
    }
    Some((owner, repo))
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    // Setup logging
    let level = if cli.verbose {
        Level::DEBUG
    } else {
        Level::INFO
    };
    init_tracing(cli.json, level);

    let mut config = match &cli.config {
        Some(path) => PipelineConfig::from_file(path)
            .with_context(|| format!("Failed to load configuration from {}", path.display()))?,
        None => PipelineConfig::default(),
    };

    let (mode, credentials) = match &cli.command {
        Commands::Reconcile {
            dry_run,
            credentials,
        } => (
            RunMode::Reconcile { dry_run: *dry_run },
            credentials.resolve(*dry_run)?,
        ),
        Commands::Bump { credentials } => {
            // The bump flow regenerates through its own make target, unless
            // the configuration file overrides the command.
            if config.patch.verify_command == PatchConfig::default().verify_command {
                config.patch.verify_command =
                    vec!["make".to_string(), "update-ocp-version".to_string()];
            }
            (RunMode::Bump, credentials.resolve(false)?)
        }
    };

    run_pipeline(&config, mode, credentials).await
}

async fn run_pipeline(
    config: &PipelineConfig,
    mode: RunMode,
    credentials: Credentials,
) -> Result<()> {
    let (owner, repo) = github_coordinates(&config.patch.upstream_url)
        .context("patch.upstream_url does not name a github owner/repository")?;
    let (jira_user, jira_password) = credentials.jira;
    let (github_user, github_token) = credentials.github;
    let (jenkins_user, jenkins_token) = credentials.jenkins;

    let source = MirrorVersionSource::new(config.feed.clone());
    let tickets = JiraTicketStore::new(config.ticket.clone(), jira_user, jira_password);
    let host = GithubCodeHost::new(
        GithubConfig {
            owner,
            repo,
            ..GithubConfig::default()
        },
        github_user.clone(),
        github_token,
    );
    let ci = JenkinsCiRunner::new(config.gate.base_url.clone(), jenkins_user, jenkins_token);
    let config_repo = GitlabConfigRepo::new(config.propagation.clone(), credentials.gitlab_token);

    let mut orchestrator = Orchestrator::new(
        config,
        &github_user,
        &source,
        &tickets,
        &host,
        &ci,
        &config_repo,
    );
    if let Some(key) = credentials.gitlab_key_file {
        orchestrator = orchestrator.with_deploy_key(key);
    }

    let outcome = orchestrator.run(mode).await?;
    report(&outcome);
    Ok(())
}

fn report(outcome: &Outcome) {
    match outcome {
        Outcome::NoDrift => {
            println!("Every pinned version already matches its latest release.");
        }
        Outcome::AlreadyTracked { ticket } => {
            println!("Drift is already tracked by {ticket}; waiting for it to be resolved.");
        }
        Outcome::Completed(report) => {
            println!("Updated release lines: {}", report.drifted_lines.join(", "));
            println!("Ticket: {}", report.ticket);
            println!("Branch: {}", report.branch);
            if let Some(cr) = &report.change_request {
                println!("Change request: {}", cr.url);
            }
            match &report.gate {
                Some(GateOutcome::Passed { build_url }) => {
                    println!("Validation passed: {build_url}");
                }
                Some(GateOutcome::Failed { build_url }) => {
                    println!("Validation failed, change request left on hold: {build_url}");
                }
                Some(GateOutcome::TimedOut) => {
                    println!("Validation timed out, change request left on hold.");
                }
                None => {}
            }
            match &report.propagation {
                Some(PropagationReport::Opened { url }) => {
                    println!("Deployment merge request: {url}");
                }
                Some(PropagationReport::NoopNoChanges) => {
                    println!("Every deployment environment is excluded; nothing to propagate.");
                }
                Some(PropagationReport::SkippedByPolicy) => {
                    println!("Propagation skipped by policy.");
                }
                None => {}
            }
        }
    }
}
