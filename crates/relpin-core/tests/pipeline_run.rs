//! End-to-end pipeline runs against local git repositories and in-memory
//! vendor fakes.

use std::collections::BTreeSet;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::sync::Once;

use relpin_core::fakes::{
    MemoryCodeHost, MemoryConfigRepo, MemoryTicketStore, ScriptedCiRunner, StaticVersionSource,
};
use relpin_core::{
    GateOutcome, Orchestrator, Outcome, PipelineConfig, PropagationReport, RunMode, TicketId,
};

static GIT_IDENTITY: Once = Once::new();

fn ensure_git_identity() {
    GIT_IDENTITY.call_once(|| {
        std::env::set_var("GIT_AUTHOR_NAME", "test-user");
        std::env::set_var("GIT_AUTHOR_EMAIL", "test@example.com");
        std::env::set_var("GIT_COMMITTER_NAME", "test-user");
        std::env::set_var("GIT_COMMITTER_EMAIL", "test@example.com");
    });
}

fn run_git(dir: &Path, args: &[&str]) -> String {
    let output = Command::new("git")
        .args(args)
        .current_dir(dir)
        .output()
        .expect("failed to run git");
    assert!(
        output.status.success(),
        "git {:?} failed: {}",
        args,
        String::from_utf8_lossy(&output.stderr)
    );
    String::from_utf8_lossy(&output.stdout).into_owned()
}

fn commit_all_as_master(dir: &Path, message: &str) {
    run_git(dir, &["init"]);
    run_git(dir, &["add", "-A"]);
    run_git(dir, &["commit", "-m", message]);
    run_git(dir, &["branch", "-M", "master"]);
}

const PINNED_JSON: &str = r#"{
        "4.9": {
                "display_name": "4.9.11",
                "release_image": "quay.io/openshift-release-dev/ocp-release:4.9.11-x86_64",
                "rhcos_image": "https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/4.9/4.9.8/rhcos-4.9.8-x86_64-live.x86_64.iso",
                "rhcos_version": "49.84.202110080947-0",
                "support_level": "production"
        }
}"#;

const SAAS_YAML: &str = r#"# Deployment pipeline for the installer service.
name: assisted-installer
resourceTemplates:
- name: assisted-installer
  url: https://github.com/openshift/assisted-service
  path: /openshift/template.yaml
  targets:
  - namespace:
      $ref: /services/assisted-installer/namespaces/assisted-installer-integration.yml
    ref: master
    parameters:
      OPENSHIFT_VERSIONS: '{"4.9": "4.9.11"}'
  - namespace:
      $ref: /services/assisted-installer/namespaces/assisted-installer-stage.yml
    ref: stable
    parameters:
      OPENSHIFT_VERSIONS: '{"4.9": "4.9.11"}'
  - namespace:
      $ref: /services/assisted-installer/namespaces/assisted-installer-production.yml
    ref: production
    parameters:
      OPENSHIFT_VERSIONS: '{"4.9": "4.9.11"}'
"#;

struct Fixture {
    _scratch: tempfile::TempDir,
    config: PipelineConfig,
    primary_fork: PathBuf,
    deploy_fork: PathBuf,
}

/// Builds a primary upstream repo plus bare fork, a deployment repo plus
/// bare fork, and a pipeline configuration pointing at all four.
fn fixture() -> Fixture {
    ensure_git_identity();
    let scratch = tempfile::tempdir().expect("tempdir");

    let primary = scratch.path().join("primary-upstream");
    std::fs::create_dir_all(primary.join("config")).unwrap();
    std::fs::create_dir_all(primary.join("openshift")).unwrap();
    std::fs::create_dir_all(primary.join("regen")).unwrap();
    std::fs::write(primary.join("default_ocp_versions.json"), PINNED_JSON).unwrap();
    std::fs::write(
        primary.join("config/onprem-iso-fcc.yaml"),
        "image: \"4.9.11\"\nrelease: ocp-release:4.9.11\n",
    )
    .unwrap();
    std::fs::write(
        primary.join("onprem-environment"),
        "OPENSHIFT_VERSION=\"4.9.11\"\n",
    )
    .unwrap();
    std::fs::write(
        primary.join("openshift/template.yaml"),
        "parameters:\n- name: OPENSHIFT_VERSIONS\n  value: '{\"4.9\": \"4.9.11\"}'\n",
    )
    .unwrap();
    // Stand-in for the project's regeneration target: copies the updated
    // template into place so the propagated value reflects the patch.
    std::fs::write(
        primary.join("regen/template-next.yaml"),
        "parameters:\n- name: OPENSHIFT_VERSIONS\n  value: '{\"4.9\": \"4.9.12\"}'\n",
    )
    .unwrap();
    commit_all_as_master(&primary, "initial");

    let primary_fork = scratch.path().join("primary-fork.git");
    run_git(
        scratch.path(),
        &[
            "clone",
            "--bare",
            primary.to_str().unwrap(),
            primary_fork.to_str().unwrap(),
        ],
    );

    let deploy = scratch.path().join("deploy-upstream");
    std::fs::create_dir_all(deploy.join("data/services/assisted-installer/cicd")).unwrap();
    std::fs::write(
        deploy.join("data/services/assisted-installer/cicd/saas.yaml"),
        SAAS_YAML,
    )
    .unwrap();
    commit_all_as_master(&deploy, "initial");

    let deploy_fork = scratch.path().join("deploy-fork.git");
    run_git(
        scratch.path(),
        &[
            "clone",
            "--bare",
            deploy.to_str().unwrap(),
            deploy_fork.to_str().unwrap(),
        ],
    );

    let mut config = PipelineConfig::default();
    config.patch.upstream_url = primary.to_string_lossy().into_owned();
    config.patch.fork_url_template = primary_fork.to_string_lossy().into_owned();
    config.patch.verify_command = vec![
        "cp".to_string(),
        "regen/template-next.yaml".to_string(),
        "openshift/template.yaml".to_string(),
    ];
    config.propagation.clone_url = deploy.to_string_lossy().into_owned();
    config.gate.initial_delay_secs = 1;
    config.gate.poll_interval_secs = 1;
    config.gate.max_wait_secs = 3;

    Fixture {
        _scratch: scratch,
        config,
        primary_fork,
        deploy_fork,
    }
}

fn source_with(releases: &[&str], os_images: &[&str], latest: &str) -> StaticVersionSource {
    StaticVersionSource {
        latest: latest.to_string(),
        releases: releases.iter().map(|s| s.to_string()).collect(),
        os_images: [(
            "4.9".to_string(),
            os_images.iter().map(|s| s.to_string()).collect(),
        )]
        .into_iter()
        .collect(),
        pinned_json: PINNED_JSON.to_string(),
        build_ids: [("4.9/4.9.9".to_string(), "49.84.202111170001-0".to_string())]
            .into_iter()
            .collect(),
    }
}

fn exclude_all_but_integration(config: &mut PipelineConfig) {
    config.propagation.excluded_environments = ["staging".to_string(), "production".to_string()]
        .into_iter()
        .collect::<BTreeSet<_>>();
}

/// Test: dry run exercises the patch steps on a scratch clone of upstream
/// and writes nothing anywhere.
#[tokio::test(start_paused = true)]
async fn test_dry_run_touches_nothing_external() {
    let fixture = fixture();
    let source = source_with(&["4.9.11", "4.9.12"], &["4.9.0", "4.9.8"], "4.9.12");
    let tickets = MemoryTicketStore::new();
    let host = MemoryCodeHost::new();
    let ci = ScriptedCiRunner::new();
    let repo = MemoryConfigRepo::new(fixture.deploy_fork.to_str().unwrap());

    let orchestrator =
        Orchestrator::new(&fixture.config, "bot", &source, &tickets, &host, &ci, &repo);
    let outcome = orchestrator
        .run(RunMode::Reconcile { dry_run: true })
        .await
        .expect("dry run failed");

    let Outcome::Completed(report) = outcome else {
        panic!("expected Completed");
    };
    assert_eq!(report.ticket, TicketId("TEST-8888".to_string()));
    assert_eq!(report.branch, "TEST-8888_update_default_versions");
    assert!(report.change_request.is_none());
    assert!(report.gate.is_none());
    assert!(report.propagation.is_none());

    assert_eq!(tickets.write_count(), 0, "dry run must not touch the ticket system");
    assert_eq!(host.write_count(), 0, "dry run must not touch the code host");
    assert_eq!(repo.write_count(), 0, "dry run must not touch the deployment host");
    assert!(ci.triggers().is_empty(), "dry run must not trigger CI");

    let branches = run_git(
        &fixture.primary_fork,
        &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
    );
    assert_eq!(branches.trim(), "master", "dry run must not push");
}

/// Test: reconcile run with a passing gate pushes both commits, opens and
/// unholds the change request, and propagates to the deployment fork.
#[tokio::test(start_paused = true)]
async fn test_reconcile_pass_runs_end_to_end() {
    let mut fixture = fixture();
    exclude_all_but_integration(&mut fixture.config);
    let source = source_with(&["4.9.11", "4.9.12"], &["4.9.0", "4.9.8"], "4.9.12");
    let tickets = MemoryTicketStore::new();
    let host = MemoryCodeHost::new();
    let ci = ScriptedCiRunner::new();
    ci.push_result(None);
    ci.push_result(Some("SUCCESS"));
    let repo = MemoryConfigRepo::new(fixture.deploy_fork.to_str().unwrap());

    let orchestrator =
        Orchestrator::new(&fixture.config, "bot", &source, &tickets, &host, &ci, &repo);
    let outcome = orchestrator
        .run(RunMode::Reconcile { dry_run: false })
        .await
        .expect("run failed");

    let Outcome::Completed(report) = outcome else {
        panic!("expected Completed");
    };
    assert_eq!(report.ticket, TicketId("MGMT-1".to_string()));
    assert_eq!(report.branch, "MGMT-1_update_default_versions");
    assert!(matches!(report.gate, Some(GateOutcome::Passed { .. })));
    assert_eq!(
        report.propagation,
        Some(PropagationReport::Opened {
            url: "https://configrepo.invalid/mr/1".to_string()
        })
    );

    // Exactly one ticket, with the contract summary.
    let created = tickets.tickets();
    assert_eq!(created.len(), 1);
    assert_eq!(
        created[0].ticket.summary,
        "Default versions need to be updated (4.9: 4.9.11 -> 4.9.12)"
    );
    assert!(created[0]
        .comments
        .iter()
        .any(|c| c.contains("https://configrepo.invalid/mr/1")));

    // Change request opened from the branch, unheld after the pass,
    // cross-linked to the merge request.
    let requests = host.requests();
    assert_eq!(requests.len(), 1);
    assert_eq!(requests[0].spec.title, "MGMT-1, Bump platform versions");
    assert_eq!(requests[0].spec.source_branch, "MGMT-1_update_default_versions");
    assert!(!requests[0].held, "passing gate must lift the hold");
    assert!(requests[0]
        .comments
        .iter()
        .any(|c| c.contains("Validation passed")));
    assert!(requests[0]
        .comments
        .iter()
        .any(|c| c.contains("https://configrepo.invalid/mr/1")));

    // Patch commit plus regeneration commit on the fork branch.
    let count = run_git(
        &fixture.primary_fork,
        &["rev-list", "--count", "master..MGMT-1_update_default_versions"],
    );
    assert_eq!(count.trim(), "2");

    let json = run_git(
        &fixture.primary_fork,
        &["show", "MGMT-1_update_default_versions:default_ocp_versions.json"],
    );
    assert!(json.contains("\"display_name\": \"4.9.12\""));
    assert!(json.contains("ocp-release:4.9.12-x86_64"));
    assert!(json.contains("support_level"), "unknown fields must survive the rewrite");

    // Deployment fork got the spliced document on the same branch, and
    // only the integration target moved.
    let saas = run_git(
        &fixture.deploy_fork,
        &[
            "show",
            "MGMT-1_update_default_versions:data/services/assisted-installer/cicd/saas.yaml",
        ],
    );
    assert_eq!(saas.matches(r#"'{"4.9": "4.9.12"}'"#).count(), 1);
    assert_eq!(saas.matches(r#"'{"4.9": "4.9.11"}'"#).count(), 2);

    let merge_requests = repo.merge_requests();
    assert_eq!(merge_requests.len(), 1);
    assert!(merge_requests[0].held, "merge request starts held");
    assert!(merge_requests[0]
        .spec
        .body
        .contains("See ticket https://issues.redhat.com/browse/MGMT-1"));

    // A second run sees the still-open ticket and stops before writing.
    let writes_before = (tickets.write_count(), host.write_count(), repo.write_count());
    let again = orchestrator
        .run(RunMode::Reconcile { dry_run: false })
        .await
        .expect("second run failed");
    let Outcome::AlreadyTracked { ticket } = again else {
        panic!("expected AlreadyTracked");
    };
    assert_eq!(ticket, TicketId("MGMT-1".to_string()));
    assert_eq!(
        (tickets.write_count(), host.write_count(), repo.write_count()),
        writes_before
    );
}

/// Test: bump run with a failed gate leaves the hold in place and skips
/// propagation under the default require-pass policy.
#[tokio::test(start_paused = true)]
async fn test_bump_failed_gate_skips_propagation() {
    let mut fixture = fixture();
    exclude_all_but_integration(&mut fixture.config);
    let source = source_with(&["4.9.11", "4.9.12"], &["4.9.0", "4.9.8"], "4.9.12");
    let tickets = MemoryTicketStore::new();
    let host = MemoryCodeHost::new();
    let ci = ScriptedCiRunner::new();
    ci.push_result(Some("FAILURE"));
    let repo = MemoryConfigRepo::new(fixture.deploy_fork.to_str().unwrap());

    let orchestrator =
        Orchestrator::new(&fixture.config, "bot", &source, &tickets, &host, &ci, &repo);
    let outcome = orchestrator.run(RunMode::Bump).await.expect("run failed");

    let Outcome::Completed(report) = outcome else {
        panic!("expected Completed");
    };
    assert_eq!(report.branch, "update_version_to_4.9.12");
    assert!(matches!(report.gate, Some(GateOutcome::Failed { .. })));
    assert_eq!(report.propagation, Some(PropagationReport::SkippedByPolicy));

    let requests = host.requests();
    assert_eq!(
        requests[0].spec.title,
        "MGMT-1, Bump platform version from 4.9.11 to 4.9.12 (auto created)"
    );
    assert!(requests[0].held, "failed gate must keep the hold");

    assert_eq!(repo.write_count(), 0, "no deployment writes after a failed gate");
    assert!(repo.merge_requests().is_empty());

    // Textual substitution reached every configured file.
    let env_file = run_git(
        &fixture.primary_fork,
        &["show", "update_version_to_4.9.12:onprem-environment"],
    );
    assert_eq!(env_file, "OPENSHIFT_VERSION=\"4.9.12\"\n");
    let fcc = run_git(
        &fixture.primary_fork,
        &["show", "update_version_to_4.9.12:config/onprem-iso-fcc.yaml"],
    );
    assert_eq!(fcc, "image: \"4.9.12\"\nrelease: ocp-release:4.9.12\n");
}

/// Test: reconcile runs propagate even after a failed gate, since the
/// default policy for them does not wait for the gate.
#[tokio::test(start_paused = true)]
async fn test_reconcile_failed_gate_still_propagates() {
    let mut fixture = fixture();
    exclude_all_but_integration(&mut fixture.config);
    let source = source_with(&["4.9.11", "4.9.12"], &["4.9.0", "4.9.8"], "4.9.12");
    let tickets = MemoryTicketStore::new();
    let host = MemoryCodeHost::new();
    let ci = ScriptedCiRunner::new();
    ci.push_result(Some("FAILURE"));
    let repo = MemoryConfigRepo::new(fixture.deploy_fork.to_str().unwrap());

    let orchestrator =
        Orchestrator::new(&fixture.config, "bot", &source, &tickets, &host, &ci, &repo);
    let outcome = orchestrator
        .run(RunMode::Reconcile { dry_run: false })
        .await
        .expect("run failed");

    let Outcome::Completed(report) = outcome else {
        panic!("expected Completed");
    };
    assert!(matches!(report.gate, Some(GateOutcome::Failed { .. })));
    assert!(matches!(
        report.propagation,
        Some(PropagationReport::Opened { .. })
    ));

    assert!(host.requests()[0].held, "primary change request stays held");
    assert_eq!(repo.merge_requests().len(), 1);
}

/// Test: with every environment excluded the deployment document is left
/// alone and the ticket records that no update was needed.
#[tokio::test(start_paused = true)]
async fn test_all_environments_excluded_reports_noop() {
    let fixture = fixture();
    let source = source_with(&["4.9.11", "4.9.12"], &["4.9.0", "4.9.8"], "4.9.12");
    let tickets = MemoryTicketStore::new();
    let host = MemoryCodeHost::new();
    let ci = ScriptedCiRunner::new();
    ci.push_result(Some("SUCCESS"));
    let repo = MemoryConfigRepo::new(fixture.deploy_fork.to_str().unwrap());

    let orchestrator =
        Orchestrator::new(&fixture.config, "bot", &source, &tickets, &host, &ci, &repo);
    let outcome = orchestrator
        .run(RunMode::Reconcile { dry_run: false })
        .await
        .expect("run failed");

    let Outcome::Completed(report) = outcome else {
        panic!("expected Completed");
    };
    assert_eq!(report.propagation, Some(PropagationReport::NoopNoChanges));

    assert_eq!(repo.write_count(), 0);
    assert!(tickets.tickets()[0]
        .comments
        .iter()
        .any(|c| c.contains("no deployment update needed")));

    let branches = run_git(
        &fixture.deploy_fork,
        &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
    );
    assert_eq!(branches.trim(), "master", "deployment fork must stay untouched");
}

/// Test: a drifted OS image rewrites the image url and records the build
/// id extracted for the new image.
#[tokio::test(start_paused = true)]
async fn test_os_drift_updates_image_and_build_id() {
    let fixture = fixture();
    let source = source_with(
        &["4.9.11", "4.9.12"],
        &["4.9.0", "4.9.8", "4.9.9"],
        "4.9.12",
    );
    let tickets = MemoryTicketStore::new();
    let host = MemoryCodeHost::new();
    let ci = ScriptedCiRunner::new();
    ci.push_result(Some("SUCCESS"));
    let repo = MemoryConfigRepo::new(fixture.deploy_fork.to_str().unwrap());

    let orchestrator =
        Orchestrator::new(&fixture.config, "bot", &source, &tickets, &host, &ci, &repo);
    orchestrator
        .run(RunMode::Reconcile { dry_run: false })
        .await
        .expect("run failed");

    assert_eq!(
        tickets.tickets()[0].ticket.summary,
        "Default versions need to be updated (4.9: 4.9.11 -> 4.9.12, 4.9 OS: 4.9.8 -> 4.9.9)"
    );

    let json = run_git(
        &fixture.primary_fork,
        &["show", "MGMT-1_update_default_versions:default_ocp_versions.json"],
    );
    assert!(json.contains("/rhcos/4.9/4.9.9/rhcos-4.9.9-x86_64-live.x86_64.iso"));
    assert!(json.contains("\"rhcos_version\": \"49.84.202111170001-0\""));
}
