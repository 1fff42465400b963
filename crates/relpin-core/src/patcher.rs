//! Primary-repository patching: clone, substitute, regenerate, commit,
//! push.
//!
//! Working copies are run-scoped. Every run starts from a fresh clone
//! reset hard to the upstream default branch, so no local state survives
//! between runs.

use std::path::{Path, PathBuf};
use std::process::Command;

use tracing::info;

use crate::config::PatchConfig;
use crate::error::{PipelineError, Result};
use crate::feed::PinnedDocument;

fn run_git(cwd: Option<&Path>, ssh_key: Option<&Path>, args: &[&str]) -> Result<String> {
    let mut command = Command::new("git");
    command.args(args);
    if let Some(dir) = cwd {
        command.current_dir(dir);
    }
    if let Some(key) = ssh_key {
        command.env(
            "GIT_SSH_COMMAND",
            format!("ssh -o StrictHostKeyChecking=accept-new -i '{}'", key.display()),
        );
    }

    let output = command
        .output()
        .map_err(|e| PipelineError::Git(format!("failed to run git: {e}")))?;

    if !output.status.success() {
        let stderr = String::from_utf8_lossy(&output.stderr);
        return Err(PipelineError::Git(format!("git {args:?} failed: {stderr}")));
    }

    Ok(String::from_utf8_lossy(&output.stdout).into_owned())
}

/// A cloned repository the run owns exclusively.
#[derive(Debug)]
pub struct GitWorkspace {
    root: PathBuf,
    ssh_key: Option<PathBuf>,
}

impl GitWorkspace {
    /// Clone `url` into `dir` (which must not exist yet). `shallow` clones
    /// depth 1; `ssh_key` is injected via `GIT_SSH_COMMAND` for hosts
    /// reached over ssh.
    pub fn clone(url: &str, dir: &Path, shallow: bool, ssh_key: Option<&Path>) -> Result<Self> {
        let dest = dir.to_string_lossy().into_owned();
        let mut args = vec!["clone"];
        if shallow {
            args.push("--depth=1");
        }
        args.push(url);
        args.push(&dest);
        run_git(None, ssh_key, &args)?;

        Ok(Self {
            root: dir.to_path_buf(),
            ssh_key: ssh_key.map(Path::to_path_buf),
        })
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn git(&self, args: &[&str]) -> Result<String> {
        run_git(Some(&self.root), self.ssh_key.as_deref(), args)
    }

    pub fn add_remote(&self, name: &str, url: &str) -> Result<()> {
        self.git(&["remote", "add", name, url]).map(|_| ())
    }

    pub fn fetch(&self, remote: &str) -> Result<()> {
        self.git(&["fetch", remote]).map(|_| ())
    }

    /// Deepen a shallow clone to full history, needed before branching off.
    /// A clone that is already complete is left alone, since git rejects
    /// `--unshallow` on one.
    pub fn fetch_unshallow(&self, remote: &str) -> Result<()> {
        let shallow = self.git(&["rev-parse", "--is-shallow-repository"])?;
        if shallow.trim() == "true" {
            self.git(&["fetch", "--unshallow", remote])?;
        }
        Ok(())
    }

    pub fn reset_hard(&self, refspec: &str) -> Result<()> {
        self.git(&["reset", "--hard", refspec]).map(|_| ())
    }

    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        self.git(&["checkout", "-b", branch]).map(|_| ())
    }

    pub fn commit_all(&self, message: &str) -> Result<()> {
        self.git(&["commit", "-a", "-m", message]).map(|_| ())
    }

    /// Paths reported by `git status --porcelain`.
    pub fn dirty_paths(&self) -> Result<Vec<String>> {
        let status = self.git(&["status", "--porcelain"])?;
        Ok(status.lines().map(str::to_string).collect())
    }

    pub fn push(&self, remote: &str, refspec: &str) -> Result<()> {
        self.git(&["push", remote, refspec]).map(|_| ())
    }

    pub fn push_set_upstream(&self, remote: &str, branch: &str) -> Result<()> {
        self.git(&["push", "--set-upstream", remote, branch]).map(|_| ())
    }
}

/// Applies the version update to the primary repository.
pub struct RepoPatcher<'a> {
    config: &'a PatchConfig,
    workspace: GitWorkspace,
}

impl<'a> RepoPatcher<'a> {
    /// Clone `clone_url` into `dir` and reset it hard to the upstream
    /// default branch, so the patch applies to current upstream state no
    /// matter how stale the fork is.
    pub fn prepare(config: &'a PatchConfig, clone_url: &str, dir: &Path) -> Result<Self> {
        let workspace = GitWorkspace::clone(clone_url, dir, true, None)?;
        workspace.add_remote("upstream", &config.upstream_url)?;
        workspace.fetch("upstream")?;
        workspace.reset_hard(&format!("upstream/{}", config.default_branch))?;
        Ok(Self { config, workspace })
    }

    pub fn workspace(&self) -> &GitWorkspace {
        &self.workspace
    }

    fn file_path(&self, relative: &str) -> PathBuf {
        self.workspace.root().join(relative)
    }

    /// Replace every occurrence of each version-bearing pattern built from
    /// `old` with its `new` counterpart, across the configured file list.
    /// Purely textual; files that are not reliably parseable are patched
    /// the same way as the structured ones.
    pub fn apply_substitutions(&self, old: &str, new: &str) -> Result<()> {
        for file in &self.config.substituted_files {
            let path = self.file_path(file);
            let mut content = std::fs::read_to_string(&path)?;

            for context in &self.config.replace_contexts {
                let old_pattern = context.replace("{version}", old);
                let new_pattern = context.replace("{version}", new);
                info!(
                    file = %path.display(),
                    old = %old_pattern,
                    new = %new_pattern,
                    "substituting version pattern"
                );
                content = content.replace(&old_pattern, &new_pattern);
            }

            std::fs::write(&path, content)?;
        }
        Ok(())
    }

    /// Rewrite the version map file from the updated document, keeping its
    /// 8-space indentation.
    pub fn write_version_map(&self, doc: &PinnedDocument) -> Result<()> {
        let path = self.file_path(&self.config.version_map_file);
        std::fs::write(&path, doc.to_json_indented()?)?;
        info!(file = %path.display(), "version map rewritten");
        Ok(())
    }

    /// Run the project-defined regeneration command in the working copy.
    /// Exit 0 and the configured no-changes code are success; anything
    /// else aborts the run.
    pub fn verify(&self) -> Result<()> {
        let command = &self.config.verify_command;
        if command.is_empty() {
            return Ok(());
        }

        info!(command = %command.join(" "), "running regeneration command");
        let output = Command::new(&command[0])
            .args(&command[1..])
            .current_dir(self.workspace.root())
            .output()?;

        let code = output.status.code();
        if output.status.success() || code == Some(self.config.no_changes_exit_code) {
            return Ok(());
        }

        Err(PipelineError::VerificationFailed {
            command: command.join(" "),
            code,
        })
    }

    /// The serialized version map as the templated configuration document
    /// carries it after regeneration; this exact value is what propagates
    /// downstream.
    pub fn template_parameter(&self) -> Result<String> {
        let path = self.file_path(&self.config.template_file);
        let text = std::fs::read_to_string(&path)?;
        let value: serde_yaml::Value = serde_yaml::from_str(&text)?;

        let name = &self.config.template_parameter;
        value
            .get("parameters")
            .and_then(|p| p.as_sequence())
            .and_then(|params| {
                params.iter().find(|param| {
                    param.get("name").and_then(|n| n.as_str()) == Some(name.as_str())
                })
            })
            .and_then(|param| param.get("value"))
            .and_then(|v| v.as_str())
            .map(str::to_string)
            .ok_or_else(|| {
                PipelineError::MalformedDocument(format!(
                    "parameter {} not found in {}",
                    name,
                    self.config.template_file
                ))
            })
    }

    /// Commit all patched files, run regeneration, commit its side effects
    /// when there are any, and push the result to `HEAD:<branch>` on
    /// origin.
    pub fn commit_and_push(&self, ticket: &str, branch: &str) -> Result<()> {
        self.workspace
            .commit_all(&format!("{ticket} Updating versions to latest releases"))?;

        self.verify()?;

        let dirty = self.workspace.dirty_paths()?;
        if !dirty.is_empty() {
            for line in &dirty {
                info!(change = %line, "regeneration changed a file");
            }
            self.workspace
                .commit_all(&format!("{ticket} Updating generated files"))?;
        }

        self.workspace.push("origin", &format!("HEAD:{branch}"))?;
        info!(branch = %branch, "pushed update branch");
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Once;

    static GIT_IDENTITY: Once = Once::new();

    fn ensure_git_identity() {
        GIT_IDENTITY.call_once(|| {
            std::env::set_var("GIT_AUTHOR_NAME", "test-user");
            std::env::set_var("GIT_AUTHOR_EMAIL", "test@example.com");
            std::env::set_var("GIT_COMMITTER_NAME", "test-user");
            std::env::set_var("GIT_COMMITTER_EMAIL", "test@example.com");
        });
    }

    fn run_git_in(dir: &Path, args: &[&str]) -> String {
        let output = Command::new("git")
            .args(args)
            .current_dir(dir)
            .output()
            .unwrap();
        assert!(
            output.status.success(),
            "git {:?} failed: {}",
            args,
            String::from_utf8_lossy(&output.stderr)
        );
        String::from_utf8_lossy(&output.stdout).into_owned()
    }

    /// Builds an upstream working repo with the patched file set, plus a
    /// bare fork of it, and returns (tempdir, upstream_path, fork_path).
    fn make_fixture() -> (tempfile::TempDir, PathBuf, PathBuf) {
        ensure_git_identity();
        let dir = tempfile::tempdir().unwrap();
        let upstream = dir.path().join("upstream");
        std::fs::create_dir_all(upstream.join("config")).unwrap();
        std::fs::create_dir_all(upstream.join("openshift")).unwrap();

        std::fs::write(
            upstream.join("default_ocp_versions.json"),
            "{\n        \"4.9\": {\n                \"display_name\": \"4.9.11\",\n                \"release_image\": \"quay.io/openshift-release-dev/ocp-release:4.9.11-x86_64\",\n                \"rhcos_image\": \"https://mirror.openshift.com/pub/openshift-v4/dependencies/rhcos/4.9/49.84.1/rhcos-49.84.1-x86_64-live.x86_64.iso\",\n                \"rhcos_version\": \"49.84.1\"\n        }\n}",
        )
        .unwrap();
        std::fs::write(
            upstream.join("config/onprem-iso-fcc.yaml"),
            "image: \"4.9.11\"\nrelease: ocp-release:4.9.11\n",
        )
        .unwrap();
        std::fs::write(
            upstream.join("onprem-environment"),
            "OPENSHIFT_VERSION=\"4.9.11\"\n",
        )
        .unwrap();
        std::fs::write(
            upstream.join("openshift/template.yaml"),
            "parameters:\n- name: OPENSHIFT_VERSIONS\n  value: '{\"4.9\": \"4.9.11\"}'\n- name: OTHER\n  value: unused\n",
        )
        .unwrap();

        run_git_in(&upstream, &["init"]);
        run_git_in(&upstream, &["add", "-A"]);
        run_git_in(&upstream, &["commit", "-m", "initial"]);
        run_git_in(&upstream, &["branch", "-M", "master"]);

        let fork = dir.path().join("fork.git");
        run_git_in(
            dir.path(),
            &[
                "clone",
                "--bare",
                upstream.to_str().unwrap(),
                fork.to_str().unwrap(),
            ],
        );

        (dir, upstream, fork)
    }

    fn config_for(upstream: &Path) -> PatchConfig {
        PatchConfig {
            upstream_url: upstream.to_string_lossy().into_owned(),
            verify_command: vec!["true".to_string()],
            ..PatchConfig::default()
        }
    }

    #[test]
    fn prepare_resets_to_upstream_head() {
        let (dir, upstream, fork) = make_fixture();

        // Upstream moves ahead of the fork.
        std::fs::write(upstream.join("onprem-environment"), "OPENSHIFT_VERSION=\"4.9.12\"\n")
            .unwrap();
        run_git_in(&upstream, &["commit", "-a", "-m", "bump"]);

        let config = config_for(&upstream);
        let work = dir.path().join("work");
        let patcher =
            RepoPatcher::prepare(&config, fork.to_str().unwrap(), &work).unwrap();

        let content =
            std::fs::read_to_string(patcher.workspace().root().join("onprem-environment")).unwrap();
        assert!(content.contains("4.9.12"));
    }

    #[test]
    fn substitutions_rewrite_both_patterns_across_files() {
        let (dir, upstream, fork) = make_fixture();
        let config = config_for(&upstream);
        let work = dir.path().join("work");
        let patcher = RepoPatcher::prepare(&config, fork.to_str().unwrap(), &work).unwrap();

        patcher.apply_substitutions("4.9.11", "4.9.12").unwrap();

        let json =
            std::fs::read_to_string(work.join("default_ocp_versions.json")).unwrap();
        assert!(json.contains("\"4.9.12\""));
        assert!(json.contains("ocp-release:4.9.12-x86_64"));
        assert!(!json.contains("4.9.11\""));

        let fcc = std::fs::read_to_string(work.join("config/onprem-iso-fcc.yaml")).unwrap();
        assert_eq!(fcc, "image: \"4.9.12\"\nrelease: ocp-release:4.9.12\n");

        let env = std::fs::read_to_string(work.join("onprem-environment")).unwrap();
        assert_eq!(env, "OPENSHIFT_VERSION=\"4.9.12\"\n");
    }

    #[test]
    fn substitution_leaves_unrelated_versions_alone() {
        let (dir, upstream, fork) = make_fixture();
        let config = config_for(&upstream);
        let work = dir.path().join("work");
        let patcher = RepoPatcher::prepare(&config, fork.to_str().unwrap(), &work).unwrap();

        // Bare occurrence without quotes or image prefix must not change.
        std::fs::write(work.join("onprem-environment"), "raw 4.9.11 and \"4.9.11\"\n").unwrap();
        patcher.apply_substitutions("4.9.11", "4.9.12").unwrap();

        let env = std::fs::read_to_string(work.join("onprem-environment")).unwrap();
        assert_eq!(env, "raw 4.9.11 and \"4.9.12\"\n");
    }

    #[test]
    fn commit_and_push_creates_branch_on_origin() {
        let (dir, upstream, fork) = make_fixture();
        let config = config_for(&upstream);
        let work = dir.path().join("work");
        let patcher = RepoPatcher::prepare(&config, fork.to_str().unwrap(), &work).unwrap();

        patcher.apply_substitutions("4.9.11", "4.9.12").unwrap();
        patcher
            .commit_and_push("MGMT-7", "MGMT-7_update_default_versions")
            .unwrap();

        let heads = run_git_in(&fork, &["branch", "--list", "MGMT-7_update_default_versions"]);
        assert!(heads.contains("MGMT-7_update_default_versions"));
        assert!(patcher.workspace().dirty_paths().unwrap().is_empty());
    }

    #[test]
    fn regeneration_side_effects_land_in_second_commit() {
        let (dir, upstream, fork) = make_fixture();
        let mut config = config_for(&upstream);
        config.verify_command = vec![
            "sh".to_string(),
            "-c".to_string(),
            "echo regenerated >> onprem-environment".to_string(),
        ];
        let work = dir.path().join("work");
        let patcher = RepoPatcher::prepare(&config, fork.to_str().unwrap(), &work).unwrap();

        patcher.apply_substitutions("4.9.11", "4.9.12").unwrap();
        patcher.commit_and_push("MGMT-8", "MGMT-8_update_default_versions").unwrap();

        let count = run_git_in(&work, &["rev-list", "--count", "upstream/master..HEAD"]);
        assert_eq!(count.trim(), "2");
    }

    #[test]
    fn verify_accepts_no_changes_exit_code() {
        let (dir, upstream, fork) = make_fixture();
        let mut config = config_for(&upstream);
        config.verify_command = vec!["sh".to_string(), "-c".to_string(), "exit 2".to_string()];
        let work = dir.path().join("work");
        let patcher = RepoPatcher::prepare(&config, fork.to_str().unwrap(), &work).unwrap();
        assert!(patcher.verify().is_ok());
    }

    #[test]
    fn verify_rejects_other_exit_codes() {
        let (dir, upstream, fork) = make_fixture();
        let mut config = config_for(&upstream);
        config.verify_command = vec!["sh".to_string(), "-c".to_string(), "exit 3".to_string()];
        let work = dir.path().join("work");
        let patcher = RepoPatcher::prepare(&config, fork.to_str().unwrap(), &work).unwrap();

        match patcher.verify() {
            Err(PipelineError::VerificationFailed { code, .. }) => assert_eq!(code, Some(3)),
            other => panic!("expected VerificationFailed, got {other:?}"),
        }
    }

    #[test]
    fn template_parameter_reads_named_value() {
        let (dir, upstream, fork) = make_fixture();
        let config = config_for(&upstream);
        let work = dir.path().join("work");
        let patcher = RepoPatcher::prepare(&config, fork.to_str().unwrap(), &work).unwrap();

        let value = patcher.template_parameter().unwrap();
        assert_eq!(value, "{\"4.9\": \"4.9.11\"}");
    }

    #[test]
    fn template_parameter_missing_is_an_error() {
        let (dir, upstream, fork) = make_fixture();
        let mut config = config_for(&upstream);
        config.template_parameter = "NO_SUCH_PARAMETER".to_string();
        let work = dir.path().join("work");
        let patcher = RepoPatcher::prepare(&config, fork.to_str().unwrap(), &work).unwrap();

        assert!(matches!(
            patcher.template_parameter(),
            Err(PipelineError::MalformedDocument(_))
        ));
    }
}
