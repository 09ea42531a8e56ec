//! Test-only fakes for the publish pipeline and a local git remote fixture.

use std::cell::{Cell, RefCell};
use std::collections::VecDeque;
use std::fs;
use std::path::{Path, PathBuf};
use std::process::Command;
use std::time::Duration;

use anyhow::{Context, Result, anyhow, bail};
use serde_json::Value;
use tempfile::TempDir;

use crate::core::credential::CredentialedUrl;
use crate::core::retry::Sleeper;
use crate::io::executor::{ExecRequest, Executor};
use crate::io::git::{Git, GitIdentity, PushError, Repository};
use crate::io::github::{HostError, NewPullRequest, PullRequestHost};

pub const DEFAULT_PR_URL: &str = "https://github.com/acme/widgets/pull/1";

pub fn test_identity() -> GitIdentity {
    GitIdentity {
        name: "Symphony Test".to_string(),
        email: "test@symphony.invalid".to_string(),
    }
}

/// In-memory [`Repository`] that records every call.
#[derive(Debug, Default)]
pub struct ScriptedRepository {
    dirty: bool,
    commit_error: RefCell<Option<anyhow::Error>>,
    push_results: RefCell<VecDeque<Result<(), PushError>>>,
    calls: RefCell<Vec<String>>,
}

impl ScriptedRepository {
    pub fn dirty() -> Self {
        Self {
            dirty: true,
            ..Self::default()
        }
    }

    pub fn clean() -> Self {
        Self::default()
    }

    pub fn failing_commit(self, err: anyhow::Error) -> Self {
        *self.commit_error.borrow_mut() = Some(err);
        self
    }

    /// Results for successive pushes; once exhausted, pushes succeed.
    pub fn with_push_results(self, results: Vec<Result<(), PushError>>) -> Self {
        *self.push_results.borrow_mut() = results.into();
        self
    }

    pub fn calls(&self) -> Vec<String> {
        self.calls.borrow().clone()
    }

    pub fn push_count(&self) -> usize {
        self.calls
            .borrow()
            .iter()
            .filter(|call| call.starts_with("push "))
            .count()
    }

    /// Branches passed to `create_branch`, in order.
    pub fn created_branches(&self) -> Vec<String> {
        self.calls
            .borrow()
            .iter()
            .filter_map(|call| call.strip_prefix("create_branch "))
            .map(str::to_string)
            .collect()
    }

    pub fn transient_push() -> PushError {
        PushError::Transient {
            branch: "scripted".to_string(),
            stderr: "fatal: unable to access: Could not resolve host: github.com".to_string(),
        }
    }

    pub fn rejected_push() -> PushError {
        PushError::Rejected {
            branch: "scripted".to_string(),
            stderr: "fatal: Authentication failed".to_string(),
        }
    }

    fn record(&self, call: String) {
        self.calls.borrow_mut().push(call);
    }
}

impl Repository for ScriptedRepository {
    fn is_dirty(&self) -> Result<bool> {
        self.record("is_dirty".to_string());
        Ok(self.dirty)
    }

    fn stage_all(&self) -> Result<()> {
        self.record("stage_all".to_string());
        Ok(())
    }

    fn commit(&self, message: &str) -> Result<()> {
        self.record(format!("commit {message}"));
        match self.commit_error.borrow_mut().take() {
            Some(err) => Err(err),
            None => Ok(()),
        }
    }

    fn create_branch(&self, branch: &str) -> Result<()> {
        self.record(format!("create_branch {branch}"));
        Ok(())
    }

    fn push_branch(&self, remote: &str, branch: &str) -> Result<(), PushError> {
        self.record(format!("push {remote} {branch}"));
        self.push_results.borrow_mut().pop_front().unwrap_or(Ok(()))
    }
}

/// In-memory [`PullRequestHost`] with scripted responses.
#[derive(Debug)]
pub struct ScriptedHost {
    default_branch: String,
    default_branch_results: RefCell<VecDeque<Result<String, HostError>>>,
    pr_results: RefCell<VecDeque<Result<String, HostError>>>,
    requests: RefCell<Vec<NewPullRequest>>,
    default_branch_calls: Cell<u32>,
}

impl Default for ScriptedHost {
    fn default() -> Self {
        Self {
            default_branch: "main".to_string(),
            default_branch_results: RefCell::default(),
            pr_results: RefCell::default(),
            requests: RefCell::default(),
            default_branch_calls: Cell::new(0),
        }
    }
}

impl ScriptedHost {
    pub fn with_default_branch(mut self, branch: &str) -> Self {
        self.default_branch = branch.to_string();
        self
    }

    /// Results for successive default-branch lookups; then the configured branch.
    pub fn with_default_branch_results(self, results: Vec<Result<String, HostError>>) -> Self {
        *self.default_branch_results.borrow_mut() = results.into();
        self
    }

    /// Results for successive pull request creations; then [`DEFAULT_PR_URL`].
    pub fn with_pr_results(self, results: Vec<Result<String, HostError>>) -> Self {
        *self.pr_results.borrow_mut() = results.into();
        self
    }

    /// Every pull request creation attempt, including failed ones.
    pub fn pull_requests(&self) -> Vec<NewPullRequest> {
        self.requests.borrow().clone()
    }

    pub fn default_branch_calls(&self) -> u32 {
        self.default_branch_calls.get()
    }

    pub fn rate_limited() -> HostError {
        HostError::Api {
            endpoint: "https://api.github.com/repos/acme/widgets/pulls".to_string(),
            status: 403,
            message: "API rate limit exceeded".to_string(),
        }
    }

    pub fn server_error() -> HostError {
        HostError::Api {
            endpoint: "https://api.github.com/repos/acme/widgets/pulls".to_string(),
            status: 502,
            message: "Bad Gateway".to_string(),
        }
    }

    pub fn unprocessable() -> HostError {
        HostError::Api {
            endpoint: "https://api.github.com/repos/acme/widgets/pulls".to_string(),
            status: 422,
            message: "Validation Failed".to_string(),
        }
    }

    pub fn connection_refused() -> HostError {
        HostError::Transport {
            endpoint: "https://api.github.com/repos/acme/widgets".to_string(),
            message: "error trying to connect: Connection refused".to_string(),
            transient: true,
        }
    }
}

impl PullRequestHost for ScriptedHost {
    fn default_branch(&self) -> Result<String, HostError> {
        self.default_branch_calls.set(self.default_branch_calls.get() + 1);
        self.default_branch_results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(self.default_branch.clone()))
    }

    fn create_pull_request(&self, request: &NewPullRequest) -> Result<String, HostError> {
        self.requests.borrow_mut().push(request.clone());
        self.pr_results
            .borrow_mut()
            .pop_front()
            .unwrap_or_else(|| Ok(DEFAULT_PR_URL.to_string()))
    }
}

/// [`Sleeper`] that records waits instead of sleeping.
#[derive(Debug, Default)]
pub struct RecordingSleeper {
    waits: RefCell<Vec<Duration>>,
}

impl RecordingSleeper {
    pub fn waits(&self) -> Vec<Duration> {
        self.waits.borrow().clone()
    }
}

impl Sleeper for RecordingSleeper {
    fn sleep(&self, duration: Duration) {
        self.waits.borrow_mut().push(duration);
    }
}

/// [`Executor`] that writes scripted JSON outputs, one per call.
#[derive(Debug, Default)]
pub struct ScriptedExecutor {
    outputs: RefCell<VecDeque<Result<Value, String>>>,
    prompts: RefCell<Vec<String>>,
}

impl ScriptedExecutor {
    pub fn new(outputs: Vec<Result<Value, String>>) -> Self {
        Self {
            outputs: RefCell::new(outputs.into()),
            prompts: RefCell::default(),
        }
    }

    /// Prompts received so far, in call order.
    pub fn prompts(&self) -> Vec<String> {
        self.prompts.borrow().clone()
    }
}

impl Executor for ScriptedExecutor {
    fn exec(&self, request: &ExecRequest) -> Result<()> {
        self.prompts.borrow_mut().push(request.prompt.clone());
        let next = self
            .outputs
            .borrow_mut()
            .pop_front()
            .ok_or_else(|| anyhow!("scripted executor has no output left"))?;
        let value = next.map_err(|msg| anyhow!(msg))?;
        fs::write(&request.output_path, serde_json::to_string_pretty(&value)?)
            .with_context(|| format!("write {}", request.output_path.display()))?;
        Ok(())
    }
}

/// A bare repository with one commit on `main`, in a temp directory.
#[derive(Debug)]
pub struct GitFixture {
    dir: TempDir,
    remote: PathBuf,
    clones: Cell<u32>,
}

impl GitFixture {
    pub fn new() -> Result<Self> {
        let dir = tempfile::tempdir().context("create fixture dir")?;
        let remote = dir.path().join("remote.git");
        let seed = dir.path().join("seed");
        fs::create_dir_all(&seed).context("create seed dir")?;

        run_git(dir.path(), &["init", "--bare", "-b", "main", "remote.git"])?;
        run_git(&seed, &["init", "-b", "main"])?;
        fs::write(seed.join("README.md"), "# widgets\n").context("write README")?;
        run_git(&seed, &["add", "-A"])?;
        let identity = test_identity();
        run_git(
            &seed,
            &[
                "-c",
                &format!("user.name={}", identity.name),
                "-c",
                &format!("user.email={}", identity.email),
                "commit",
                "-m",
                "initial commit",
            ],
        )?;
        let remote_arg = remote.display().to_string();
        run_git(&seed, &["push", &remote_arg, "main"])?;

        Ok(Self {
            dir,
            remote,
            clones: Cell::new(0),
        })
    }

    pub fn remote_url(&self) -> String {
        self.remote.display().to_string()
    }

    pub fn remote_path(&self) -> &Path {
        &self.remote
    }

    /// Fresh clone of the remote with the test identity configured.
    pub fn clone_git(&self) -> Result<Git> {
        let n = self.clones.get() + 1;
        self.clones.set(n);
        let dest = self.dir.path().join(format!("clone-{n}"));
        let remote = CredentialedUrl::new(&self.remote_url(), "");
        Ok(Git::clone_into(&remote, &dest, Duration::from_secs(60))?.with_identity(test_identity()))
    }

    pub fn remote_has_branch(&self, branch: &str) -> Result<bool> {
        let status = Command::new("git")
            .arg("--git-dir")
            .arg(&self.remote)
            .args(["show-ref", "--verify", "--quiet", &format!("refs/heads/{branch}")])
            .status()
            .context("spawn git show-ref")?;
        Ok(status.success())
    }

    /// Branch names on the remote, sorted.
    pub fn remote_branches(&self) -> Result<Vec<String>> {
        let out = run_git_dir(
            &self.remote,
            &["for-each-ref", "--format=%(refname:short)", "refs/heads"],
        )?;
        let mut branches: Vec<String> = out.lines().map(str::to_string).collect();
        branches.sort();
        Ok(branches)
    }

    /// Contents of `path` at the tip of `branch` on the remote.
    pub fn remote_file(&self, branch: &str, path: &str) -> Result<String> {
        run_git_dir(&self.remote, &["show", &format!("{branch}:{path}")])
    }

    /// Subject line of the tip commit of `branch` on the remote.
    pub fn remote_subject(&self, branch: &str) -> Result<String> {
        let out = run_git_dir(&self.remote, &["log", "-1", "--format=%s", branch])?;
        Ok(out.trim().to_string())
    }
}

fn run_git(cwd: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .args(args)
        .current_dir(cwd)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}

fn run_git_dir(git_dir: &Path, args: &[&str]) -> Result<String> {
    let output = Command::new("git")
        .arg("--git-dir")
        .arg(git_dir)
        .args(args)
        .output()
        .with_context(|| format!("spawn git {}", args.join(" ")))?;
    if !output.status.success() {
        bail!(
            "git {} failed: {}",
            args.join(" "),
            String::from_utf8_lossy(&output.stderr).trim()
        );
    }
    Ok(String::from_utf8_lossy(&output.stdout).to_string())
}
