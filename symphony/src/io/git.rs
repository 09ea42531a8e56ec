//! Git adapter for workspace and publish operations.
//!
//! Publishing needs a small, explicit set of git operations, so we keep a thin
//! wrapper around `git` subprocess calls. Network operations (clone, push) run
//! under a hard timeout and never prompt for credentials.

use std::path::{Path, PathBuf};
use std::process::{Command, Output};
use std::time::Duration;

use anyhow::{Context, Result, anyhow};
use thiserror::Error;
use tracing::{debug, info, instrument};

use crate::core::classifier::{FailureClass, classify_git_failure};
use crate::core::credential::CredentialedUrl;
use crate::io::process::{StdoutMode, run_with_timeout};

const NETWORK_OUTPUT_LIMIT_BYTES: usize = 64 * 1024;

/// Operations the publish pipeline needs from a working copy.
pub trait Repository {
    /// True when there are staged, unstaged, or untracked changes.
    fn is_dirty(&self) -> Result<bool>;
    fn stage_all(&self) -> Result<()>;
    fn commit(&self, message: &str) -> Result<()>;
    /// Create `branch` at HEAD and switch the working copy to it.
    fn create_branch(&self, branch: &str) -> Result<()>;
    /// Non-forced push of `branch` to the same-named branch on `remote`.
    fn push_branch(&self, remote: &str, branch: &str) -> Result<(), PushError>;
}

/// Failure of a `git push`, classified for retry decisions.
#[derive(Debug, Error)]
pub enum PushError {
    #[error("git push {branch} timed out after {timeout_secs}s")]
    TimedOut { branch: String, timeout_secs: u64 },
    #[error("git push {branch} failed: {stderr}")]
    Transient { branch: String, stderr: String },
    #[error("git push {branch} rejected: {stderr}")]
    Rejected { branch: String, stderr: String },
    #[error("git push {branch} could not run: {message}")]
    Spawn { branch: String, message: String },
}

impl PushError {
    pub fn is_transient(&self) -> bool {
        matches!(self, Self::TimedOut { .. } | Self::Transient { .. })
    }
}

/// Parsed `git status --porcelain` entry.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct StatusEntry {
    /// 2-letter XY code, or "??" for untracked.
    pub code: String,
    /// Path for the changed file.
    pub path: String,
}

/// Author used for commits made by the pipeline.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct GitIdentity {
    pub name: String,
    pub email: String,
}

/// Wrapper for executing git commands in a working directory.
#[derive(Debug, Clone)]
pub struct Git {
    workdir: PathBuf,
    identity: Option<GitIdentity>,
    network_timeout: Duration,
    secret: Option<CredentialedUrl>,
}

impl Git {
    pub fn new(workdir: impl Into<PathBuf>) -> Self {
        Self {
            workdir: workdir.into(),
            identity: None,
            network_timeout: Duration::from_secs(120),
            secret: None,
        }
    }

    pub fn with_identity(mut self, identity: GitIdentity) -> Self {
        self.identity = Some(identity);
        self
    }

    pub fn with_network_timeout(mut self, timeout: Duration) -> Self {
        self.network_timeout = timeout;
        self
    }

    /// Scrub this credential from every error message the wrapper produces.
    pub fn with_secret(mut self, secret: CredentialedUrl) -> Self {
        self.secret = Some(secret);
        self
    }

    pub fn workdir(&self) -> &Path {
        &self.workdir
    }

    /// Clone `remote` into `dest` (which must be missing or empty).
    #[instrument(skip_all, fields(dest = %dest.display()))]
    pub fn clone_into(remote: &CredentialedUrl, dest: &Path, timeout: Duration) -> Result<Self> {
        info!(remote = %remote, "cloning repository");
        let mut cmd = Command::new("git");
        cmd.arg("clone")
            .arg("--")
            .arg(remote.expose())
            .arg(dest)
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = run_with_timeout(
            cmd,
            None,
            timeout,
            NETWORK_OUTPUT_LIMIT_BYTES,
            StdoutMode::Capture,
        )
        .context("run git clone")?;
        if output.timed_out {
            return Err(anyhow!("git clone timed out after {}s", timeout.as_secs()));
        }
        if !output.status.success() {
            return Err(anyhow!(
                "git clone failed: {}",
                remote.redact(&output.stderr_lossy())
            ));
        }
        debug!("clone complete");
        Ok(Self::new(dest)
            .with_network_timeout(timeout)
            .with_secret(remote.clone()))
    }

    /// Get status entries (including untracked) in porcelain format.
    pub fn status_porcelain(&self) -> Result<Vec<StatusEntry>> {
        let out = self.run_capture(&["status", "--porcelain=v1", "-uall"])?;
        let mut entries = Vec::new();
        for line in out.lines() {
            if line.trim().is_empty() {
                continue;
            }
            entries.push(parse_status_line(line)?);
        }
        Ok(entries)
    }

    /// Create and checkout a new branch at current HEAD.
    #[instrument(skip_all, fields(branch))]
    pub fn checkout_new_branch(&self, branch: &str) -> Result<()> {
        debug!(branch, "creating and checking out new branch");
        self.run_checked(&["checkout", "-b", branch])?;
        Ok(())
    }

    /// Stage all changes (respects .gitignore).
    pub fn add_all(&self) -> Result<()> {
        self.run_checked(&["add", "-A"])?;
        Ok(())
    }

    /// Commit staged changes with a message, using the configured identity if any.
    #[instrument(skip_all)]
    pub fn commit_staged(&self, message: &str) -> Result<()> {
        let mut args: Vec<String> = Vec::new();
        if let Some(identity) = &self.identity {
            args.push("-c".to_string());
            args.push(format!("user.name={}", identity.name));
            args.push("-c".to_string());
            args.push(format!("user.email={}", identity.email));
        }
        args.extend(["commit", "-m", message].map(str::to_string));
        let args: Vec<&str> = args.iter().map(String::as_str).collect();
        debug!("committing staged changes");
        self.run_checked(&args)?;
        Ok(())
    }

    /// Push `branch` to `remote` as `branch:branch`, without force.
    #[instrument(skip_all, fields(remote, branch))]
    pub fn push(&self, remote: &str, branch: &str) -> Result<(), PushError> {
        let refspec = format!("{branch}:{branch}");
        let mut cmd = Command::new("git");
        cmd.args(["push", remote, &refspec])
            .current_dir(&self.workdir)
            .env("GIT_TERMINAL_PROMPT", "0");

        let output = run_with_timeout(
            cmd,
            None,
            self.network_timeout,
            NETWORK_OUTPUT_LIMIT_BYTES,
            StdoutMode::Capture,
        )
        .map_err(|err| PushError::Spawn {
            branch: branch.to_string(),
            message: self.scrub(&format!("{err:#}")),
        })?;

        if output.timed_out {
            return Err(PushError::TimedOut {
                branch: branch.to_string(),
                timeout_secs: self.network_timeout.as_secs(),
            });
        }
        if output.status.success() {
            info!("branch pushed");
            return Ok(());
        }

        let stderr = self.scrub(&output.stderr_lossy());
        match classify_git_failure(&stderr) {
            FailureClass::Transient => Err(PushError::Transient {
                branch: branch.to_string(),
                stderr,
            }),
            FailureClass::Terminal => Err(PushError::Rejected {
                branch: branch.to_string(),
                stderr,
            }),
        }
    }

    fn scrub(&self, text: &str) -> String {
        match &self.secret {
            Some(secret) => secret.redact(text),
            None => text.to_string(),
        }
    }

    fn run_capture(&self, args: &[&str]) -> Result<String> {
        let output = self.run_checked(args)?;
        Ok(String::from_utf8_lossy(&output.stdout).to_string())
    }

    fn run_checked(&self, args: &[&str]) -> Result<Output> {
        let output = self.run(args)?;
        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(anyhow!(
                "git {} failed: {}",
                args.join(" "),
                self.scrub(stderr.trim())
            ));
        }
        Ok(output)
    }

    fn run(&self, args: &[&str]) -> Result<Output> {
        Command::new("git")
            .args(args)
            .current_dir(&self.workdir)
            .output()
            .with_context(|| format!("spawn git {}", args.join(" ")))
    }
}

impl Repository for Git {
    fn is_dirty(&self) -> Result<bool> {
        Ok(!self.status_porcelain()?.is_empty())
    }

    fn stage_all(&self) -> Result<()> {
        self.add_all()
    }

    fn commit(&self, message: &str) -> Result<()> {
        self.commit_staged(message)
    }

    fn create_branch(&self, branch: &str) -> Result<()> {
        self.checkout_new_branch(branch)
    }

    fn push_branch(&self, remote: &str, branch: &str) -> Result<(), PushError> {
        self.push(remote, branch)
    }
}

fn parse_status_line(line: &str) -> Result<StatusEntry> {
    if let Some(path) = line.strip_prefix("?? ") {
        return Ok(StatusEntry {
            code: "??".to_string(),
            path: path.trim().to_string(),
        });
    }
    if line.len() < 4 {
        return Err(anyhow!("unexpected porcelain line: '{line}'"));
    }
    let code = line[..2].to_string();
    let mut path = line[3..].trim().to_string();
    if let Some((_, new)) = path.split_once("->") {
        path = new.trim().to_string();
    }
    Ok(StatusEntry { code, path })
}
