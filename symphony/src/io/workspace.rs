//! Workspace creation and teardown.
//!
//! A [`Workspace`] is an authenticated clone of a remote repository. It exists
//! only after a successful clone and is torn down exactly once: explicitly via
//! [`Workspace::teardown`], or on drop (including panic unwinding).

use std::fs;
use std::io;
use std::path::{Path, PathBuf};
use std::time::Duration;

use rand::RngCore;
use tempfile::TempDir;
use thiserror::Error;
use tracing::{info, instrument, warn};

use crate::core::credential::CredentialedUrl;
use crate::core::types::LifecyclePolicy;
use crate::io::config::SymphonyConfig;
use crate::io::files::FileAccess;
use crate::io::git::{Git, GitIdentity};

#[derive(Debug, Error)]
pub enum WorkspaceError {
    #[error("failed to clone repository: {0}")]
    Clone(String),
    #[error("failed to prepare workspace {path}: {message}")]
    Prepare { path: PathBuf, message: String },
}

#[derive(Debug, Clone)]
pub struct WorkspaceSettings {
    pub persistent_dir: PathBuf,
    pub temp_prefix: String,
    /// Parent for ephemeral directories; the system temp dir when `None`.
    pub temp_root: Option<PathBuf>,
    pub network_timeout: Duration,
    pub identity: GitIdentity,
}

impl WorkspaceSettings {
    pub fn from_config(cfg: &SymphonyConfig) -> Self {
        Self {
            persistent_dir: cfg.workspace.persistent_dir.clone(),
            temp_prefix: cfg.workspace.temp_prefix.clone(),
            temp_root: None,
            network_timeout: cfg.network.timeout(),
            identity: cfg.git.identity(),
        }
    }
}

/// Removes a stale persistent directory.
pub type DirRemover = fn(&Path) -> io::Result<()>;

/// Creates workspaces according to a [`LifecyclePolicy`].
#[derive(Debug, Clone)]
pub struct WorkspaceManager {
    settings: WorkspaceSettings,
    remove_dir: DirRemover,
}

impl WorkspaceManager {
    pub fn new(settings: WorkspaceSettings) -> Self {
        Self {
            settings,
            remove_dir: |path| fs::remove_dir_all(path),
        }
    }

    pub fn with_remover(mut self, remove_dir: DirRemover) -> Self {
        self.remove_dir = remove_dir;
        self
    }

    /// Clone `repo_url` (authenticated with `token`) into a fresh workspace.
    #[instrument(skip_all, fields(policy = ?policy))]
    pub fn create(
        &self,
        repo_url: &str,
        token: &str,
        policy: LifecyclePolicy,
    ) -> Result<Workspace, WorkspaceError> {
        let remote = CredentialedUrl::new(repo_url, token);
        let (root, temp) = match policy {
            LifecyclePolicy::Persistent => (self.prepare_persistent()?, None),
            LifecyclePolicy::Ephemeral => {
                let temp = self.make_temp_dir()?;
                (temp.path().to_path_buf(), Some(temp))
            }
        };

        let git = Git::clone_into(&remote, &root, self.settings.network_timeout)
            .map_err(|err| WorkspaceError::Clone(remote.redact(&format!("{err:#}"))))?
            .with_identity(self.settings.identity.clone());

        info!(root = %root.display(), "workspace ready");
        Ok(Workspace {
            root,
            policy,
            remote,
            git,
            temp,
            torn_down: false,
        })
    }

    /// The configured debug directory, emptied; or a fresh sibling when the
    /// stale one cannot be cleared.
    fn prepare_persistent(&self) -> Result<PathBuf, WorkspaceError> {
        let path = absolute(&self.settings.persistent_dir)?;
        let root = if path.exists() && !self.purge(&path) {
            let fallback = sibling_dir(&path, &mut rand::thread_rng());
            warn!(
                stale = %path.display(),
                path = %fallback.display(),
                "previous workspace could not be cleared, using a fresh directory"
            );
            fallback
        } else {
            path
        };
        fs::create_dir_all(&root).map_err(|err| WorkspaceError::Prepare {
            path: root.clone(),
            message: err.to_string(),
        })?;
        Ok(root)
    }

    /// Best-effort removal of a stale directory. Returns true when `path` is
    /// gone or empty afterwards.
    fn purge(&self, path: &Path) -> bool {
        info!(path = %path.display(), "removing previous debug workspace");
        let err = match (self.remove_dir)(path) {
            Ok(()) => return true,
            Err(err) => err,
        };
        warn!(path = %path.display(), err = %err, "could not remove previous workspace, clearing entries");

        let entries = match fs::read_dir(path) {
            Ok(entries) => entries,
            Err(_) => return !path.exists(),
        };
        for entry in entries.filter_map(Result::ok) {
            let entry_path = entry.path();
            let result = match entry.file_type() {
                Ok(kind) if kind.is_dir() => (self.remove_dir)(&entry_path),
                _ => fs::remove_file(&entry_path),
            };
            if let Err(err) = result {
                warn!(path = %entry_path.display(), err = %err, "could not remove stale entry");
            }
        }
        is_empty_dir(path)
    }

    fn make_temp_dir(&self) -> Result<TempDir, WorkspaceError> {
        let mut builder = tempfile::Builder::new();
        builder.prefix(&self.settings.temp_prefix);
        let result = match &self.settings.temp_root {
            Some(parent) => builder.tempdir_in(parent),
            None => builder.tempdir(),
        };
        result.map_err(|err| WorkspaceError::Prepare {
            path: self
                .settings
                .temp_root
                .clone()
                .unwrap_or_else(std::env::temp_dir),
            message: err.to_string(),
        })
    }
}

fn is_empty_dir(path: &Path) -> bool {
    fs::read_dir(path).is_ok_and(|mut entries| entries.next().is_none())
}

/// `<dir>-<8 hex>` next to `path`.
fn sibling_dir<R: RngCore + ?Sized>(path: &Path, rng: &mut R) -> PathBuf {
    let name = path
        .file_name()
        .map(|name| name.to_string_lossy().into_owned())
        .unwrap_or_else(|| "workspace".to_string());
    path.with_file_name(format!("{name}-{:08x}", rng.next_u32()))
}

fn absolute(path: &Path) -> Result<PathBuf, WorkspaceError> {
    if path.is_absolute() {
        return Ok(path.to_path_buf());
    }
    std::env::current_dir()
        .map(|cwd| cwd.join(path))
        .map_err(|err| WorkspaceError::Prepare {
            path: path.to_path_buf(),
            message: err.to_string(),
        })
}

/// A cloned working copy plus its teardown obligation.
#[derive(Debug)]
pub struct Workspace {
    root: PathBuf,
    policy: LifecyclePolicy,
    remote: CredentialedUrl,
    git: Git,
    temp: Option<TempDir>,
    torn_down: bool,
}

impl Workspace {
    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn policy(&self) -> LifecyclePolicy {
        self.policy
    }

    /// Redacting handle on the authenticated remote URL.
    pub fn remote(&self) -> &CredentialedUrl {
        &self.remote
    }

    pub fn repository(&self) -> &Git {
        &self.git
    }

    pub fn files(&self) -> FileAccess {
        FileAccess::new(&self.root)
    }

    /// Release the workspace. Never fails; problems are logged.
    pub fn teardown(mut self) {
        self.release();
    }

    fn release(&mut self) {
        if self.torn_down {
            return;
        }
        self.torn_down = true;
        match self.temp.take() {
            Some(dir) => match dir.close() {
                Ok(()) => info!(root = %self.root.display(), "workspace removed"),
                Err(err) => {
                    warn!(root = %self.root.display(), err = %err, "failed to remove workspace");
                }
            },
            None => info!(root = %self.root.display(), "workspace kept for inspection"),
        }
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        self.release();
    }
}

/// Create a workspace, run `f` inside it, and tear it down on every exit path.
pub fn with_workspace<T, F>(
    manager: &WorkspaceManager,
    repo_url: &str,
    token: &str,
    policy: LifecyclePolicy,
    f: F,
) -> Result<T, WorkspaceError>
where
    F: FnOnce(&Workspace) -> T,
{
    let workspace = manager.create(repo_url, token, policy)?;
    let value = f(&workspace);
    workspace.teardown();
    Ok(value)
}
