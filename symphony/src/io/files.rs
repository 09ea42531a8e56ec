//! File access scoped to a workspace root.

use std::fs;
use std::path::{Component, Path, PathBuf};

use anyhow::{Context, Result, bail};
use tracing::debug;

/// Reads and writes files relative to one directory, refusing paths that leave it.
#[derive(Debug, Clone)]
pub struct FileAccess {
    root: PathBuf,
}

impl FileAccess {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Join a relative path onto the root after rejecting absolute paths, `..`
    /// and anything inside a `.git` directory.
    pub fn resolve(&self, relative: &str) -> Result<PathBuf> {
        let path = Path::new(relative);
        let mut has_normal = false;
        for component in path.components() {
            match component {
                Component::Normal(name) if name.eq_ignore_ascii_case(".git") => {
                    bail!("path '{relative}' touches git metadata")
                }
                Component::Normal(_) => has_normal = true,
                Component::CurDir => {}
                Component::ParentDir => bail!("path '{relative}' escapes the workspace"),
                Component::RootDir | Component::Prefix(_) => {
                    bail!("path '{relative}' must be relative to the workspace")
                }
            }
        }
        if !has_normal {
            bail!("path must name a file");
        }
        Ok(self.root.join(path))
    }

    pub fn read(&self, relative: &str) -> Result<String> {
        let path = self.resolve(relative)?;
        fs::read_to_string(&path).with_context(|| format!("read {relative}"))
    }

    /// Write `content`, creating parent directories. Returns the byte count.
    pub fn write(&self, relative: &str, content: &str) -> Result<usize> {
        let path = self.resolve(relative)?;
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).with_context(|| format!("create directory for {relative}"))?;
        }
        fs::write(&path, content).with_context(|| format!("write {relative}"))?;
        debug!(path = relative, bytes = content.len(), "wrote file");
        Ok(content.len())
    }
}
