//! Working directory preparation
//!
//! Scripts mutate their working directory and later scripts build on what
//! earlier ones left behind. A [`Bootstrap`] decides what the directory looks
//! like before the first of them runs.

use std::fs;
use std::path::{Component, Path, PathBuf};

use serde::{Deserialize, Serialize};
use tracing::info;
use walkdir::WalkDir;

use crate::error::{Error, Result};
use crate::logging::{operations, status};

#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub enum Bootstrap {
    /// Use the directory as it is, creating it if missing
    #[default]
    None,
    /// Remove everything and start from an empty directory
    Clean,
    /// Start from a copy of a template directory on the local filesystem
    LocalPath { source: PathBuf },
}

/// Bootstrap policy name, as written in the manifest
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum BootstrapKind {
    #[default]
    None,
    Clean,
    LocalPath,
}

/// What a bootstrap did
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct BootstrapOutcome {
    pub removed_existing: bool,
    pub files_copied: usize,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Workspace {
    pub path: PathBuf,
    pub bootstrap: Bootstrap,
}

impl Workspace {
    pub fn new(path: impl Into<PathBuf>, bootstrap: Bootstrap) -> Self {
        Self {
            path: path.into(),
            bootstrap,
        }
    }

    /// Graph node id for this workspace's bootstrap
    pub fn node_id(&self) -> String {
        format!("bootstrap:{}", self.path.display())
    }

    pub fn prepare(&self) -> Result<BootstrapOutcome> {
        let outcome = self.bootstrap.apply(&self.path)?;
        info!(
            task = %self.node_id(),
            operation = operations::BOOTSTRAP,
            status = status::SUCCESS,
            path = %self.path.display(),
            files_copied = outcome.files_copied,
            "workspace ready"
        );
        Ok(outcome)
    }
}

impl Bootstrap {
    pub fn apply(&self, dir: &Path) -> Result<BootstrapOutcome> {
        let mut outcome = BootstrapOutcome::default();

        match self {
            Bootstrap::None => {}
            Bootstrap::Clean => {
                outcome.removed_existing = clear(dir)?;
            }
            Bootstrap::LocalPath { source } => {
                if !source.is_dir() {
                    return Err(Error::Bootstrap {
                        path: dir.to_path_buf(),
                        reason: format!("template {} is not a directory", source.display()),
                    });
                }
                outcome.removed_existing = clear(dir)?;
                outcome.files_copied = copy_tree(source, dir)?;
            }
        }

        fs::create_dir_all(dir).map_err(|e| Error::io(dir, e))?;
        Ok(outcome)
    }
}

/// Remove `dir` if it exists; returns whether anything was removed
fn clear(dir: &Path) -> Result<bool> {
    if is_root_like(dir) {
        return Err(Error::Bootstrap {
            path: dir.to_path_buf(),
            reason: "refusing to clear a filesystem root".to_string(),
        });
    }
    if !dir.exists() {
        return Ok(false);
    }
    fs::remove_dir_all(dir).map_err(|e| Error::io(dir, e))?;
    Ok(true)
}

fn is_root_like(dir: &Path) -> bool {
    !dir
        .components()
        .any(|c| matches!(c, Component::Normal(_)))
}

fn copy_tree(source: &Path, dest: &Path) -> Result<usize> {
    let mut copied = 0;

    for entry in WalkDir::new(source).sort_by_file_name() {
        let entry = entry.map_err(|e| {
            let path = e.path().unwrap_or(source).to_path_buf();
            Error::io(path, e.into())
        })?;
        let rel = entry
            .path()
            .strip_prefix(source)
            .map_err(|e| Error::Bootstrap {
                path: dest.to_path_buf(),
                reason: e.to_string(),
            })?;
        let target = dest.join(rel);

        if entry.file_type().is_dir() {
            fs::create_dir_all(&target).map_err(|e| Error::io(&target, e))?;
        } else if entry.file_type().is_file() {
            fs::copy(entry.path(), &target).map_err(|e| Error::io(&target, e))?;
            copied += 1;
        }
    }

    Ok(copied)
}
