//! Workspace discovery.
//!
//! A beads workspace is any directory containing `.beads/`; the shared store
//! lives at `.beads/beads.db`.

use std::io;
use std::path::{Path, PathBuf};

use tracing::debug;

use crate::error::{Error, Result};

pub const BEADS_DIR: &str = ".beads";
pub const STORE_FILE: &str = "beads.db";

/// Locates the workspace and its store.
pub trait WorkspaceResolver {
    /// First directory at or above `start` that is a workspace root.
    fn find_workspace_root(&self, start: &Path) -> Result<PathBuf>;

    /// The store file inside `root`. It must exist.
    fn find_store_path(&self, root: &Path) -> Result<PathBuf>;
}

/// Ascends parent directories looking for `.beads/`.
#[derive(Debug, Clone, Copy, Default)]
pub struct BeadsWorkspace;

impl WorkspaceResolver for BeadsWorkspace {
    fn find_workspace_root(&self, start: &Path) -> Result<PathBuf> {
        let start = if start.is_absolute() {
            start.to_path_buf()
        } else {
            std::env::current_dir()?.join(start)
        };

        for dir in start.ancestors() {
            match std::fs::metadata(dir.join(BEADS_DIR)) {
                Ok(meta) if meta.is_dir() => {
                    debug!(root = %dir.display(), "found workspace");
                    return Ok(dir.to_path_buf());
                }
                Ok(_) => {}
                Err(e) if e.kind() == io::ErrorKind::NotFound => {}
                Err(e) => return Err(e.into()),
            }
        }

        Err(Error::WorkspaceNotFound(format!(
            "no {BEADS_DIR} directory found in {} or any parent",
            start.display()
        )))
    }

    fn find_store_path(&self, root: &Path) -> Result<PathBuf> {
        let path = root.join(BEADS_DIR).join(STORE_FILE);
        match std::fs::metadata(&path) {
            Ok(meta) if meta.is_file() => Ok(path),
            Ok(_) => Err(Error::StoreNotFound(format!(
                "{} is not a file",
                path.display()
            ))),
            Err(e) if e.kind() == io::ErrorKind::NotFound => Err(Error::StoreNotFound(format!(
                "no database at {}",
                path.display()
            ))),
            Err(e) => Err(e.into()),
        }
    }
}
