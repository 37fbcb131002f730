//! Durable on-disk locations for stores and caches.
//!
//! A pure function of (scope, workspace identity). Per root:
//!
//! ```text
//! <root>/vectors/      vector-store files
//! <root>/metadata.db   embedded relational store
//! <root>/models/       local embedding model cache
//! <root>/logs/         diagnostic logs
//! ```
//!
//! Workspace roots nest under `<root>/workspaces/<id>/` with the same
//! layout. Workspace identifiers are validated so a caller-controlled id can
//! never introduce a traversal segment.

use anyhow::{bail, Result};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone)]
pub struct StoragePaths {
    root: PathBuf,
}

impl StoragePaths {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn global_vector_dir(&self) -> PathBuf {
        self.root.join("vectors")
    }

    pub fn global_metadata_path(&self) -> PathBuf {
        self.root.join("metadata.db")
    }

    pub fn global_models_dir(&self) -> PathBuf {
        self.root.join("models")
    }

    pub fn global_logs_dir(&self) -> PathBuf {
        self.root.join("logs")
    }

    pub fn workspace_root(&self, workspace_id: &str) -> Result<PathBuf> {
        let id = sanitize_workspace_id(workspace_id)?;
        Ok(self.root.join("workspaces").join(id))
    }

    pub fn workspace_vector_dir(&self, workspace_id: &str) -> Result<PathBuf> {
        Ok(self.workspace_root(workspace_id)?.join("vectors"))
    }

    pub fn workspace_metadata_path(&self, workspace_id: &str) -> Result<PathBuf> {
        Ok(self.workspace_root(workspace_id)?.join("metadata.db"))
    }

    /// Idempotent create of every global-scope directory.
    pub fn ensure_directories(&self) -> std::io::Result<()> {
        std::fs::create_dir_all(self.global_vector_dir())?;
        std::fs::create_dir_all(self.global_models_dir())?;
        std::fs::create_dir_all(self.global_logs_dir())?;
        Ok(())
    }

    /// Idempotent create of a workspace root's directories.
    pub fn ensure_workspace_directories(&self, workspace_id: &str) -> Result<()> {
        let root = self.workspace_root(workspace_id)?;
        std::fs::create_dir_all(root.join("vectors"))?;
        std::fs::create_dir_all(root.join("models"))?;
        std::fs::create_dir_all(root.join("logs"))?;
        Ok(())
    }
}

/// Validate a workspace identifier for use as a single path component.
fn sanitize_workspace_id(id: &str) -> Result<&str> {
    if id.is_empty() {
        bail!("workspace id must not be empty");
    }
    if id == "." || id == ".." {
        bail!("workspace id must not be a relative path segment");
    }
    if id.contains('/') || id.contains('\\') || id.contains('\0') {
        bail!("workspace id must not contain path separators");
    }
    Ok(id)
}

/// Lexical normalization of a path to an absolute form without `.`/`..`
/// segments. Unlike `canonicalize`, this works for paths that no longer
/// exist, which the delete path needs.
pub fn normalize_path(path: &Path) -> PathBuf {
    let absolute = if path.is_absolute() {
        path.to_path_buf()
    } else {
        std::env::current_dir()
            .map(|cwd| cwd.join(path))
            .unwrap_or_else(|_| path.to_path_buf())
    };

    let mut out = PathBuf::new();
    for component in absolute.components() {
        match component {
            std::path::Component::CurDir => {}
            std::path::Component::ParentDir => {
                out.pop();
            }
            other => out.push(other),
        }
    }
    out
}
