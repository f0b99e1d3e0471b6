//! Per-request ephemeral workspace
//!
//! One uniquely named directory per request, removed when the workspace is
//! closed or dropped unless retention was asked for.

use std::path::{Path, PathBuf};

use tempfile::TempDir;

use crate::error::StorageError;

#[derive(Debug)]
pub struct Workspace {
    dir: Option<TempDir>,
    path: PathBuf,
    keep: bool,
}

impl Workspace {
    /// Allocate under `root`, or the system temp dir when `None`
    pub fn create(root: Option<&Path>, request_id: &str, keep: bool) -> Result<Self, StorageError> {
        let prefix = format!("deck-{}-", request_id);
        let mut builder = tempfile::Builder::new();
        builder.prefix(&prefix);

        let dir = match root {
            Some(root) => {
                std::fs::create_dir_all(root).map_err(StorageError::Workspace)?;
                builder.tempdir_in(root)
            }
            None => builder.tempdir(),
        }
        .map_err(StorageError::Workspace)?;

        let path = dir.path().to_path_buf();
        tracing::debug!("[WORKFLOW] Workspace allocated at {}", path.display());

        Ok(Self {
            dir: Some(dir),
            path,
            keep,
        })
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Remove the directory, or keep it when retention is on; returns the
    /// retained path
    pub fn close(mut self) -> Option<PathBuf> {
        let dir = self.dir.take()?;
        if self.keep {
            let kept = dir.keep();
            tracing::info!("[WORKFLOW] Workspace retained at {}", kept.display());
            return Some(kept);
        }
        if let Err(e) = dir.close() {
            tracing::warn!("[WORKFLOW] Failed to remove workspace {}: {}", self.path.display(), e);
        }
        None
    }
}

impl Drop for Workspace {
    fn drop(&mut self) {
        if let Some(dir) = self.dir.take() {
            if self.keep {
                let kept = dir.keep();
                tracing::info!("[WORKFLOW] Workspace retained at {}", kept.display());
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn close_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(Some(root.path()), "req1", false).unwrap();
        let path = workspace.path().to_path_buf();
        std::fs::write(path.join("slide.html"), "<p>x</p>").unwrap();

        assert!(workspace.close().is_none());
        assert!(!path.exists());
    }

    #[test]
    fn drop_removes_directory() {
        let root = tempfile::tempdir().unwrap();
        let path = {
            let workspace = Workspace::create(Some(root.path()), "req2", false).unwrap();
            workspace.path().to_path_buf()
        };
        assert!(!path.exists());
    }

    #[test]
    fn retention_keeps_directory() {
        let root = tempfile::tempdir().unwrap();
        let workspace = Workspace::create(Some(root.path()), "req3", true).unwrap();
        let kept = workspace.close().unwrap();
        assert!(kept.exists());
        assert!(kept.file_name().unwrap().to_string_lossy().starts_with("deck-req3-"));
    }

    #[test]
    fn concurrent_requests_get_distinct_directories() {
        let root = tempfile::tempdir().unwrap();
        let a = Workspace::create(Some(root.path()), "same", false).unwrap();
        let b = Workspace::create(Some(root.path()), "same", false).unwrap();
        assert_ne!(a.path(), b.path());
    }
}
