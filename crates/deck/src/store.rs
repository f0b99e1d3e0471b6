//! ArtifactStore: persistence boundary for finished decks
//!
//! Files are isolated per owner key and never overwritten; a taken name is
//! suffixed `-2`, `-3`, ... and the name actually used is the identifier.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tokio::io::AsyncWriteExt;

use crate::error::StorageError;
use crate::model::{ArtifactId, OwnerKey};

/// Attempts at finding a free name before giving up
const MAX_NAME_ATTEMPTS: usize = 1000;

#[async_trait]
pub trait ArtifactStore: Send + Sync {
    async fn save(&self, owner: &OwnerKey, filename: &str, bytes: &[u8]) -> Result<ArtifactId, StorageError>;

    /// Resolve an identifier returned by `save` to its location
    async fn lookup(&self, owner: &OwnerKey, id: &ArtifactId) -> Result<PathBuf, StorageError>;
}

/// `root/<owner key>/<filename>` on the local filesystem
#[derive(Debug, Clone)]
pub struct LocalArtifactStore {
    root: PathBuf,
}

impl LocalArtifactStore {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    fn owner_dir(&self, owner: &OwnerKey) -> PathBuf {
        self.root.join(owner.as_str())
    }
}

/// A bare file name: no separators, no parent references
fn is_plain_name(name: &str) -> bool {
    !name.is_empty()
        && name != "."
        && name != ".."
        && !name.contains(['/', '\\', '\0'])
}

fn candidate(filename: &str, attempt: usize) -> String {
    if attempt == 1 {
        return filename.to_string();
    }
    match filename.rsplit_once('.') {
        Some((stem, ext)) if !stem.is_empty() => format!("{}-{}.{}", stem, attempt, ext),
        _ => format!("{}-{}", filename, attempt),
    }
}

#[async_trait]
impl ArtifactStore for LocalArtifactStore {
    async fn save(&self, owner: &OwnerKey, filename: &str, bytes: &[u8]) -> Result<ArtifactId, StorageError> {
        if !is_plain_name(filename) {
            return Err(StorageError::InvalidIdentifier(filename.to_string()));
        }

        let dir = self.owner_dir(owner);
        tokio::fs::create_dir_all(&dir)
            .await
            .map_err(|source| StorageError::Write {
                filename: filename.to_string(),
                source,
            })?;

        for attempt in 1..=MAX_NAME_ATTEMPTS {
            let name = candidate(filename, attempt);
            let path = dir.join(&name);

            let mut file = match tokio::fs::OpenOptions::new()
                .write(true)
                .create_new(true)
                .open(&path)
                .await
            {
                Ok(file) => file,
                Err(e) if e.kind() == std::io::ErrorKind::AlreadyExists => continue,
                Err(source) => return Err(StorageError::Write { filename: name, source }),
            };

            let written = async {
                file.write_all(bytes).await?;
                file.sync_all().await
            }
            .await;

            if let Err(source) = written {
                let _ = tokio::fs::remove_file(&path).await;
                return Err(StorageError::Write { filename: name, source });
            }

            if attempt > 1 {
                tracing::info!("[STORE] '{}' taken, stored as '{}'", filename, name);
            }
            tracing::info!("[STORE] Saved {} ({} bytes) for owner {}", name, bytes.len(), owner);
            return Ok(ArtifactId(name));
        }

        Err(StorageError::NameExhausted(filename.to_string()))
    }

    async fn lookup(&self, owner: &OwnerKey, id: &ArtifactId) -> Result<PathBuf, StorageError> {
        if !is_plain_name(&id.0) {
            return Err(StorageError::InvalidIdentifier(id.0.clone()));
        }
        let path = self.owner_dir(owner).join(&id.0);
        match tokio::fs::try_exists(&path).await {
            Ok(true) => Ok(path),
            _ => Err(StorageError::NotFound(id.0.clone())),
        }
    }
}
