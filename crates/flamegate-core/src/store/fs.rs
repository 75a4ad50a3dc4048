//! Filesystem artifact store
//!
//! Stores artifacts under a root directory, mirroring the hierarchical
//! mkdir-then-put shape of remote object stores. Suitable for local
//! disks and NFS mounts.

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use tracing::debug;

use super::ArtifactStore;
use crate::error::{Error, Result};

/// Artifact store rooted at a local directory.
pub struct FsArtifactStore {
    root: PathBuf,
}

impl FsArtifactStore {
    /// Store rooted at `root`. The directory is created lazily on the
    /// first put.
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    fn resolve(&self, remote: &str) -> PathBuf {
        self.root.join(remote.trim_start_matches('/'))
    }

    async fn ensure_parent(&self, target: &Path) -> Result<()> {
        if let Some(parent) = target.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| Error::Storage(format!("mkdir {}: {}", parent.display(), e)))?;
        }
        Ok(())
    }
}

#[async_trait]
impl ArtifactStore for FsArtifactStore {
    async fn put(&self, local: &Path, remote: &str) -> Result<()> {
        let target = self.resolve(remote);
        self.ensure_parent(&target).await?;
        tokio::fs::copy(local, &target)
            .await
            .map_err(|e| Error::Storage(format!("put {}: {}", remote, e)))?;
        debug!(remote, "stored artifact");
        Ok(())
    }

    async fn put_json(&self, remote: &str, value: &serde_json::Value) -> Result<()> {
        let target = self.resolve(remote);
        self.ensure_parent(&target).await?;
        let body = serde_json::to_vec(value)
            .map_err(|e| Error::Storage(format!("encode {}: {}", remote, e)))?;
        tokio::fs::write(&target, body)
            .await
            .map_err(|e| Error::Storage(format!("put {}: {}", remote, e)))?;
        Ok(())
    }
}
