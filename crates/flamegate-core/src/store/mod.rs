//! Artifact store collaborator
//!
//! Hierarchical put of a local file or of structured metadata. The core
//! never reads artifacts back; durability is the store's problem.

mod fs;
mod http;

pub use fs::FsArtifactStore;
pub use http::HttpArtifactStore;

use std::path::Path;

use async_trait::async_trait;

use crate::error::Result;

/// Durable artifact sink.
#[async_trait]
pub trait ArtifactStore: Send + Sync {
    /// Upload a local file to the hierarchical `remote` path, creating
    /// intermediate directories as needed.
    async fn put(&self, local: &Path, remote: &str) -> Result<()>;

    /// Write a JSON document at the `remote` path.
    async fn put_json(&self, remote: &str, value: &serde_json::Value) -> Result<()>;
}
