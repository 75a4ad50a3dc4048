//! HTTP object-store backend
//!
//! PUTs artifacts against a remote object store (Manta-style path
//! hierarchy over HTTP). Intermediate "directories" are the server's
//! concern; the client just PUTs the full path.

use std::path::Path;

use async_trait::async_trait;
use reqwest::Client;

use super::ArtifactStore;
use crate::error::{Error, Result};

/// Artifact store speaking HTTP PUT against a base URL.
pub struct HttpArtifactStore {
    base_url: String,
    token: Option<String>,
    client: Client,
}

impl HttpArtifactStore {
    /// Store PUTting under `base_url`, optionally authenticated with a
    /// bearer token.
    pub fn new(base_url: impl Into<String>, token: Option<String>) -> Self {
        Self {
            base_url: base_url.into(),
            token,
            client: Client::new(),
        }
    }

    fn url(&self, remote: &str) -> String {
        format!(
            "{}/{}",
            self.base_url.trim_end_matches('/'),
            remote.trim_start_matches('/')
        )
    }

    fn request(&self, url: &str) -> reqwest::RequestBuilder {
        let req = self.client.put(url);
        match &self.token {
            Some(token) => req.bearer_auth(token),
            None => req,
        }
    }
}

#[async_trait]
impl ArtifactStore for HttpArtifactStore {
    async fn put(&self, local: &Path, remote: &str) -> Result<()> {
        let body = tokio::fs::read(local)
            .await
            .map_err(|e| Error::Storage(format!("read {}: {}", local.display(), e)))?;
        let url = self.url(remote);
        self.request(&url)
            .body(body)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::Storage(format!("put {}: {}", remote, e)))?;
        Ok(())
    }

    async fn put_json(&self, remote: &str, value: &serde_json::Value) -> Result<()> {
        let url = self.url(remote);
        self.request(&url)
            .json(value)
            .send()
            .await
            .and_then(|resp| resp.error_for_status())
            .map_err(|e| Error::Storage(format!("put {}: {}", remote, e)))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_url_joins_without_doubled_slashes() {
        let store = HttpArtifactStore::new("https://store.example/v1/", None);
        assert_eq!(
            store.url("/flameGraph/host/task/a.svg"),
            "https://store.example/v1/flameGraph/host/task/a.svg"
        );
    }
}
