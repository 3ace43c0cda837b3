//! Remote payload exchange: token to URL, then URL to bytes.
//!
//! The staged copy lives in a `NamedTempFile`, so it is deleted on `discard` or,
//! failing that, when the value is dropped. Nothing survives the run.

use crate::error::{Result, StagingError};
use reqwest::{Client, Url};
use std::io::Write;
use std::path::Path;
use std::time::Duration;
use tempfile::NamedTempFile;

/// Downloaded payload staged on local disk.
#[derive(Debug)]
pub struct StagedPayload {
    url: String,
    file: NamedTempFile,
    len: usize,
}

impl StagedPayload {
    pub fn url(&self) -> &str {
        &self.url
    }

    pub fn path(&self) -> &Path {
        self.file.path()
    }

    pub fn len(&self) -> usize {
        self.len
    }

    pub fn is_empty(&self) -> bool {
        self.len == 0
    }

    /// Delete the staging file now.
    pub fn discard(self) -> Result<()> {
        let path = self.file.path().to_path_buf();
        self.file.close()?;
        log::debug!("[Payload] staging file removed: {}", path.display());
        Ok(())
    }
}

#[derive(Debug, Clone)]
pub struct PayloadClient {
    client: Client,
    endpoint: Url,
}

impl PayloadClient {
    pub fn new(endpoint: &str, timeout: Duration) -> Result<Self> {
        let endpoint = Url::parse(endpoint)
            .map_err(|e| StagingError::Environment(format!("Invalid endpoint '{}': {}", endpoint, e)))?;
        let client = Client::builder()
            .timeout(timeout)
            .build()
            .map_err(|e| StagingError::Environment(format!("Failed to build HTTP client: {}", e)))?;
        Ok(PayloadClient { client, endpoint })
    }

    pub fn endpoint(&self) -> &Url {
        &self.endpoint
    }

    /// Exchange the identity token for a download URL (trimmed response body).
    pub async fn resolve_download_url(&self, product_type: &str, token: &str, serial: &str) -> Result<String> {
        log::debug!("[Payload] requesting download URL from {}", self.endpoint);
        let response = self
            .client
            .get(self.endpoint.clone())
            .query(&[("prd", product_type), ("guid", token), ("sn", serial)])
            .send()
            .await?
            .error_for_status()?;
        let body = response.text().await?;
        let url = body.trim();

        if url.is_empty() {
            return Err(StagingError::Network("server returned an empty download URL".to_string()));
        }
        match Url::parse(url) {
            Ok(parsed) if parsed.has_host() => Ok(url.to_string()),
            _ => Err(StagingError::Network(format!(
                "server response is not a URL: {}",
                truncate(url, 120)
            ))),
        }
    }

    /// Fetch the whole body into memory.
    pub async fn download(&self, url: &str) -> Result<Vec<u8>> {
        let response = self.client.get(url).send().await?.error_for_status()?;
        let bytes = response.bytes().await?;
        log::debug!("[Payload] downloaded {} bytes", bytes.len());
        Ok(bytes.to_vec())
    }

    /// Download `url` into a fresh staging file under `dir` (system temp dir if `None`).
    pub async fn stage(&self, url: &str, dir: Option<&Path>) -> Result<StagedPayload> {
        let bytes = self.download(url).await?;
        let mut builder = tempfile::Builder::new();
        builder.prefix("payload-").suffix(".tmp");
        let mut file = match dir {
            Some(dir) => builder.tempfile_in(dir)?,
            None => builder.tempfile()?,
        };
        file.write_all(&bytes)?;
        file.flush()?;
        Ok(StagedPayload {
            url: url.to_string(),
            file,
            len: bytes.len(),
        })
    }
}

fn truncate(text: &str, max: usize) -> &str {
    match text.char_indices().nth(max) {
        Some((idx, _)) => &text[..idx],
        None => text,
    }
}
