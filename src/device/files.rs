//! Device filesystem operations through the tool's `fsync` commands.
//!
//! Existence is inferred from the text of a tree listing. The tool's failure
//! vocabulary is undocumented, so the interpretation lives in a pure function
//! ([`interpret_listing`]) with the ambiguous case kept as its own verdict.

use super::{DeviceTool, ToolCommand};
use crate::error::{Result, StagingError};
use crate::system::poll_for;
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

/// What a tree listing says about a path.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ListingVerdict {
    /// Non-empty output without error markers
    Present,
    /// Blank output
    Empty,
    /// Output mentions "no such file"
    NotFound,
    /// Output mentions "error": a real absence or a transient tool failure
    ToolError,
}

impl ListingVerdict {
    pub fn is_present(&self) -> bool {
        matches!(self, ListingVerdict::Present)
    }
}

/// Interpret tree-listing output (case-insensitive marker match).
pub fn interpret_listing(output: &str) -> ListingVerdict {
    let text = output.trim();
    if text.is_empty() {
        return ListingVerdict::Empty;
    }
    let lower = text.to_lowercase();
    if lower.contains("no such file") {
        ListingVerdict::NotFound
    } else if lower.contains("error") {
        ListingVerdict::ToolError
    } else {
        ListingVerdict::Present
    }
}

/// Push/remove/exists on device paths, plus marker-file polling.
#[derive(Clone)]
pub struct RemoteFileBridge {
    tool: Arc<dyn DeviceTool>,
    poll_interval: Duration,
}

impl RemoteFileBridge {
    pub fn new(tool: Arc<dyn DeviceTool>, poll_interval: Duration) -> Self {
        RemoteFileBridge {
            tool,
            poll_interval,
        }
    }

    /// Copy a local file to `remote`. Not verified afterwards.
    pub async fn push(&self, local: &Path, remote: &str) -> Result<()> {
        log::debug!("[Files] push {} -> {}", local.display(), remote);
        self.tool
            .run(&ToolCommand::Push {
                local: local.to_path_buf(),
                remote: remote.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Best-effort delete. An already-absent path is not an error.
    pub async fn remove(&self, remote: &str) -> Result<()> {
        log::debug!("[Files] rm {}", remote);
        self.tool
            .run(&ToolCommand::Remove {
                remote: remote.to_string(),
            })
            .await?;
        Ok(())
    }

    /// Raw verdict for `remote`.
    pub async fn probe(&self, remote: &str) -> Result<ListingVerdict> {
        let output = self
            .tool
            .run(&ToolCommand::Tree {
                remote: remote.to_string(),
            })
            .await?;
        let verdict = interpret_listing(&output.stdout);
        if verdict == ListingVerdict::ToolError {
            log::debug!(
                "[Files] ambiguous listing for {}, counted as absent: {}",
                remote,
                output.stdout.trim()
            );
        }
        Ok(verdict)
    }

    /// `true` only for a `Present` verdict. A listing that outlived its bound
    /// counts as absent; failing to run the tool is an error.
    pub async fn exists(&self, remote: &str) -> Result<bool> {
        match self.probe(remote).await {
            Ok(verdict) => Ok(verdict.is_present()),
            Err(e @ StagingError::CommandTimeout { .. }) => {
                log::debug!("[Files] listing {} abandoned: {}", remote, e);
                Ok(false)
            }
            Err(e) => Err(e),
        }
    }

    /// Poll until `remote` exists or `timeout` elapses.
    pub async fn wait_for_appearance(&self, remote: &str, timeout: Duration) -> Result<bool> {
        self.wait_for(remote, true, timeout).await
    }

    /// Poll until `remote` is gone or `timeout` elapses. The caller decides
    /// what an `Ok(false)` means. A hung listing never counts as gone.
    pub async fn wait_for_disappearance(&self, remote: &str, timeout: Duration) -> Result<bool> {
        self.wait_for(remote, false, timeout).await
    }

    async fn wait_for(&self, remote: &str, present: bool, timeout: Duration) -> Result<bool> {
        let settled = poll_for(
            || async move {
                match self.probe(remote).await {
                    Ok(verdict) if verdict.is_present() == present => Some(Ok(())),
                    Ok(_) => None,
                    Err(e @ StagingError::CommandTimeout { .. }) => {
                        log::debug!("[Files] listing {} abandoned, retrying: {}", remote, e);
                        None
                    }
                    Err(e) => Some(Err(e)),
                }
            },
            self.poll_interval,
            timeout,
        )
        .await;

        match settled {
            Some(Ok(())) => Ok(true),
            Some(Err(e)) => Err(e),
            None => Ok(false),
        }
    }
}
