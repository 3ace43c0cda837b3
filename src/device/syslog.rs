//! Live device log scanning for the identity marker.
//!
//! The reader runs as its own task and publishes at most once through a oneshot
//! channel. The caller races that channel against the deadline; afterwards the
//! reader is aborted and the log process killed, whichever side won.

use super::{DeviceTool, ToolCommand};
use crate::config::LogMarkerConfig;
use crate::error::{ConfigError, Result, StagingError};
use crate::system::drain_lines;
use regex::Regex;
use std::time::Duration;
use tokio::io::{AsyncBufRead, AsyncBufReadExt, BufReader};
use tokio::sync::oneshot;

/// Literal prefilter plus capture pattern.
#[derive(Debug, Clone)]
pub struct LogMarker {
    needle: String,
    pattern: Regex,
}

impl LogMarker {
    pub fn new(needle: impl Into<String>, pattern: &str) -> Result<Self, ConfigError> {
        let pattern = Regex::new(pattern)
            .map_err(|e| ConfigError::ValidationFailed(format!("Invalid log marker pattern: {}", e)))?;
        Ok(LogMarker {
            needle: needle.into(),
            pattern,
        })
    }

    pub fn from_config(config: &LogMarkerConfig) -> Result<Self, ConfigError> {
        Self::new(config.needle.clone(), &config.pattern)
    }

    pub fn needle(&self) -> &str {
        &self.needle
    }

    /// Token carried by `line`: first capture group, or the whole match.
    pub fn extract(&self, line: &str) -> Option<String> {
        if !line.contains(&self.needle) {
            return None;
        }
        let captures = self.pattern.captures(line)?;
        captures
            .get(1)
            .or_else(|| captures.get(0))
            .map(|m| m.as_str().to_string())
    }
}

/// Result of a bounded scan.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ScanOutcome {
    Found(String),
    NotFound,
}

/// Read lines until one carries the marker. Returns its 1-based line number and
/// the token; nothing past that line is consumed. `None` at end of stream.
pub async fn first_match<R>(reader: &mut R, marker: &LogMarker) -> Option<(usize, String)>
where
    R: AsyncBufRead + Unpin,
{
    let mut buf = Vec::new();
    let mut line_no = 0usize;
    loop {
        buf.clear();
        match reader.read_until(b'\n', &mut buf).await {
            Ok(0) => return None,
            Ok(_) => {
                line_no += 1;
                let line = String::from_utf8_lossy(&buf);
                if let Some(token) = marker.extract(&line) {
                    return Some((line_no, token));
                }
            }
            Err(e) => {
                log::debug!("[Syslog] read error after {} lines: {}", line_no, e);
                return None;
            }
        }
    }
}

/// Stream the device log for at most `max_duration` looking for `marker`.
pub async fn scan_for_pattern(
    tool: &dyn DeviceTool,
    marker: &LogMarker,
    max_duration: Duration,
) -> Result<ScanOutcome> {
    let mut child = tool.spawn(&ToolCommand::Syslog)?;
    let stdout = child
        .stdout
        .take()
        .ok_or_else(|| StagingError::Unexpected("syslog stdout was not captured".to_string()))?;
    let stderr_drain = child.stderr.take().map(|stderr| drain_lines(stderr, "Syslog"));

    let (tx, rx) = oneshot::channel();
    let reader_marker = marker.clone();
    let reader = tokio::spawn(async move {
        let mut lines = BufReader::new(stdout);
        let _ = tx.send(first_match(&mut lines, &reader_marker).await);
    });

    let outcome = tokio::select! {
        published = rx => match published {
            Ok(Some((line_no, token))) => {
                log::debug!("[Syslog] marker matched on line {}", line_no);
                ScanOutcome::Found(token)
            }
            Ok(None) => {
                log::debug!("[Syslog] log stream ended before the marker appeared");
                ScanOutcome::NotFound
            }
            Err(_) => ScanOutcome::NotFound,
        },
        _ = tokio::time::sleep(max_duration) => {
            log::debug!("[Syslog] no marker within {:?}", max_duration);
            ScanOutcome::NotFound
        }
    };

    reader.abort();
    if let Some((handle, _)) = stderr_drain {
        handle.abort();
    }
    if let Err(e) = child.kill().await {
        log::debug!("[Syslog] failed to kill log process: {}", e);
    }

    Ok(outcome)
}

#[cfg(test)]
mod tests {
    use super::*;
    use tokio::io::AsyncReadExt;

    const TOKEN: &str = "1234ABCD-1234-ABCD-1234-1234567890AB";

    fn marker() -> LogMarker {
        LogMarker::from_config(&LogMarkerConfig::default()).unwrap()
    }

    fn marker_line(token: &str) -> String {
        format!(
            "bookassetd(BookLibrary)[512]: BLDatabaseManager.sqlite at /private/var/containers/Shared/SystemGroup/{}/Documents/BLDatabaseManager/\n",
            token
        )
    }

    #[test]
    fn test_extract_requires_needle() {
        let m = marker();
        assert_eq!(m.extract(&marker_line(TOKEN)).as_deref(), Some(TOKEN));
        let without_needle = format!("other.sqlite SystemGroup/{}/", TOKEN);
        assert_eq!(m.extract(&without_needle), None);
        assert_eq!(m.extract("BLDatabaseManager.sqlite opened"), None);
    }

    #[test]
    fn test_extract_whole_match_without_group() {
        let m = LogMarker::new("token=", r"[0-9]{4}").unwrap();
        assert_eq!(m.extract("token=5521 ok").as_deref(), Some("5521"));
    }

    #[test]
    fn test_invalid_pattern_rejected() {
        assert!(LogMarker::new("x", "(unclosed").is_err());
    }

    #[tokio::test]
    async fn test_first_match_stops_at_line_seven() {
        let mut text = String::new();
        for i in 1..=6 {
            text.push_str(&format!("kernel[0]: unrelated line {}\n", i));
        }
        text.push_str(&marker_line(TOKEN));
        text.push_str("line 8\n");
        text.push_str(&marker_line("FFFFFFFF-FFFF-FFFF-FFFF-FFFFFFFFFFFF"));

        let mut reader = std::io::Cursor::new(text.into_bytes());
        let found = first_match(&mut reader, &marker()).await;
        assert_eq!(found, Some((7, TOKEN.to_string())));

        let mut rest = String::new();
        reader.read_to_string(&mut rest).await.unwrap();
        assert!(rest.starts_with("line 8\n"), "consumed past the match: {:?}", rest);
    }

    #[tokio::test]
    async fn test_first_match_tolerates_invalid_utf8() {
        let mut bytes = b"\xff\xfe garbage\n".to_vec();
        bytes.extend_from_slice(marker_line(TOKEN).as_bytes());
        let mut reader = std::io::Cursor::new(bytes);
        assert_eq!(first_match(&mut reader, &marker()).await, Some((2, TOKEN.to_string())));
    }

    #[tokio::test]
    async fn test_first_match_eof() {
        let mut reader = std::io::Cursor::new(b"a\nb\n".to_vec());
        assert_eq!(first_match(&mut reader, &marker()).await, None);
    }
}
