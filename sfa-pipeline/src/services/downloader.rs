//! Downloader helper client
//!
//! Spawns the fetch helper as a subprocess. The helper speaks NDJSON on
//! stdout: zero or more `{"type":"progress","percent":N}` lines while
//! transferring, then one final result object carrying the produced
//! file path, size and source metadata. The `metadata` command resolves
//! track metadata without downloading audio.

use crate::models::TrackMetadata;
use crate::services::{Downloader, ProgressTx, StageError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Downloader helper errors
#[derive(Debug, Error)]
pub enum DownloaderError {
    #[error("Failed to spawn downloader: {0}")]
    Spawn(String),

    #[error("Downloader exited with {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("Failed to parse downloader output: {0}")]
    Parse(String),

    #[error("Downloader produced no result line")]
    NoResult,

    #[error("Downloader timed out after {0}s")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl DownloaderError {
    /// Spawn failures (binary missing/misconfigured) and malformed
    /// output won't improve on retry; transfers and crashes might.
    fn retryable(&self) -> bool {
        matches!(
            self,
            DownloaderError::Exit { .. } | DownloaderError::Timeout(_) | DownloaderError::Io(_)
        )
    }
}

impl From<DownloaderError> for StageError {
    fn from(err: DownloaderError) -> Self {
        StageError {
            retryable: err.retryable(),
            message: err.to_string(),
        }
    }
}

/// Final result line of the `download` command
#[derive(Debug, Clone, Deserialize)]
pub struct DownloadOutput {
    pub path: String,
    pub size: i64,
    pub metadata: Option<TrackMetadata>,
}

/// Helper stdout line
#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum HelperLine {
    Progress { percent: u8 },
    Error { message: String },
    #[serde(other)]
    Unknown,
}

/// Process-backed downloader
pub struct ProcessDownloader {
    binary: String,
    timeout_secs: u64,
}

impl ProcessDownloader {
    pub fn new(binary: String, timeout_secs: u64) -> Self {
        Self {
            binary,
            timeout_secs,
        }
    }

    async fn run(&self, args: &[&str], progress: Option<&ProgressTx>) -> Result<String, DownloaderError> {
        tracing::debug!(binary = %self.binary, ?args, "Spawning downloader");
        let mut child = Command::new(&self.binary)
            .args(args)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| DownloaderError::Spawn(e.to_string()))?;

        let stdout = child.stdout.take().ok_or(DownloaderError::NoResult)?;
        let mut lines = BufReader::new(stdout).lines();

        let read_loop = async {
            let mut last_line = None;
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<HelperLine>(&line) {
                    Ok(HelperLine::Progress { percent }) => {
                        if let Some(tx) = progress {
                            let _ = tx.send(percent.min(100)).await;
                        }
                    }
                    Ok(HelperLine::Error { message }) => {
                        return Err(DownloaderError::Parse(message));
                    }
                    // Result lines carry no "type" tag; keep the last one
                    _ => last_line = Some(line),
                }
            }
            Ok(last_line)
        };

        let last_line = tokio::time::timeout(Duration::from_secs(self.timeout_secs), read_loop)
            .await
            .map_err(|_| {
                // Abandoned child gets killed, not orphaned
                let _ = child.start_kill();
                DownloaderError::Timeout(self.timeout_secs)
            })??;

        let output = child.wait_with_output().await?;
        if !output.status.success() {
            return Err(DownloaderError::Exit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            });
        }
        last_line.ok_or(DownloaderError::NoResult)
    }
}

#[async_trait]
impl Downloader for ProcessDownloader {
    async fn metadata(&self, url: &str) -> Result<TrackMetadata, StageError> {
        let line = self.run(&["metadata", url], None).await?;
        let metadata = serde_json::from_str(&line)
            .map_err(|e| DownloaderError::Parse(e.to_string()))
            .map_err(StageError::from)?;
        Ok(metadata)
    }

    async fn download(
        &self,
        url: &str,
        format: &str,
        bitrate: &str,
        dest_dir: &Path,
        progress: ProgressTx,
    ) -> Result<DownloadOutput, StageError> {
        let dest = dest_dir.to_string_lossy().to_string();
        let line = self
            .run(
                &[
                    "download", url, "--format", format, "--bitrate", bitrate, "--output", &dest,
                ],
                Some(&progress),
            )
            .await?;
        let output: DownloadOutput = serde_json::from_str(&line)
            .map_err(|e| DownloaderError::Parse(e.to_string()))
            .map_err(StageError::from)?;
        Ok(output)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_line_parses() {
        let line: HelperLine = serde_json::from_str(r#"{"type":"progress","percent":42}"#).unwrap();
        assert!(matches!(line, HelperLine::Progress { percent: 42 }));
    }

    #[test]
    fn test_result_line_parses() {
        let out: DownloadOutput = serde_json::from_str(
            r#"{"path":"/tmp/x.mp3","size":1024,"metadata":{"name":"T","artists":["A"]}}"#,
        )
        .unwrap();
        assert_eq!(out.path, "/tmp/x.mp3");
        assert_eq!(out.size, 1024);
        assert_eq!(out.metadata.unwrap().name, "T");
    }

    #[test]
    fn test_exit_error_is_retryable() {
        let err = DownloaderError::Exit {
            code: 1,
            stderr: "network unreachable".into(),
        };
        assert!(StageError::from(err).retryable);
        assert!(!StageError::from(DownloaderError::NoResult).retryable);
    }
}
