//! Analyzer helper client
//!
//! Spawns the feature-extraction helper with a comma-separated feature
//! list. stdout carries optional `{"type":"progress","percent":N}`
//! lines and ends with the flat JSON feature map.

use crate::models::Feature;
use crate::services::{Analyzer, ProgressTx, StageError};
use async_trait::async_trait;
use serde::Deserialize;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Analyzer helper errors
#[derive(Debug, Error)]
pub enum AnalyzerError {
    #[error("Failed to spawn analyzer: {0}")]
    Spawn(String),

    #[error("Analyzer exited with {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("Failed to parse analyzer output: {0}")]
    Parse(String),

    #[error("Analyzer produced no feature map")]
    NoResult,

    #[error("Analysis timed out after {0}s")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl AnalyzerError {
    fn retryable(&self) -> bool {
        matches!(
            self,
            AnalyzerError::Exit { .. } | AnalyzerError::Timeout(_) | AnalyzerError::Io(_)
        )
    }
}

impl From<AnalyzerError> for StageError {
    fn from(err: AnalyzerError) -> Self {
        StageError {
            retryable: err.retryable(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum AnalyzerLine {
    Progress { percent: u8 },
    Error { message: String },
    #[serde(other)]
    Unknown,
}

/// Process-backed analyzer
pub struct ProcessAnalyzer {
    binary: String,
    timeout_secs: u64,
}

impl ProcessAnalyzer {
    pub fn new(binary: String, timeout_secs: u64) -> Self {
        Self {
            binary,
            timeout_secs,
        }
    }
}

#[async_trait]
impl Analyzer for ProcessAnalyzer {
    async fn analyze(
        &self,
        input: &Path,
        features: &[Feature],
        progress: ProgressTx,
    ) -> Result<serde_json::Value, StageError> {
        let feature_list = features
            .iter()
            .map(|f| f.as_str())
            .collect::<Vec<_>>()
            .join(",");
        tracing::debug!(
            binary = %self.binary,
            features = %feature_list,
            input = %input.display(),
            "Spawning analyzer"
        );
        let mut child = Command::new(&self.binary)
            .arg(input)
            .args(["--features", &feature_list])
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| AnalyzerError::Spawn(e.to_string()))
            .map_err(StageError::from)?;

        let stdout = child
            .stdout
            .take()
            .ok_or(AnalyzerError::NoResult)
            .map_err(StageError::from)?;
        let mut lines = BufReader::new(stdout).lines();

        let read_loop = async {
            let mut last_line = None;
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<AnalyzerLine>(&line) {
                    Ok(AnalyzerLine::Progress { percent }) => {
                        let _ = progress.send(percent.min(100)).await;
                    }
                    Ok(AnalyzerLine::Error { message }) => {
                        return Err(AnalyzerError::Parse(message));
                    }
                    // The feature map carries no "type" tag
                    _ => last_line = Some(line),
                }
            }
            Ok(last_line)
        };

        let last_line = tokio::time::timeout(Duration::from_secs(self.timeout_secs), read_loop)
            .await
            .map_err(|_| {
                let _ = child.start_kill();
                StageError::from(AnalyzerError::Timeout(self.timeout_secs))
            })?
            .map_err(StageError::from)?;

        let output = child.wait_with_output().await.map_err(AnalyzerError::Io)?;
        if !output.status.success() {
            return Err(AnalyzerError::Exit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let line = last_line.ok_or(AnalyzerError::NoResult)?;
        let map: serde_json::Value = serde_json::from_str(&line)
            .map_err(|e| AnalyzerError::Parse(e.to_string()))
            .map_err(StageError::from)?;
        if !map.is_object() {
            return Err(AnalyzerError::Parse("feature map is not an object".into()).into());
        }
        Ok(map)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_progress_line_parses() {
        let line: AnalyzerLine = serde_json::from_str(r#"{"type":"progress","percent":80}"#).unwrap();
        assert!(matches!(line, AnalyzerLine::Progress { percent: 80 }));
    }

    #[test]
    fn test_exit_retryable_parse_fatal() {
        let exit = AnalyzerError::Exit {
            code: 137,
            stderr: "oom".into(),
        };
        assert!(StageError::from(exit).retryable);
        assert!(!StageError::from(AnalyzerError::Parse("bad json".into())).retryable);
    }
}
