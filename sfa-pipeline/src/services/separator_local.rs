//! Local Demucs runner client
//!
//! Spawns the separation runner as a subprocess. Output protocol is
//! NDJSON: `{"type":"progress","percent":N}` while separating, then a
//! final `{"type":"result","stems":{"vocals":"/path",...}}` mapping
//! stem names to produced files.

use crate::models::{SeparationModel, StemFile, StemType};
use crate::services::{LocalSeparator, ProgressTx, StageError};
use async_trait::async_trait;
use serde::Deserialize;
use std::collections::HashMap;
use std::path::Path;
use std::process::Stdio;
use std::time::Duration;
use thiserror::Error;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;

/// Separation runner errors
#[derive(Debug, Error)]
pub enum SeparatorError {
    #[error("Failed to spawn separator: {0}")]
    Spawn(String),

    #[error("Separator exited with {code}: {stderr}")]
    Exit { code: i32, stderr: String },

    #[error("Failed to parse separator output: {0}")]
    Parse(String),

    #[error("Separator produced no result")]
    NoResult,

    #[error("Unknown stem name in result: {0}")]
    UnknownStem(String),

    #[error("Separation timed out after {0}s")]
    Timeout(u64),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl SeparatorError {
    fn retryable(&self) -> bool {
        matches!(
            self,
            SeparatorError::Exit { .. } | SeparatorError::Timeout(_) | SeparatorError::Io(_)
        )
    }
}

impl From<SeparatorError> for StageError {
    fn from(err: SeparatorError) -> Self {
        StageError {
            retryable: err.retryable(),
            message: err.to_string(),
        }
    }
}

#[derive(Debug, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
enum RunnerLine {
    Progress {
        percent: u8,
    },
    Result {
        stems: HashMap<String, String>,
    },
    Error {
        message: String,
    },
}

/// Process-backed local separator
pub struct ProcessSeparator {
    binary: String,
    timeout_secs: u64,
}

impl ProcessSeparator {
    pub fn new(binary: String, timeout_secs: u64) -> Self {
        Self {
            binary,
            timeout_secs,
        }
    }
}

#[async_trait]
impl LocalSeparator for ProcessSeparator {
    async fn separate(
        &self,
        input: &Path,
        model: SeparationModel,
        output_format: &str,
        out_dir: &Path,
        progress: ProgressTx,
    ) -> Result<Vec<StemFile>, StageError> {
        tracing::debug!(
            binary = %self.binary,
            model = model.as_str(),
            input = %input.display(),
            "Spawning separator"
        );
        let mut child = Command::new(&self.binary)
            .arg(input)
            .args(["--model", model.as_str()])
            .args(["--format", output_format])
            .arg("--output")
            .arg(out_dir)
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .map_err(|e| SeparatorError::Spawn(e.to_string()))
            .map_err(StageError::from)?;

        let stdout = child
            .stdout
            .take()
            .ok_or(SeparatorError::NoResult)
            .map_err(StageError::from)?;
        let mut lines = BufReader::new(stdout).lines();

        let read_loop = async {
            let mut stems = None;
            while let Some(line) = lines.next_line().await? {
                if line.trim().is_empty() {
                    continue;
                }
                match serde_json::from_str::<RunnerLine>(&line)
                    .map_err(|e| SeparatorError::Parse(e.to_string()))?
                {
                    RunnerLine::Progress { percent } => {
                        let _ = progress.send(percent.min(100)).await;
                    }
                    RunnerLine::Result { stems: map } => stems = Some(map),
                    RunnerLine::Error { message } => {
                        return Err(SeparatorError::Parse(message));
                    }
                }
            }
            Ok(stems)
        };

        let stems = tokio::time::timeout(Duration::from_secs(self.timeout_secs), read_loop)
            .await
            .map_err(|_| {
                let _ = child.start_kill();
                StageError::from(SeparatorError::Timeout(self.timeout_secs))
            })?
            .map_err(StageError::from)?;

        let output = child.wait_with_output().await.map_err(SeparatorError::Io)?;
        if !output.status.success() {
            return Err(SeparatorError::Exit {
                code: output.status.code().unwrap_or(-1),
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }
            .into());
        }

        let map = stems.ok_or(SeparatorError::NoResult)?;
        let mut files = Vec::with_capacity(map.len());
        for (name, path) in map {
            let stem_type = StemType::parse(&name)
                .ok_or_else(|| SeparatorError::UnknownStem(name.clone()))?;
            let file_size = tokio::fs::metadata(&path).await.ok().map(|m| m.len() as i64);
            files.push(StemFile {
                stem_type,
                file_path: path,
                file_size,
            });
        }
        files.sort_by_key(|f| f.stem_type.as_str());
        Ok(files)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_result_line_parses_stem_map() {
        let line: RunnerLine = serde_json::from_str(
            r#"{"type":"result","stems":{"vocals":"/out/vocals.mp3","drums":"/out/drums.mp3"}}"#,
        )
        .unwrap();
        match line {
            RunnerLine::Result { stems } => {
                assert_eq!(stems.len(), 2);
                assert_eq!(stems["vocals"], "/out/vocals.mp3");
            }
            _ => panic!("expected result line"),
        }
    }

    #[test]
    fn test_timeout_is_retryable_unknown_stem_is_not() {
        assert!(StageError::from(SeparatorError::Timeout(10)).retryable);
        assert!(!StageError::from(SeparatorError::UnknownStem("sax".into())).retryable);
    }
}
