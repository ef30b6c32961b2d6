//! Cloud separation API client
//!
//! Task-based remote service: submit a file, poll until the task
//! finishes, download the produced stems. Submission carries an
//! `Idempotency-Key` header so redelivering the same job after a crash
//! reattaches to the existing remote task instead of creating (and
//! billing) a new one.

use crate::models::{StemFile, StemType};
use crate::services::{CloudSeparator, StageError};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::time::Duration;
use thiserror::Error;

const USER_AGENT: &str = concat!("sfa-pipeline/", env!("CARGO_PKG_VERSION"));

/// Cloud API errors
#[derive(Debug, Error)]
pub enum CloudError {
    #[error("Network error: {0}")]
    Network(String),

    #[error("API error {0}: {1}")]
    Api(u16, String),

    #[error("Authentication rejected")]
    Unauthorized,

    #[error("Processing quota exhausted")]
    QuotaExhausted,

    #[error("Remote task failed: {0}")]
    TaskFailed(String),

    #[error("Parse error: {0}")]
    Parse(String),

    #[error("Unknown stem name in result: {0}")]
    UnknownStem(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),
}

impl CloudError {
    /// Network trouble and 5xx responses may clear up; auth, quota and
    /// task-level failures won't.
    fn retryable(&self) -> bool {
        match self {
            CloudError::Network(_) | CloudError::Io(_) => true,
            CloudError::Api(status, _) => *status >= 500,
            _ => false,
        }
    }
}

impl From<CloudError> for StageError {
    fn from(err: CloudError) -> Self {
        StageError {
            retryable: err.retryable(),
            message: err.to_string(),
        }
    }
}

/// Remote task state as reported by the poll endpoint
#[derive(Debug, Clone, Deserialize)]
pub struct CloudTaskStatus {
    pub status: RemoteState,
    #[serde(default)]
    pub progress: Option<u8>,
    #[serde(default)]
    pub error: Option<String>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RemoteState {
    Pending,
    Processing,
    Completed,
    Failed,
    Cancelled,
}

/// Remaining processing quota
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuotaInfo {
    pub remaining_minutes: f64,
}

#[derive(Debug, Deserialize)]
struct SubmitResponse {
    task_id: String,
}

#[derive(Debug, Deserialize)]
struct ResultsResponse {
    stems: Vec<RemoteStem>,
}

#[derive(Debug, Deserialize)]
struct RemoteStem {
    stem_type: String,
    url: String,
}

/// HTTP-backed cloud separator
pub struct HttpCloudSeparator {
    client: reqwest::Client,
    base_url: String,
    api_key: String,
}

impl HttpCloudSeparator {
    pub fn new(base_url: String, api_key: String) -> Self {
        let client = reqwest::Client::builder()
            .user_agent(USER_AGENT)
            .timeout(Duration::from_secs(120))
            .build()
            .unwrap_or_default();
        Self {
            client,
            base_url,
            api_key,
        }
    }

    fn url(&self, path: &str) -> String {
        format!("{}{}", self.base_url.trim_end_matches('/'), path)
    }

    async fn check<T: serde::de::DeserializeOwned>(
        response: reqwest::Response,
    ) -> Result<T, CloudError> {
        let status = response.status();
        match status.as_u16() {
            200..=299 => response
                .json()
                .await
                .map_err(|e| CloudError::Parse(e.to_string())),
            401 | 403 => Err(CloudError::Unauthorized),
            429 => Err(CloudError::QuotaExhausted),
            code => {
                let body = response.text().await.unwrap_or_default();
                Err(CloudError::Api(code, body))
            }
        }
    }
}

#[async_trait]
impl CloudSeparator for HttpCloudSeparator {
    async fn submit(
        &self,
        input: &Path,
        mode_params: &serde_json::Value,
        preview: bool,
        idempotency_key: &str,
    ) -> Result<String, StageError> {
        let bytes = tokio::fs::read(input).await.map_err(CloudError::Io)?;
        let file_name = input
            .file_name()
            .map(|n| n.to_string_lossy().to_string())
            .unwrap_or_else(|| "input".to_string());

        let form = reqwest::multipart::Form::new()
            .part(
                "file",
                reqwest::multipart::Part::bytes(bytes).file_name(file_name),
            )
            .text("params", mode_params.to_string())
            .text("preview", preview.to_string());

        let response = self
            .client
            .post(self.url("/v1/tasks"))
            .bearer_auth(&self.api_key)
            .header("Idempotency-Key", idempotency_key)
            .multipart(form)
            .send()
            .await
            .map_err(|e| CloudError::Network(e.to_string()))?;

        let submitted: SubmitResponse = Self::check(response).await?;
        tracing::info!(task_id = %submitted.task_id, "Cloud task submitted");
        Ok(submitted.task_id)
    }

    async fn poll(&self, task_id: &str) -> Result<CloudTaskStatus, StageError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/tasks/{}", task_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| CloudError::Network(e.to_string()))?;
        Ok(Self::check(response).await?)
    }

    async fn fetch_results(
        &self,
        task_id: &str,
        out_dir: &Path,
    ) -> Result<Vec<StemFile>, StageError> {
        let response = self
            .client
            .get(self.url(&format!("/v1/tasks/{}/results", task_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| CloudError::Network(e.to_string()))?;
        let results: ResultsResponse = Self::check(response).await?;

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(CloudError::Io)?;

        let mut files = Vec::with_capacity(results.stems.len());
        for remote in results.stems {
            let stem_type = StemType::parse(&remote.stem_type)
                .ok_or_else(|| CloudError::UnknownStem(remote.stem_type.clone()))?;
            let response = self
                .client
                .get(&remote.url)
                .send()
                .await
                .map_err(|e| CloudError::Network(e.to_string()))?;
            if !response.status().is_success() {
                return Err(
                    CloudError::Api(response.status().as_u16(), remote.url.clone()).into(),
                );
            }
            let bytes = response
                .bytes()
                .await
                .map_err(|e| CloudError::Network(e.to_string()))?;

            let ext = remote.url.rsplit('.').next().unwrap_or("mp3").to_string();
            let path = out_dir.join(format!("{}.{}", stem_type.as_str(), ext));
            tokio::fs::write(&path, &bytes).await.map_err(CloudError::Io)?;
            files.push(StemFile {
                stem_type,
                file_path: path.to_string_lossy().to_string(),
                file_size: Some(bytes.len() as i64),
            });
        }
        Ok(files)
    }

    async fn cancel(&self, task_id: &str) -> Result<(), StageError> {
        let response = self
            .client
            .delete(self.url(&format!("/v1/tasks/{}", task_id)))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| CloudError::Network(e.to_string()))?;
        // Already-finished tasks report 409; treat as done
        if response.status().is_success() || response.status().as_u16() == 409 {
            Ok(())
        } else {
            let status = response.status().as_u16();
            let body = response.text().await.unwrap_or_default();
            Err(CloudError::Api(status, body).into())
        }
    }

    async fn quota(&self) -> Result<QuotaInfo, StageError> {
        let response = self
            .client
            .get(self.url("/v1/quota"))
            .bearer_auth(&self.api_key)
            .send()
            .await
            .map_err(|e| CloudError::Network(e.to_string()))?;
        Ok(Self::check(response).await?)
    }
}
