//! Tool adapters
//!
//! Each external tool (downloader helper, local Demucs runner, cloud
//! separation API, analyzer helper) gets a thin client with its own
//! error enum, and a trait so executors can run against fakes in tests.
//! Adapters report forward progress over an mpsc tick channel; the
//! executor owns republishing those ticks as pipeline events.

pub mod analyzer;
pub mod downloader;
pub mod separator_cloud;
pub mod separator_local;

pub use analyzer::{AnalyzerError, ProcessAnalyzer};
pub use downloader::{DownloadOutput, DownloaderError, ProcessDownloader};
pub use separator_cloud::{CloudError, CloudTaskStatus, HttpCloudSeparator, QuotaInfo};
pub use separator_local::{ProcessSeparator, SeparatorError};

use crate::models::{Feature, SeparationModel, StemFile, TrackMetadata};
use async_trait::async_trait;
use std::path::Path;
use std::sync::Arc;

/// Progress tick channel (0..=100), adapter side
pub type ProgressTx = tokio::sync::mpsc::Sender<u8>;

/// Adapter failure with a retry classification
///
/// Retryable failures leave the job non-terminal so the queue can
/// redeliver it; fatal failures terminate the job immediately.
#[derive(Debug, thiserror::Error)]
#[error("{message}")]
pub struct StageError {
    pub message: String,
    pub retryable: bool,
}

impl StageError {
    pub fn retryable(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: true,
        }
    }

    pub fn fatal(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
            retryable: false,
        }
    }
}

/// Source acquisition tool
#[async_trait]
pub trait Downloader: Send + Sync {
    /// Fetch track metadata without downloading audio
    async fn metadata(&self, url: &str) -> Result<TrackMetadata, StageError>;

    /// Download the source file into `dest_dir`
    async fn download(
        &self,
        url: &str,
        format: &str,
        bitrate: &str,
        dest_dir: &Path,
        progress: ProgressTx,
    ) -> Result<DownloadOutput, StageError>;
}

/// Local stem separation tool
#[async_trait]
pub trait LocalSeparator: Send + Sync {
    async fn separate(
        &self,
        input: &Path,
        model: SeparationModel,
        output_format: &str,
        out_dir: &Path,
        progress: ProgressTx,
    ) -> Result<Vec<StemFile>, StageError>;
}

/// Cloud separation service
#[async_trait]
pub trait CloudSeparator: Send + Sync {
    /// Submit the file for processing; returns the remote task handle.
    /// `mode_params` is the serialized mode payload; `idempotency_key`
    /// is sent as a header so a retried submission of the same job
    /// never creates (or bills) a second task.
    async fn submit(
        &self,
        input: &Path,
        mode_params: &serde_json::Value,
        preview: bool,
        idempotency_key: &str,
    ) -> Result<String, StageError>;

    /// Poll task state and progress
    async fn poll(&self, task_id: &str) -> Result<CloudTaskStatus, StageError>;

    /// Download finished stems into `out_dir`
    async fn fetch_results(
        &self,
        task_id: &str,
        out_dir: &Path,
    ) -> Result<Vec<StemFile>, StageError>;

    /// Best-effort remote cancel
    async fn cancel(&self, task_id: &str) -> Result<(), StageError>;

    /// Remaining processing quota
    async fn quota(&self) -> Result<QuotaInfo, StageError>;
}

/// Feature extraction tool
#[async_trait]
pub trait Analyzer: Send + Sync {
    /// Run extraction; returns the flat feature map as JSON
    async fn analyze(
        &self,
        input: &Path,
        features: &[Feature],
        progress: ProgressTx,
    ) -> Result<serde_json::Value, StageError>;
}

/// The adapter set executors run against
#[derive(Clone)]
pub struct Adapters {
    pub downloader: Arc<dyn Downloader>,
    pub local_separator: Arc<dyn LocalSeparator>,
    pub cloud_separator: Arc<dyn CloudSeparator>,
    pub analyzer: Arc<dyn Analyzer>,
}

impl Adapters {
    /// Process/HTTP-backed adapters from config
    pub fn from_config(config: &sfa_common::config::PipelineConfig) -> Self {
        Self {
            downloader: Arc::new(ProcessDownloader::new(
                config.tools.downloader_bin.clone(),
                config.timeouts.download_secs,
            )),
            local_separator: Arc::new(ProcessSeparator::new(
                config.tools.separator_bin.clone(),
                config.timeouts.local_separation_secs,
            )),
            cloud_separator: Arc::new(HttpCloudSeparator::new(
                config.cloud.base_url.clone(),
                config.cloud.api_key.clone(),
            )),
            analyzer: Arc::new(ProcessAnalyzer::new(
                config.tools.analyzer_bin.clone(),
                config.timeouts.analysis_secs,
            )),
        }
    }
}
