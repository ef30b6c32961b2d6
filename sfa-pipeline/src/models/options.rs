//! Request and per-job option payloads
//!
//! Job options are persisted as JSON TEXT on the job row, so anything a
//! redelivered unit of work needs (including the idempotency key) lives
//! here rather than in process memory.

use crate::models::analysis::Feature;
use crate::models::engine::SeparationRequest;
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Caller-facing options for starting or retrying a pipeline
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineOptions {
    /// Chain processing after download and analysis after processing
    pub auto_chain: bool,
    /// Download stage options; config defaults apply when absent
    pub download: Option<DownloadStageOptions>,
    /// Separation engine/mode selection; config defaults apply when absent
    pub separation: Option<SeparationRequest>,
    /// Analysis feature list; config defaults apply when absent
    pub analysis: Option<AnalysisStageOptions>,
    /// Explicit idempotency key for the processing stage
    ///
    /// Normally absent; the guard generates one per processing job.
    pub idempotency_key: Option<String>,
}

/// Download stage request options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DownloadStageOptions {
    pub format: String,
    pub bitrate: String,
}

impl Default for DownloadStageOptions {
    fn default() -> Self {
        Self {
            format: "mp3".to_string(),
            bitrate: "320k".to_string(),
        }
    }
}

/// Analysis stage request options
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisStageOptions {
    pub features: Vec<Feature>,
}

/// Options payload persisted on a download job row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJobOptions {
    pub format: String,
    pub bitrate: String,
    /// Carried so the queue worker knows whether to chain processing
    #[serde(default)]
    pub auto_chain: bool,
    /// Separation selection to apply when chaining
    #[serde(default)]
    pub separation: Option<SeparationRequest>,
    /// Analysis options to pass through when chaining
    #[serde(default)]
    pub analysis: Option<AnalysisStageOptions>,
}

/// Options payload persisted on a processing job row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJobOptions {
    pub request: SeparationRequest,
    /// Stable per-job idempotency key; never regenerated after creation
    pub idempotency_key: Option<String>,
    /// Carried so the queue worker knows whether to chain analysis
    #[serde(default)]
    pub auto_chain: bool,
    /// Analysis options to apply when chaining
    #[serde(default)]
    pub analysis: Option<AnalysisStageOptions>,
}

impl ProcessingJobOptions {
    /// Fill in a generated idempotency key when the caller supplied none,
    /// returning the key that ends up on the job
    ///
    /// Called exactly once, at job-creation time. Queue-level redelivery
    /// re-reads the key from the row instead of coming back here, which
    /// is what makes automatic retries safe against double-billing.
    pub fn ensure_idempotency_key(&mut self) -> String {
        match &self.idempotency_key {
            Some(key) => key.clone(),
            None => {
                let key = Uuid::new_v4().simple().to_string();
                self.idempotency_key = Some(key.clone());
                key
            }
        }
    }
}

/// Options payload persisted on an analysis job row
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJobOptions {
    pub features: Vec<Feature>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::engine::SeparationModel;

    #[test]
    fn test_generated_key_is_stored_and_stable() {
        let mut options = ProcessingJobOptions {
            request: SeparationRequest::local(SeparationModel::Htdemucs),
            idempotency_key: None,
            auto_chain: false,
            analysis: None,
        };
        let key = options.ensure_idempotency_key();
        assert!(!key.is_empty());
        assert_eq!(options.idempotency_key.as_deref(), Some(key.as_str()));

        // A second call must not regenerate
        assert_eq!(options.ensure_idempotency_key(), key);
    }

    #[test]
    fn test_explicit_key_is_preserved() {
        let mut options = ProcessingJobOptions {
            request: SeparationRequest::local(SeparationModel::Htdemucs),
            idempotency_key: Some("caller-key".to_string()),
            auto_chain: false,
            analysis: None,
        };
        assert_eq!(options.ensure_idempotency_key(), "caller-key");
    }

    #[test]
    fn test_two_jobs_without_explicit_keys_get_distinct_keys() {
        let make = || ProcessingJobOptions {
            request: SeparationRequest::local(SeparationModel::Htdemucs),
            idempotency_key: None,
            auto_chain: false,
            analysis: None,
        };
        let k1 = make().ensure_idempotency_key();
        let k2 = make().ensure_idempotency_key();
        assert_ne!(k1, k2);
    }

    #[test]
    fn test_key_survives_json_roundtrip() {
        let mut options = ProcessingJobOptions {
            request: SeparationRequest::local(SeparationModel::MdxExtra),
            idempotency_key: None,
            auto_chain: true,
            analysis: None,
        };
        let key = options.ensure_idempotency_key();
        let json = serde_json::to_string(&options).expect("serialize");
        let back: ProcessingJobOptions = serde_json::from_str(&json).expect("deserialize");
        assert_eq!(back.idempotency_key.as_deref(), Some(key.as_str()));
        assert!(back.auto_chain);
    }
}
