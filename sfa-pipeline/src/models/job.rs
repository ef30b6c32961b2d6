//! Stage job records
//!
//! One row per stage attempt. Status only moves forward through
//! `queued → running → {completed|failed|cancelled}`; a terminal job is
//! never resurrected — retry always creates a new row for the same track.

use crate::models::options::{AnalysisJobOptions, DownloadJobOptions, ProcessingJobOptions};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sfa_common::events::StageStatus;
use uuid::Uuid;

/// One acquisition attempt for a track
///
/// Multiple may exist per track (history of attempts); the authoritative
/// source is the latest `completed` one by recency.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DownloadJob {
    pub job_id: Uuid,
    pub track_id: Uuid,
    pub status: StageStatus,
    pub options: DownloadJobOptions,
    pub output_path: Option<String>,
    pub file_size: Option<i64>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl DownloadJob {
    pub fn new(track_id: Uuid, options: DownloadJobOptions) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            track_id,
            status: StageStatus::Queued,
            options,
            output_path: None,
            file_size: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// One separation attempt for a track
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ProcessingJob {
    pub job_id: Uuid,
    pub track_id: Uuid,
    pub status: StageStatus,
    /// `local` or `cloud` (denormalized from options for querying)
    pub engine: String,
    /// Engine-specific mode name (denormalized from options)
    pub mode: String,
    pub options: ProcessingJobOptions,
    /// Immutable for the lifetime of this row once set at creation
    pub idempotency_key: String,
    /// Cloud task handle; written the moment submission succeeds so a
    /// concurrent cancel request can always find it
    pub remote_task_id: Option<String>,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl ProcessingJob {
    /// Create a new processing job, running the idempotency guard
    ///
    /// The key is generated here (unless the caller supplied one) and
    /// stored inside the options payload before the row is persisted.
    pub fn new(track_id: Uuid, mut options: ProcessingJobOptions) -> Self {
        let idempotency_key = options.ensure_idempotency_key();
        let engine = options.request.engine().to_string();
        let mode = options.request.mode().to_string();
        Self {
            job_id: Uuid::new_v4(),
            track_id,
            status: StageStatus::Queued,
            engine,
            mode,
            options,
            idempotency_key,
            remote_task_id: None,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

/// One feature-extraction attempt for a track
///
/// Requires a completed download to exist first.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AnalysisJob {
    pub job_id: Uuid,
    pub track_id: Uuid,
    pub status: StageStatus,
    pub options: AnalysisJobOptions,
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    pub started_at: Option<DateTime<Utc>>,
    pub finished_at: Option<DateTime<Utc>>,
}

impl AnalysisJob {
    pub fn new(track_id: Uuid, options: AnalysisJobOptions) -> Self {
        Self {
            job_id: Uuid::new_v4(),
            track_id,
            status: StageStatus::Queued,
            options,
            error: None,
            created_at: Utc::now(),
            started_at: None,
            finished_at: None,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::engine::{SeparationModel, SeparationRequest};

    #[test]
    fn test_processing_job_gets_key_at_creation() {
        let options = ProcessingJobOptions {
            request: SeparationRequest::local(SeparationModel::Htdemucs),
            idempotency_key: None,
            auto_chain: false,
            analysis: None,
        };
        let job = ProcessingJob::new(Uuid::new_v4(), options);
        assert!(!job.idempotency_key.is_empty());
        assert_eq!(
            job.options.idempotency_key.as_deref(),
            Some(job.idempotency_key.as_str())
        );
        assert_eq!(job.engine, "local");
        assert_eq!(job.mode, "default");
        assert_eq!(job.status, StageStatus::Queued);
    }

    #[test]
    fn test_two_jobs_same_options_distinct_keys() {
        let make = || {
            ProcessingJob::new(
                Uuid::new_v4(),
                ProcessingJobOptions {
                    request: SeparationRequest::local(SeparationModel::Htdemucs),
                    idempotency_key: None,
                    auto_chain: false,
                    analysis: None,
                },
            )
        };
        assert_ne!(make().idempotency_key, make().idempotency_key);
    }
}
