//! Pipeline control endpoints: start, retry, cancel, batch, status

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sfa_common::events::{Stage, StageStatus};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::PipelineOptions;
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct StartRequest {
    pub track_id: Uuid,
    #[serde(flatten)]
    pub options: PipelineOptions,
}

#[derive(Debug, Deserialize)]
pub struct RetryRequest {
    pub track_id: Uuid,
    pub stage: Stage,
    #[serde(flatten)]
    pub options: PipelineOptions,
}

#[derive(Debug, Deserialize, Default)]
#[serde(default)]
pub struct CancelRequest {
    pub reason: Option<String>,
}

#[derive(Debug, Deserialize)]
pub struct BatchRequest {
    pub track_ids: Vec<Uuid>,
    #[serde(flatten)]
    pub options: PipelineOptions,
}

#[derive(Debug, Serialize)]
pub struct JobResponse {
    pub job_id: Uuid,
    pub track_id: Uuid,
}

#[derive(Debug, Serialize)]
pub struct BatchResponse {
    pub batch_id: Uuid,
    pub total_count: usize,
}

/// Latest job for one stage, as reported by the status endpoint
#[derive(Debug, Serialize)]
pub struct JobSummary {
    pub job_id: Uuid,
    pub status: StageStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub created_at: DateTime<Utc>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub started_at: Option<DateTime<Utc>>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub finished_at: Option<DateTime<Utc>>,
}

#[derive(Debug, Serialize)]
pub struct StatusResponse {
    pub track_id: Uuid,
    pub download: Option<JobSummary>,
    pub processing: Option<JobSummary>,
    pub analysis: Option<JobSummary>,
}

/// POST /pipeline/start - queue the download stage (and, with
/// auto_chain, everything after it)
pub async fn start_pipeline(
    State(state): State<AppState>,
    Json(request): Json<StartRequest>,
) -> ApiResult<Json<JobResponse>> {
    let job = state
        .coordinator
        .start(request.track_id, request.options)
        .await?;
    Ok(Json(JobResponse {
        job_id: job.job_id,
        track_id: job.track_id,
    }))
}

/// POST /pipeline/retry - fresh job for one stage
pub async fn retry_stage(
    State(state): State<AppState>,
    Json(request): Json<RetryRequest>,
) -> ApiResult<Json<JobResponse>> {
    let job_id = state
        .coordinator
        .retry_stage(request.track_id, request.stage, request.options)
        .await?;
    Ok(Json(JobResponse {
        job_id,
        track_id: request.track_id,
    }))
}

/// POST /pipeline/:job_id/cancel - cancel a processing job
///
/// 409 when the job already reached a terminal state; the earlier
/// outcome stands.
pub async fn cancel_processing(
    State(state): State<AppState>,
    Path(job_id): Path<Uuid>,
    Json(request): Json<CancelRequest>,
) -> ApiResult<Json<serde_json::Value>> {
    let reason = request.reason.unwrap_or_else(|| "cancelled by user".to_string());
    let cancelled = state.coordinator.cancel_processing(job_id, &reason).await?;
    if !cancelled {
        return Err(ApiError::Conflict(format!(
            "Processing job {} already finished",
            job_id
        )));
    }
    Ok(Json(serde_json::json!({ "cancelled": job_id })))
}

/// POST /pipeline/batch - full pipeline for many tracks, bounded fan-out
pub async fn start_batch(
    State(state): State<AppState>,
    Json(request): Json<BatchRequest>,
) -> ApiResult<Json<BatchResponse>> {
    let total_count = request.track_ids.len();
    let batch_id = state
        .coordinator
        .start_batch(request.track_ids, request.options)
        .await?;
    Ok(Json(BatchResponse {
        batch_id,
        total_count,
    }))
}

/// GET /pipeline/quota - remaining cloud separation minutes
pub async fn cloud_quota(
    State(state): State<AppState>,
) -> ApiResult<Json<crate::services::QuotaInfo>> {
    let quota = state.coordinator.cloud_quota().await?;
    Ok(Json(quota))
}

/// GET /pipeline/:track_id/status - latest job per stage
pub async fn pipeline_status(
    State(state): State<AppState>,
    Path(track_id): Path<Uuid>,
) -> ApiResult<Json<StatusResponse>> {
    db::tracks::get(&state.db, track_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Track {} not found", track_id)))?;

    let download = db::download_jobs::list_for_track(&state.db, track_id)
        .await?
        .into_iter()
        .next()
        .map(|j| JobSummary {
            job_id: j.job_id,
            status: j.status,
            error: j.error,
            created_at: j.created_at,
            started_at: j.started_at,
            finished_at: j.finished_at,
        });
    let processing = db::processing_jobs::list_for_track(&state.db, track_id)
        .await?
        .into_iter()
        .next()
        .map(|j| JobSummary {
            job_id: j.job_id,
            status: j.status,
            error: j.error,
            created_at: j.created_at,
            started_at: j.started_at,
            finished_at: j.finished_at,
        });
    let analysis = db::analysis_jobs::list_for_track(&state.db, track_id)
        .await?
        .into_iter()
        .next()
        .map(|j| JobSummary {
            job_id: j.job_id,
            status: j.status,
            error: j.error,
            created_at: j.created_at,
            started_at: j.started_at,
            finished_at: j.finished_at,
        });

    Ok(Json(StatusResponse {
        track_id,
        download,
        processing,
        analysis,
    }))
}

/// Build pipeline routes
pub fn pipeline_routes() -> Router<AppState> {
    Router::new()
        .route("/pipeline/start", post(start_pipeline))
        .route("/pipeline/retry", post(retry_stage))
        .route("/pipeline/:id/cancel", post(cancel_processing))
        .route("/pipeline/batch", post(start_batch))
        .route("/pipeline/quota", get(cloud_quota))
        .route("/pipeline/:id/status", get(pipeline_status))
}
