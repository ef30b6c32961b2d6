//! Analysis stage executor
//!
//! Extracts musical features from the track's downloaded source and
//! replaces the track's analysis results.

use crate::db;
use crate::executors::{PipelineContext, StageError};
use crate::models::AnalysisResult;
use sfa_common::events::{Stage, StageStatus};
use uuid::Uuid;

pub async fn execute(ctx: &PipelineContext, job_id: Uuid) -> Result<(), StageError> {
    let job = db::analysis_jobs::get(&ctx.db, job_id)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?
        .ok_or_else(|| StageError::fatal(format!("Analysis job {} not found", job_id)))?;

    if job.status.is_terminal() {
        tracing::debug!(%job_id, status = %job.status, "Analysis job already terminal, skipping");
        return Ok(());
    }

    // Stage dependency: analysis reads the downloaded source, not stems
    let source = db::download_jobs::latest_completed(&ctx.db, job.track_id)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?
        .and_then(|d| d.output_path)
        .ok_or_else(|| {
            StageError::fatal(format!("Track {} has no completed download", job.track_id))
        })?;

    if !db::analysis_jobs::mark_running(&ctx.db, job_id)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?
    {
        return Ok(());
    }
    ctx.emit_progress(job.track_id, Stage::Analysis, StageStatus::Running, 0);
    tracing::info!(%job_id, track_id = %job.track_id, "Analysis started");

    let progress = ctx.progress_channel(job.track_id, Stage::Analysis);
    let features = ctx
        .adapters
        .analyzer
        .analyze(source.as_ref(), &job.options.features, progress)
        .await?;

    let result = AnalysisResult::from_features(job.track_id, job_id, features);
    let completed = db::analysis_jobs::complete_with_result(&ctx.db, job_id, &result)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?;
    if completed {
        tracing::info!(%job_id, tempo = ?result.tempo, key = ?result.musical_key, "Analysis completed");
        ctx.emit_progress(job.track_id, Stage::Analysis, StageStatus::Completed, 100);
    } else {
        tracing::debug!(%job_id, "Analysis finished after job left running state");
    }
    Ok(())
}
