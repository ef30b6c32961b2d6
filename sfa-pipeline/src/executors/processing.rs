//! Processing stage executor
//!
//! Separates the track's downloaded source into stems, with either the
//! local runner or the cloud API depending on the job's engine. Cloud
//! jobs persist the remote task handle the moment submission succeeds,
//! then poll until the task reaches a terminal remote state. A job
//! redelivered after a crash reattaches to its existing remote task via
//! that handle plus the idempotency key, never paying for a second run.

use crate::db;
use crate::executors::{PipelineContext, StageError};
use crate::models::{ProcessingJob, SeparationRequest, StemFile};
use crate::services::separator_cloud::RemoteState;
use sfa_common::events::{Stage, StageStatus};
use std::time::Duration;
use uuid::Uuid;

pub async fn execute(ctx: &PipelineContext, job_id: Uuid) -> Result<(), StageError> {
    let job = db::processing_jobs::get(&ctx.db, job_id)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?
        .ok_or_else(|| StageError::fatal(format!("Processing job {} not found", job_id)))?;

    if job.status.is_terminal() {
        tracing::debug!(%job_id, status = %job.status, "Processing job already terminal, skipping");
        return Ok(());
    }

    // Stage dependency: a completed download must exist
    let source = db::download_jobs::latest_completed(&ctx.db, job.track_id)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?
        .and_then(|d| d.output_path)
        .ok_or_else(|| {
            StageError::fatal(format!("Track {} has no completed download", job.track_id))
        })?;

    if !db::processing_jobs::mark_running(&ctx.db, job_id)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?
    {
        return Ok(());
    }
    ctx.emit_progress(job.track_id, Stage::Processing, StageStatus::Running, 0);
    tracing::info!(
        %job_id,
        track_id = %job.track_id,
        engine = %job.engine,
        mode = %job.mode,
        "Processing started"
    );

    let out_dir = ctx.stems_dir(job.track_id);
    tokio::fs::create_dir_all(&out_dir)
        .await
        .map_err(|e| StageError::retryable(format!("Failed to create {}: {}", out_dir.display(), e)))?;

    let stems = match &job.options.request {
        SeparationRequest::Local {
            model,
            output_format,
        } => {
            let progress = ctx.progress_channel(job.track_id, Stage::Processing);
            ctx.adapters
                .local_separator
                .separate(
                    source.as_ref(),
                    *model,
                    output_format,
                    &out_dir,
                    progress,
                )
                .await?
        }
        SeparationRequest::Cloud { mode, preview } => {
            let stems = run_cloud(ctx, &job, &source, mode, *preview, &out_dir).await?;
            match stems {
                Some(stems) => stems,
                // Remote task was cancelled out from under us; the job
                // row is (or is about to be) cancelled too.
                None => return Ok(()),
            }
        }
    };

    // Snapshot the outgoing stem set before the completion transaction
    // deletes its rows, so the replaced files can be removed too.
    let old_paths = db::stems::file_paths_for_track(&ctx.db, job.track_id)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?;

    let completed = db::processing_jobs::complete_with_stems(&ctx.db, job_id, job.track_id, &stems)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?;
    if completed {
        let kept: std::collections::HashSet<&str> =
            stems.iter().map(|s| s.file_path.as_str()).collect();
        for path in old_paths {
            if !kept.contains(path.as_str()) {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        tracing::info!(%job_id, stem_count = stems.len(), "Processing completed");
        ctx.emit_progress(job.track_id, Stage::Processing, StageStatus::Completed, 100);
    } else {
        // Cancelled while we were finishing; the fresh stem files are
        // orphans now, remove them.
        tracing::debug!(%job_id, "Processing finished after job left running state");
        for stem in &stems {
            let _ = tokio::fs::remove_file(&stem.file_path).await;
        }
    }
    Ok(())
}

/// Cloud engine path: submit (or reattach), poll, fetch
///
/// Returns `Ok(None)` when the remote task reports cancelled.
async fn run_cloud(
    ctx: &PipelineContext,
    job: &ProcessingJob,
    source: &str,
    mode: &crate::models::CloudMode,
    preview: bool,
    out_dir: &std::path::Path,
) -> Result<Option<Vec<StemFile>>, StageError> {
    let cloud = &ctx.adapters.cloud_separator;

    let task_id = match &job.remote_task_id {
        Some(task_id) => {
            tracing::debug!(job_id = %job.job_id, %task_id, "Reattaching to existing cloud task");
            task_id.clone()
        }
        None => {
            let mode_params = serde_json::to_value(mode)
                .map_err(|e| StageError::fatal(format!("Failed to serialize mode: {}", e)))?;
            let task_id = cloud
                .submit(source.as_ref(), &mode_params, preview, &job.idempotency_key)
                .await?;
            db::processing_jobs::set_remote_task_id(&ctx.db, job.job_id, &task_id)
                .await
                .map_err(|e| StageError::retryable(e.to_string()))?;
            task_id
        }
    };

    let poll_interval = Duration::from_millis(ctx.config.cloud.poll_interval_ms);
    let deadline =
        tokio::time::Instant::now() + Duration::from_secs(ctx.config.cloud.poll_timeout_secs);

    loop {
        if tokio::time::Instant::now() >= deadline {
            // Redelivery reattaches via the stored task id, so timing
            // out here does not abandon the remote work.
            return Err(StageError::retryable(format!(
                "Cloud task {} still running after {}s",
                task_id, ctx.config.cloud.poll_timeout_secs
            )));
        }

        let status = cloud.poll(&task_id).await?;
        match status.status {
            RemoteState::Pending | RemoteState::Processing => {
                if let Some(progress) = status.progress {
                    ctx.emit_progress(
                        job.track_id,
                        Stage::Processing,
                        StageStatus::Running,
                        progress.min(100),
                    );
                }
            }
            RemoteState::Completed => break,
            RemoteState::Failed => {
                let reason = status.error.unwrap_or_else(|| "unspecified".to_string());
                return Err(StageError::fatal(format!(
                    "Cloud task {} failed: {}",
                    task_id, reason
                )));
            }
            RemoteState::Cancelled => {
                tracing::info!(job_id = %job.job_id, %task_id, "Cloud task cancelled remotely");
                return Ok(None);
            }
        }
        tokio::time::sleep(poll_interval).await;
    }

    let stems = cloud.fetch_results(&task_id, out_dir).await?;
    Ok(Some(stems))
}
