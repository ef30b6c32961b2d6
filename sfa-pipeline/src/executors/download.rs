//! Download stage executor
//!
//! Acquires the source file for a track via the fetch helper and
//! records the produced artifact on the job row.

use crate::db;
use crate::executors::{PipelineContext, StageError};
use sfa_common::events::{Stage, StageStatus};
use uuid::Uuid;

pub async fn execute(ctx: &PipelineContext, job_id: Uuid) -> Result<(), StageError> {
    let job = db::download_jobs::get(&ctx.db, job_id)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?
        .ok_or_else(|| StageError::fatal(format!("Download job {} not found", job_id)))?;

    if job.status.is_terminal() {
        tracing::debug!(%job_id, status = %job.status, "Download job already terminal, skipping");
        return Ok(());
    }

    let track = db::tracks::get(&ctx.db, job.track_id)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?
        .ok_or_else(|| StageError::fatal(format!("Track {} not found", job.track_id)))?;

    if !db::download_jobs::mark_running(&ctx.db, job_id)
        .await
        .map_err(|e| StageError::retryable(e.to_string()))?
    {
        return Ok(());
    }
    ctx.emit_progress(job.track_id, Stage::Download, StageStatus::Running, 0);
    tracing::info!(%job_id, track_id = %job.track_id, url = %track.source_url, "Download started");

    let dest_dir = ctx.downloads_dir(job.track_id);
    tokio::fs::create_dir_all(&dest_dir)
        .await
        .map_err(|e| StageError::retryable(format!("Failed to create {}: {}", dest_dir.display(), e)))?;

    let progress = ctx.progress_channel(job.track_id, Stage::Download);
    let output = ctx
        .adapters
        .downloader
        .download(
            &track.source_url,
            &job.options.format,
            &job.options.bitrate,
            &dest_dir,
            progress,
        )
        .await?;

    let completed =
        db::download_jobs::mark_completed(&ctx.db, job_id, &output.path, output.size)
            .await
            .map_err(|e| StageError::retryable(e.to_string()))?;
    if completed {
        tracing::info!(%job_id, path = %output.path, size = output.size, "Download completed");
        ctx.emit_progress(job.track_id, Stage::Download, StageStatus::Completed, 100);
    } else {
        // Lost the race to a cancel; leave the file for cleanup on delete
        tracing::debug!(%job_id, "Download finished after job left running state");
    }
    Ok(())
}
