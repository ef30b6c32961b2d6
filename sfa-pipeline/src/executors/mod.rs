//! Stage executors
//!
//! One executor per stage, all the same shape: load the job row, take
//! the conditional `running` transition, invoke the tool adapter,
//! persist artifacts, take the conditional `completed` transition,
//! publish events along the way. A lost conditional update means the
//! job reached a terminal state some other way (usually cancellation)
//! and the executor backs out without touching artifacts.
//!
//! Executors do not decide retries. They surface a classified
//! [`StageError`] and the caller (queue worker or batch runner) decides
//! between redelivery and finalizing the failure.

pub mod analysis;
pub mod download;
pub mod processing;

pub use crate::services::StageError;

use crate::db;
use crate::services::{Adapters, ProgressTx};
use sfa_common::config::PipelineConfig;
use sfa_common::events::{EventSink, PipelineEvent, Stage, StageStatus};
use sfa_common::Result;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use uuid::Uuid;

/// Everything an executor needs to run a stage
#[derive(Clone)]
pub struct PipelineContext {
    pub db: SqlitePool,
    pub sink: Arc<dyn EventSink>,
    pub config: Arc<PipelineConfig>,
    pub adapters: Adapters,
    pub root_folder: PathBuf,
}

impl PipelineContext {
    /// Where download artifacts for a track live
    pub fn downloads_dir(&self, track_id: Uuid) -> PathBuf {
        self.root_folder.join("downloads").join(track_id.to_string())
    }

    /// Where stem artifacts for a track live
    pub fn stems_dir(&self, track_id: Uuid) -> PathBuf {
        self.root_folder.join("stems").join(track_id.to_string())
    }

    pub(crate) fn emit_progress(
        &self,
        track_id: Uuid,
        stage: Stage,
        status: StageStatus,
        progress: u8,
    ) {
        self.sink.publish(PipelineEvent::StageProgress {
            track_id,
            stage,
            status,
            progress,
            timestamp: chrono::Utc::now(),
        });
    }

    pub(crate) fn emit_failed(&self, track_id: Uuid, stage: Stage, reason: &str) {
        self.sink.publish(PipelineEvent::StageFailed {
            track_id,
            stage,
            reason: reason.to_string(),
            timestamp: chrono::Utc::now(),
        });
    }

    /// Channel an adapter reports raw progress ticks into; the forwarder
    /// task republishes each tick as a `running` progress event and ends
    /// when the adapter drops its sender.
    pub(crate) fn progress_channel(&self, track_id: Uuid, stage: Stage) -> ProgressTx {
        let (tx, mut rx) = tokio::sync::mpsc::channel::<u8>(16);
        let sink = self.sink.clone();
        tokio::spawn(async move {
            while let Some(percent) = rx.recv().await {
                sink.publish(PipelineEvent::StageProgress {
                    track_id,
                    stage,
                    status: StageStatus::Running,
                    progress: percent.min(100),
                    timestamp: chrono::Utc::now(),
                });
            }
        });
        tx
    }
}

/// Run one stage job to its outcome
pub async fn run_stage(
    ctx: &PipelineContext,
    stage: Stage,
    job_id: Uuid,
) -> std::result::Result<(), StageError> {
    match stage {
        Stage::Download => download::execute(ctx, job_id).await,
        Stage::Processing => processing::execute(ctx, job_id).await,
        Stage::Analysis => analysis::execute(ctx, job_id).await,
    }
}

/// Finalize a stage failure: mark the job failed and publish the event
///
/// Only called once retries are off the table (fatal error or attempts
/// exhausted). The conditional update means an already-terminal job is
/// left alone and no duplicate failure event goes out.
pub async fn finalize_failure(
    ctx: &PipelineContext,
    stage: Stage,
    job_id: Uuid,
    track_id: Uuid,
    reason: &str,
) -> Result<()> {
    let marked = match stage {
        Stage::Download => db::download_jobs::mark_failed(&ctx.db, job_id, reason).await?,
        Stage::Processing => db::processing_jobs::mark_failed(&ctx.db, job_id, reason).await?,
        Stage::Analysis => db::analysis_jobs::mark_failed(&ctx.db, job_id, reason).await?,
    };
    if marked {
        tracing::warn!(%job_id, %stage, reason, "Stage failed");
        ctx.emit_failed(track_id, stage, reason);
    }
    Ok(())
}

/// Record error detail on a job that stays non-terminal for redelivery
pub async fn record_retryable_error(
    ctx: &PipelineContext,
    stage: Stage,
    job_id: Uuid,
    reason: &str,
) -> Result<()> {
    match stage {
        Stage::Download => db::download_jobs::record_error(&ctx.db, job_id, reason).await,
        Stage::Processing => db::processing_jobs::record_error(&ctx.db, job_id, reason).await,
        Stage::Analysis => db::analysis_jobs::record_error(&ctx.db, job_id, reason).await,
    }
}
