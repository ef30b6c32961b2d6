//! Pipeline coordinator
//!
//! Owns the lifecycle decisions: creating stage jobs, feeding the
//! durable queue, chaining stages, cancellation, batch runs and track
//! deletion. Executors do the work; the coordinator decides what work
//! exists.

use crate::db;
use crate::executors::{self, PipelineContext};
use crate::models::{
    AnalysisJob, AnalysisJobOptions, DownloadJob, DownloadJobOptions, Feature, PipelineOptions,
    ProcessingJob, ProcessingJobOptions, SeparationModel, SeparationRequest, Track,
};
use futures::{stream, StreamExt};
use sfa_common::events::{EventSink, PipelineEvent, Stage, StageStatus};
use sfa_common::{Error, Result};
use uuid::Uuid;

#[derive(Clone)]
pub struct Coordinator {
    ctx: PipelineContext,
}

impl Coordinator {
    pub fn new(ctx: PipelineContext) -> Self {
        Self { ctx }
    }

    pub fn context(&self) -> &PipelineContext {
        &self.ctx
    }

    /// Import a track: fetch provider metadata and create the row
    pub async fn import_track(&self, url: &str) -> Result<Track> {
        let metadata = self
            .ctx
            .adapters
            .downloader
            .metadata(url)
            .await
            .map_err(|e| Error::Internal(format!("Metadata fetch failed: {}", e)))?;
        let track = Track::from_metadata(url.to_string(), &metadata);
        db::tracks::insert(&self.ctx.db, &track).await?;
        tracing::info!(track_id = %track.track_id, title = %track.title, "Track imported");
        Ok(track)
    }

    /// Start the pipeline for a track, beginning with download
    ///
    /// With `auto_chain` the separation and analysis selections ride
    /// along on the download job and each completed stage queues the
    /// next one.
    pub async fn start(&self, track_id: Uuid, options: PipelineOptions) -> Result<DownloadJob> {
        if let Some(request) = &options.separation {
            request.validate().map_err(Error::InvalidInput)?;
        }
        self.require_track(track_id).await?;
        self.start_download(track_id, &options).await
    }

    /// Start a fresh job for one stage
    ///
    /// Retry never resurrects a terminal row; it creates a new job (and
    /// for processing, a new idempotency key — a manual retry is a new
    /// logical attempt).
    pub async fn retry_stage(
        &self,
        track_id: Uuid,
        stage: Stage,
        options: PipelineOptions,
    ) -> Result<Uuid> {
        self.require_track(track_id).await?;
        match stage {
            Stage::Download => {
                let job = self.start_download(track_id, &options).await?;
                Ok(job.job_id)
            }
            Stage::Processing => {
                self.require_completed_download(track_id).await?;
                let request = options
                    .separation
                    .unwrap_or_else(|| self.default_separation());
                request.validate().map_err(Error::InvalidInput)?;
                let job = self
                    .start_processing(
                        track_id,
                        ProcessingJobOptions {
                            request,
                            idempotency_key: options.idempotency_key,
                            auto_chain: options.auto_chain,
                            analysis: options.analysis,
                        },
                    )
                    .await?;
                Ok(job.job_id)
            }
            Stage::Analysis => {
                self.require_completed_download(track_id).await?;
                let features = match options.analysis {
                    Some(opts) => opts.features,
                    None => self.default_features(),
                };
                let job = self.start_analysis(track_id, features).await?;
                Ok(job.job_id)
            }
        }
    }

    async fn start_download(
        &self,
        track_id: Uuid,
        options: &PipelineOptions,
    ) -> Result<DownloadJob> {
        let download = options.download.clone().unwrap_or_default();
        let job = DownloadJob::new(
            track_id,
            DownloadJobOptions {
                format: download.format,
                bitrate: download.bitrate,
                auto_chain: options.auto_chain,
                separation: options.separation.clone(),
                analysis: options.analysis.clone(),
            },
        );
        db::download_jobs::insert(&self.ctx.db, &job).await?;
        self.enqueue(Stage::Download, job.job_id, track_id).await?;
        Ok(job)
    }

    pub(crate) async fn start_processing(
        &self,
        track_id: Uuid,
        options: ProcessingJobOptions,
    ) -> Result<ProcessingJob> {
        let job = ProcessingJob::new(track_id, options);
        db::processing_jobs::insert(&self.ctx.db, &job).await?;
        self.enqueue(Stage::Processing, job.job_id, track_id)
            .await?;
        Ok(job)
    }

    pub(crate) async fn start_analysis(
        &self,
        track_id: Uuid,
        features: Vec<Feature>,
    ) -> Result<AnalysisJob> {
        if features.is_empty() {
            return Err(Error::InvalidInput(
                "analysis requires at least one feature".to_string(),
            ));
        }
        let job = AnalysisJob::new(track_id, AnalysisJobOptions { features });
        db::analysis_jobs::insert(&self.ctx.db, &job).await?;
        self.enqueue(Stage::Analysis, job.job_id, track_id).await?;
        Ok(job)
    }

    async fn enqueue(&self, stage: Stage, job_id: Uuid, track_id: Uuid) -> Result<()> {
        db::queue::enqueue(
            &self.ctx.db,
            stage,
            job_id,
            track_id,
            self.ctx.config.queue.max_attempts as i64,
        )
        .await?;
        self.ctx
            .emit_progress(track_id, stage, StageStatus::Queued, 0);
        tracing::info!(%job_id, %track_id, %stage, "Stage job queued");
        Ok(())
    }

    /// Cancel a processing job
    ///
    /// Returns false when the job already reached a terminal state (the
    /// cancel lost the race; the earlier outcome stands). Cloud-side
    /// cancellation is best effort: the local row is authoritative.
    pub async fn cancel_processing(&self, job_id: Uuid, reason: &str) -> Result<bool> {
        let job = db::processing_jobs::get(&self.ctx.db, job_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Processing job {} not found", job_id)))?;

        let cancelled = db::processing_jobs::mark_cancelled(&self.ctx.db, job_id, reason).await?;
        if !cancelled {
            return Ok(false);
        }
        db::queue::remove_for_job(&self.ctx.db, job_id).await?;

        if let Some(task_id) = &job.remote_task_id {
            if let Err(e) = self.ctx.adapters.cloud_separator.cancel(task_id).await {
                tracing::warn!(%job_id, %task_id, error = %e, "Remote cancel failed");
            }
        }

        tracing::info!(%job_id, reason, "Processing job cancelled");
        self.ctx.emit_failed(job.track_id, Stage::Processing, reason);
        Ok(true)
    }

    /// Queue the next stage after a completed one, per the job's
    /// auto-chain options; emits `PipelineComplete` when nothing
    /// further is chained.
    pub async fn chain_after(&self, stage: Stage, job_id: Uuid) -> Result<()> {
        match stage {
            Stage::Download => {
                let Some(job) = db::download_jobs::get(&self.ctx.db, job_id).await? else {
                    return Ok(());
                };
                if job.status != StageStatus::Completed {
                    return Ok(());
                }
                if job.options.auto_chain {
                    let request = job
                        .options
                        .separation
                        .clone()
                        .unwrap_or_else(|| self.default_separation());
                    self.start_processing(
                        job.track_id,
                        ProcessingJobOptions {
                            request,
                            idempotency_key: None,
                            auto_chain: true,
                            analysis: job.options.analysis.clone(),
                        },
                    )
                    .await?;
                } else {
                    self.emit_pipeline_complete(job.track_id);
                }
            }
            Stage::Processing => {
                let Some(job) = db::processing_jobs::get(&self.ctx.db, job_id).await? else {
                    return Ok(());
                };
                if job.status != StageStatus::Completed {
                    return Ok(());
                }
                if job.options.auto_chain {
                    let features = match &job.options.analysis {
                        Some(opts) => opts.features.clone(),
                        None => self.default_features(),
                    };
                    self.start_analysis(job.track_id, features).await?;
                } else {
                    self.emit_pipeline_complete(job.track_id);
                }
            }
            Stage::Analysis => {
                let Some(job) = db::analysis_jobs::get(&self.ctx.db, job_id).await? else {
                    return Ok(());
                };
                if job.status == StageStatus::Completed {
                    self.emit_pipeline_complete(job.track_id);
                }
            }
        }
        Ok(())
    }

    /// Delete a track, its jobs, artifacts and queue entries
    ///
    /// Files go first, explicitly; row deletes never rely on filesystem
    /// state and a crash mid-delete leaves rows that still point at
    /// whatever files remain.
    pub async fn delete_track(&self, track_id: Uuid) -> Result<()> {
        self.require_track(track_id).await?;

        for job in db::download_jobs::list_for_track(&self.ctx.db, track_id).await? {
            if let Some(path) = job.output_path {
                let _ = tokio::fs::remove_file(&path).await;
            }
        }
        for path in db::stems::file_paths_for_track(&self.ctx.db, track_id).await? {
            let _ = tokio::fs::remove_file(&path).await;
        }
        let _ = tokio::fs::remove_dir_all(self.ctx.downloads_dir(track_id)).await;
        let _ = tokio::fs::remove_dir_all(self.ctx.stems_dir(track_id)).await;

        db::queue::remove_for_track(&self.ctx.db, track_id).await?;
        db::stems::delete_for_track(&self.ctx.db, track_id).await?;
        db::analysis_results::delete_for_track(&self.ctx.db, track_id).await?;
        db::analysis_jobs::delete_for_track(&self.ctx.db, track_id).await?;
        db::processing_jobs::delete_for_track(&self.ctx.db, track_id).await?;
        db::download_jobs::delete_for_track(&self.ctx.db, track_id).await?;
        db::tracks::delete(&self.ctx.db, track_id).await?;

        tracing::info!(%track_id, "Track deleted");
        Ok(())
    }

    /// Run the full pipeline for a set of tracks with bounded fan-out
    ///
    /// Returns immediately with the batch id; progress goes out as
    /// events. Tracks run the stages directly (not through the durable
    /// queue) so at most `batch_concurrency` are in flight at once and
    /// batch completion is observable.
    pub async fn start_batch(
        &self,
        track_ids: Vec<Uuid>,
        options: PipelineOptions,
    ) -> Result<Uuid> {
        if track_ids.is_empty() {
            return Err(Error::InvalidInput("batch requires at least one track".to_string()));
        }
        if let Some(request) = &options.separation {
            request.validate().map_err(Error::InvalidInput)?;
        }

        let batch_id = Uuid::new_v4();
        let total_count = track_ids.len();
        let concurrency = self.ctx.config.defaults.batch_concurrency.max(1);
        let coordinator = self.clone();

        tokio::spawn(async move {
            tracing::info!(%batch_id, total_count, concurrency, "Batch started");
            let mut completed_count = 0usize;
            let mut failed_count = 0usize;

            let mut results = stream::iter(track_ids)
                .map(|track_id| {
                    let coordinator = coordinator.clone();
                    let options = options.clone();
                    async move { coordinator.run_batch_track(track_id, options).await }
                })
                .buffer_unordered(concurrency);

            while let Some(result) = results.next().await {
                match result {
                    Ok(()) => completed_count += 1,
                    Err(e) => {
                        tracing::warn!(%batch_id, error = %e, "Batch track failed");
                        failed_count += 1;
                    }
                }
                coordinator.ctx.sink.publish(PipelineEvent::BatchProgress {
                    batch_id,
                    status: "running".to_string(),
                    completed_count,
                    failed_count,
                    total_count,
                    timestamp: chrono::Utc::now(),
                });
            }

            tracing::info!(%batch_id, completed_count, failed_count, "Batch complete");
            coordinator.ctx.sink.publish(PipelineEvent::BatchComplete {
                batch_id,
                completed_count,
                failed_count,
                total_count,
                timestamp: chrono::Utc::now(),
            });
        });

        Ok(batch_id)
    }

    /// One track's download → processing → analysis run inside a batch
    async fn run_batch_track(&self, track_id: Uuid, options: PipelineOptions) -> Result<()> {
        self.require_track(track_id).await?;

        // Courtesy skip: don't pile a second separation onto a track
        // that already has one in flight.
        if db::processing_jobs::has_active_for_track(&self.ctx.db, track_id).await? {
            return Err(Error::InvalidInput(format!(
                "Track {} already has active processing",
                track_id
            )));
        }

        let download = options.download.clone().unwrap_or_default();
        let job = DownloadJob::new(
            track_id,
            DownloadJobOptions {
                format: download.format,
                bitrate: download.bitrate,
                auto_chain: false,
                separation: None,
                analysis: None,
            },
        );
        db::download_jobs::insert(&self.ctx.db, &job).await?;
        self.run_direct(Stage::Download, job.job_id, track_id).await?;

        let request = options
            .separation
            .clone()
            .unwrap_or_else(|| self.default_separation());
        let processing = ProcessingJob::new(
            track_id,
            ProcessingJobOptions {
                request,
                idempotency_key: None,
                auto_chain: false,
                analysis: None,
            },
        );
        db::processing_jobs::insert(&self.ctx.db, &processing).await?;
        self.run_direct(Stage::Processing, processing.job_id, track_id)
            .await?;

        let features = match &options.analysis {
            Some(opts) => opts.features.clone(),
            None => self.default_features(),
        };
        let analysis = AnalysisJob::new(track_id, AnalysisJobOptions { features });
        db::analysis_jobs::insert(&self.ctx.db, &analysis).await?;
        self.run_direct(Stage::Analysis, analysis.job_id, track_id)
            .await?;

        self.emit_pipeline_complete(track_id);
        Ok(())
    }

    /// Execute a stage without the durable queue; failures finalize
    /// immediately (batch runs don't retry)
    async fn run_direct(&self, stage: Stage, job_id: Uuid, track_id: Uuid) -> Result<()> {
        if let Err(err) = executors::run_stage(&self.ctx, stage, job_id).await {
            executors::finalize_failure(&self.ctx, stage, job_id, track_id, &err.message).await?;
            return Err(Error::Internal(err.message));
        }
        Ok(())
    }

    fn emit_pipeline_complete(&self, track_id: Uuid) {
        self.ctx.sink.publish(PipelineEvent::PipelineComplete {
            track_id,
            timestamp: chrono::Utc::now(),
        });
    }

    /// Remaining cloud separation quota, straight from the provider
    pub async fn cloud_quota(&self) -> Result<crate::services::QuotaInfo> {
        self.ctx
            .adapters
            .cloud_separator
            .quota()
            .await
            .map_err(|e| Error::Internal(format!("Quota lookup failed: {}", e)))
    }

    async fn require_track(&self, track_id: Uuid) -> Result<Track> {
        db::tracks::get(&self.ctx.db, track_id)
            .await?
            .ok_or_else(|| Error::NotFound(format!("Track {} not found", track_id)))
    }

    /// The completed download must exist and its file must still be
    /// readable; a row pointing at a vanished artifact is as useless to
    /// the downstream stages as no row at all.
    async fn require_completed_download(&self, track_id: Uuid) -> Result<()> {
        let completed = db::download_jobs::latest_completed(&self.ctx.db, track_id).await?;
        let Some(path) = completed.and_then(|d| d.output_path) else {
            return Err(Error::NoCompletedDownload(track_id));
        };
        if tokio::fs::metadata(&path).await.is_err() {
            return Err(Error::NoCompletedDownload(track_id));
        }
        Ok(())
    }

    fn default_separation(&self) -> SeparationRequest {
        let model = SeparationModel::parse(&self.ctx.config.defaults.separation_model)
            .unwrap_or_default();
        SeparationRequest::local(model)
    }

    fn default_features(&self) -> Vec<Feature> {
        let features: Vec<Feature> = self
            .ctx
            .config
            .defaults
            .analysis_features
            .iter()
            .filter_map(|name| Feature::parse(name))
            .collect();
        if features.is_empty() {
            vec![Feature::Tempo, Feature::Key, Feature::Energy]
        } else {
            features
        }
    }
}
