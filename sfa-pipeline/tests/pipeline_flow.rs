//! End-to-end pipeline runs through the durable queue workers

mod common;

use common::{fake_adapters, wait_for, FakeDownloader, FatalDownloader, Harness};
use sfa_common::events::{PipelineEvent, Stage, StageStatus};
use sfa_pipeline::db;
use sfa_pipeline::models::{
    AnalysisStageOptions, CloudMode, Feature, PipelineOptions, SeparationRequest,
};
use sfa_pipeline::queue::QueueWorkers;
use std::sync::atomic::Ordering;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;

#[tokio::test]
async fn test_auto_chain_runs_all_three_stages() {
    let harness = Harness::new().await;
    let token = CancellationToken::new();
    let workers = QueueWorkers::spawn(harness.coordinator.clone(), token.clone());

    let track_id = harness.seed_track().await;
    let options = PipelineOptions {
        auto_chain: true,
        analysis: Some(AnalysisStageOptions {
            features: vec![Feature::Tempo, Feature::Key, Feature::Energy],
        }),
        ..Default::default()
    };
    harness
        .coordinator
        .start(track_id, options)
        .await
        .expect("start pipeline");

    let db = harness.db.clone();
    let done = wait_for(|| {
        let db = db.clone();
        async move {
            db::analysis_results::get_for_track(&db, track_id)
                .await
                .unwrap()
                .is_some()
        }
    })
    .await;
    assert!(done, "pipeline did not finish in time");

    // Download artifact recorded
    let download = db::download_jobs::latest_completed(&harness.db, track_id)
        .await
        .unwrap()
        .expect("completed download");
    assert!(download.output_path.unwrap().ends_with("source.mp3"));

    // Default model produces the 4-stem set
    let stems = db::stems::list_for_track(&harness.db, track_id).await.unwrap();
    assert_eq!(stems.len(), 4);

    let result = db::analysis_results::get_for_track(&harness.db, track_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(result.tempo, Some(120.0));
    assert_eq!(result.musical_key.as_deref(), Some("A minor"));

    // The chain ends with a pipeline-complete event
    let events = harness.events.events();
    assert!(events
        .iter()
        .any(|e| matches!(e, PipelineEvent::PipelineComplete { track_id: t, .. } if *t == track_id)));
    // And each stage reported completion
    for stage in [Stage::Download, Stage::Processing, Stage::Analysis] {
        assert!(
            events.iter().any(|e| matches!(
                e,
                PipelineEvent::StageProgress { stage: s, status: StageStatus::Completed, .. } if *s == stage
            )),
            "missing completion for {stage}"
        );
    }

    token.cancel();
    workers.shutdown().await;
}

#[tokio::test]
async fn test_retryable_failure_is_redelivered_until_success() {
    let mut adapters = fake_adapters();
    let downloader = Arc::new(FakeDownloader::failing(2));
    adapters.downloader = downloader.clone();
    let harness = Harness::with_adapters(adapters).await;

    let token = CancellationToken::new();
    let workers = QueueWorkers::spawn(harness.coordinator.clone(), token.clone());

    let track_id = harness.seed_track().await;
    let job = harness
        .coordinator
        .start(track_id, PipelineOptions::default())
        .await
        .expect("start");

    let db = harness.db.clone();
    let done = wait_for(|| {
        let db = db.clone();
        async move {
            db::download_jobs::get(&db, job.job_id)
                .await
                .unwrap()
                .map(|j| j.status == StageStatus::Completed)
                .unwrap_or(false)
        }
    })
    .await;
    assert!(done, "download did not recover from transient failures");
    assert_eq!(downloader.calls.load(Ordering::SeqCst), 3);

    token.cancel();
    workers.shutdown().await;
}

#[tokio::test]
async fn test_fatal_failure_finalizes_immediately() {
    let mut adapters = fake_adapters();
    adapters.downloader = Arc::new(FatalDownloader);
    let harness = Harness::with_adapters(adapters).await;

    let token = CancellationToken::new();
    let workers = QueueWorkers::spawn(harness.coordinator.clone(), token.clone());

    let track_id = harness.seed_track().await;
    let job = harness
        .coordinator
        .start(track_id, PipelineOptions::default())
        .await
        .expect("start");

    let db = harness.db.clone();
    let done = wait_for(|| {
        let db = db.clone();
        async move {
            db::download_jobs::get(&db, job.job_id)
                .await
                .unwrap()
                .map(|j| j.status == StageStatus::Failed)
                .unwrap_or(false)
        }
    })
    .await;
    assert!(done, "fatal failure should mark the job failed");

    let job = db::download_jobs::get(&harness.db, job.job_id)
        .await
        .unwrap()
        .unwrap();
    assert!(job.error.unwrap().contains("not available"));

    let events = harness.events.events();
    assert!(events.iter().any(|e| matches!(
        e,
        PipelineEvent::StageFailed { stage: Stage::Download, .. }
    )));

    token.cancel();
    workers.shutdown().await;
}

#[tokio::test]
async fn test_cloud_engine_submits_with_stored_idempotency_key() {
    let mut adapters = fake_adapters();
    let cloud = Arc::new(common::FakeCloud::default());
    adapters.cloud_separator = cloud.clone();
    let harness = Harness::with_adapters(adapters).await;

    let token = CancellationToken::new();
    let workers = QueueWorkers::spawn(harness.coordinator.clone(), token.clone());

    let track_id = harness.seed_track().await;

    // Download first so the processing dependency is satisfied
    harness
        .coordinator
        .start(track_id, PipelineOptions::default())
        .await
        .expect("start download");
    let db = harness.db.clone();
    assert!(
        wait_for(|| {
            let db = db.clone();
            async move {
                db::download_jobs::latest_completed(&db, track_id)
                    .await
                    .unwrap()
                    .is_some()
            }
        })
        .await
    );

    let job_id = harness
        .coordinator
        .retry_stage(
            track_id,
            Stage::Processing,
            PipelineOptions {
                separation: Some(SeparationRequest::Cloud {
                    mode: CloudMode::VoiceClean { noise_level: 40 },
                    preview: false,
                }),
                ..Default::default()
            },
        )
        .await
        .expect("start processing");

    let db = harness.db.clone();
    assert!(
        wait_for(|| {
            let db = db.clone();
            async move {
                db::processing_jobs::get(&db, job_id)
                    .await
                    .unwrap()
                    .map(|j| j.status == StageStatus::Completed)
                    .unwrap_or(false)
            }
        })
        .await,
        "cloud processing did not complete"
    );

    let job = db::processing_jobs::get(&harness.db, job_id)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(job.engine, "cloud");
    assert_eq!(job.mode, "voice_clean");
    assert_eq!(job.remote_task_id.as_deref(), Some("task-1"));

    let submissions = cloud.submissions.lock().unwrap().clone();
    assert_eq!(submissions, vec![job.idempotency_key.clone()]);

    token.cancel();
    workers.shutdown().await;
}

#[tokio::test]
async fn test_reseparation_removes_replaced_stem_files() {
    let harness = Harness::new().await;
    let token = CancellationToken::new();
    let workers = QueueWorkers::spawn(harness.coordinator.clone(), token.clone());

    let track_id = harness.seed_track().await;
    harness
        .coordinator
        .start(track_id, PipelineOptions::default())
        .await
        .expect("start download");
    let db = harness.db.clone();
    assert!(
        wait_for(|| {
            let db = db.clone();
            async move {
                db::download_jobs::latest_completed(&db, track_id)
                    .await
                    .unwrap()
                    .is_some()
            }
        })
        .await
    );

    // First run: default local model, 4 stems on disk
    let first = harness
        .coordinator
        .retry_stage(track_id, Stage::Processing, PipelineOptions::default())
        .await
        .expect("first separation");
    let db = harness.db.clone();
    assert!(
        wait_for(|| {
            let db = db.clone();
            async move {
                db::processing_jobs::get(&db, first)
                    .await
                    .unwrap()
                    .map(|j| j.status == StageStatus::Completed)
                    .unwrap_or(false)
            }
        })
        .await
    );
    let old_paths: Vec<String> = db::stems::list_for_track(&harness.db, track_id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.file_path)
        .collect();
    assert_eq!(old_paths.len(), 4);

    // Second run via the cloud engine yields only vocals + other
    let second = harness
        .coordinator
        .retry_stage(
            track_id,
            Stage::Processing,
            PipelineOptions {
                separation: Some(SeparationRequest::Cloud {
                    mode: CloudMode::FullSplit,
                    preview: false,
                }),
                ..Default::default()
            },
        )
        .await
        .expect("second separation");
    let db = harness.db.clone();
    assert!(
        wait_for(|| {
            let db = db.clone();
            async move {
                db::processing_jobs::get(&db, second)
                    .await
                    .unwrap()
                    .map(|j| j.status == StageStatus::Completed)
                    .unwrap_or(false)
            }
        })
        .await
    );

    // Replaced rows are gone and so are their files
    let current: Vec<String> = db::stems::list_for_track(&harness.db, track_id)
        .await
        .unwrap()
        .into_iter()
        .map(|s| s.file_path)
        .collect();
    assert_eq!(current.len(), 2);
    for path in &current {
        assert!(tokio::fs::try_exists(path).await.unwrap(), "{path} missing");
    }
    for path in old_paths.iter().filter(|p| !current.contains(p)) {
        assert!(
            !tokio::fs::try_exists(path).await.unwrap(),
            "{path} should have been removed"
        );
    }

    token.cancel();
    workers.shutdown().await;
}

#[tokio::test]
async fn test_quota_reports_provider_minutes() {
    let harness = Harness::new().await;
    let quota = harness.coordinator.cloud_quota().await.expect("quota");
    assert_eq!(quota.remaining_minutes, 120.0);
}
