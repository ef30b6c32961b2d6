//! Batch runs: bounded fan-out and per-track isolation

mod common;

use common::{fake_adapters, wait_for, FakeSeparator, Harness};
use sfa_common::events::PipelineEvent;
use sfa_pipeline::db;
use sfa_pipeline::models::PipelineOptions;
use std::sync::atomic::Ordering;
use std::sync::Arc;

#[tokio::test]
async fn test_batch_bounds_concurrent_separations() {
    let mut adapters = fake_adapters();
    let separator = Arc::new(FakeSeparator::slow(150));
    adapters.local_separator = separator.clone();
    let harness = Harness::with_adapters(adapters).await;

    let mut track_ids = Vec::new();
    for _ in 0..5 {
        track_ids.push(harness.seed_track().await);
    }

    let batch_id = harness
        .coordinator
        .start_batch(track_ids.clone(), PipelineOptions::default())
        .await
        .expect("start batch");

    let events = harness.events.clone();
    let finished = wait_for(|| {
        let events = events.clone();
        async move {
            events.events().iter().any(|e| {
                matches!(e, PipelineEvent::BatchComplete { batch_id: b, .. } if *b == batch_id)
            })
        }
    })
    .await;
    assert!(finished, "batch did not complete in time");

    let complete = harness
        .events
        .events()
        .into_iter()
        .find_map(|e| match e {
            PipelineEvent::BatchComplete {
                completed_count,
                failed_count,
                total_count,
                ..
            } => Some((completed_count, failed_count, total_count)),
            _ => None,
        })
        .unwrap();
    assert_eq!(complete, (5, 0, 5));

    // The fan-out ceiling held: never more than two separations at once
    assert!(
        separator.peak.load(Ordering::SeqCst) <= 2,
        "peak concurrency {} exceeded ceiling",
        separator.peak.load(Ordering::SeqCst)
    );

    // Every track ended with its artifacts in place
    for track_id in track_ids {
        assert_eq!(
            db::stems::list_for_track(&harness.db, track_id).await.unwrap().len(),
            4
        );
        assert!(db::analysis_results::get_for_track(&harness.db, track_id)
            .await
            .unwrap()
            .is_some());
    }
}

#[tokio::test]
async fn test_batch_skips_track_with_active_processing() {
    let harness = Harness::new().await;
    let busy = harness.seed_track().await;
    let idle = harness.seed_track().await;

    // Give the busy track an in-flight separation
    let job = sfa_pipeline::models::ProcessingJob::new(
        busy,
        sfa_pipeline::models::ProcessingJobOptions {
            request: sfa_pipeline::models::SeparationRequest::local(Default::default()),
            idempotency_key: None,
            auto_chain: false,
            analysis: None,
        },
    );
    db::processing_jobs::insert(&harness.db, &job).await.unwrap();

    let batch_id = harness
        .coordinator
        .start_batch(vec![busy, idle], PipelineOptions::default())
        .await
        .unwrap();

    let events = harness.events.clone();
    assert!(
        wait_for(|| {
            let events = events.clone();
            async move {
                events.events().iter().any(|e| {
                    matches!(e, PipelineEvent::BatchComplete { batch_id: b, .. } if *b == batch_id)
                })
            }
        })
        .await
    );

    let (completed, failed) = harness
        .events
        .events()
        .into_iter()
        .find_map(|e| match e {
            PipelineEvent::BatchComplete {
                completed_count,
                failed_count,
                ..
            } => Some((completed_count, failed_count)),
            _ => None,
        })
        .unwrap();
    assert_eq!((completed, failed), (1, 1));

    // The idle track went through; the busy one was left alone
    assert!(!db::stems::list_for_track(&harness.db, idle).await.unwrap().is_empty());
    assert!(db::stems::list_for_track(&harness.db, busy).await.unwrap().is_empty());
}

#[tokio::test]
async fn test_empty_batch_is_rejected() {
    let harness = Harness::new().await;
    let result = harness
        .coordinator
        .start_batch(vec![], PipelineOptions::default())
        .await;
    assert!(result.is_err());
}
