//! Shared test harness: in-memory database, recording event sink and
//! fake tool adapters.

#![allow(dead_code)]

use async_trait::async_trait;
use sfa_common::config::PipelineConfig;
use sfa_common::events::RecordingSink;
use sfa_pipeline::coordinator::Coordinator;
use sfa_pipeline::db;
use sfa_pipeline::executors::PipelineContext;
use sfa_pipeline::models::{Feature, SeparationModel, StemFile, Track, TrackMetadata};
use sfa_pipeline::services::{
    Adapters, Analyzer, CloudSeparator, CloudTaskStatus, DownloadOutput, Downloader,
    LocalSeparator, ProgressTx, QuotaInfo, StageError,
};
use sqlx::SqlitePool;
use std::path::Path;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};
use std::time::Duration;
use uuid::Uuid;

pub struct Harness {
    pub coordinator: Coordinator,
    pub db: SqlitePool,
    pub events: Arc<RecordingSink>,
    _root: tempfile::TempDir,
}

impl Harness {
    pub async fn with_adapters(adapters: Adapters) -> Self {
        let db = db::init_memory_pool().await.expect("memory pool");
        let events = Arc::new(RecordingSink::new());
        let root = tempfile::tempdir().expect("tempdir");

        let mut config = PipelineConfig::default();
        config.queue.poll_interval_ms = 10;
        config.queue.backoff_base_secs = 0;
        config.queue.download_workers = 2;
        config.queue.processing_workers = 2;
        config.queue.analysis_workers = 2;
        config.defaults.batch_concurrency = 2;

        let ctx = PipelineContext {
            db: db.clone(),
            sink: events.clone(),
            config: Arc::new(config),
            adapters,
            root_folder: root.path().to_path_buf(),
        };
        Self {
            coordinator: Coordinator::new(ctx),
            db,
            events,
            _root: root,
        }
    }

    pub async fn new() -> Self {
        Self::with_adapters(fake_adapters()).await
    }

    /// Insert a track row directly, skipping the metadata fetch
    pub async fn seed_track(&self) -> Uuid {
        let meta = TrackMetadata {
            name: "Windowpane".to_string(),
            artists: vec!["Opeth".to_string()],
            album_name: Some("Damnation".to_string()),
            duration: Some(464.0),
            song_id: Some("3KnmRbp1".to_string()),
            cover_url: None,
            isrc: None,
        };
        let track = Track::from_metadata("https://music.example/track/3KnmRbp1".to_string(), &meta);
        db::tracks::insert(&self.db, &track).await.expect("insert track");
        track.track_id
    }
}

/// Poll a condition until it holds or the deadline passes
pub async fn wait_for<F, Fut>(mut condition: F) -> bool
where
    F: FnMut() -> Fut,
    Fut: std::future::Future<Output = bool>,
{
    for _ in 0..400 {
        if condition().await {
            return true;
        }
        tokio::time::sleep(Duration::from_millis(25)).await;
    }
    false
}

pub fn fake_adapters() -> Adapters {
    Adapters {
        downloader: Arc::new(FakeDownloader::default()),
        local_separator: Arc::new(FakeSeparator::default()),
        cloud_separator: Arc::new(FakeCloud::default()),
        analyzer: Arc::new(FakeAnalyzer),
    }
}

/// Downloader that writes a small file; optionally fails the first N
/// calls with a retryable error.
#[derive(Default)]
pub struct FakeDownloader {
    pub failures_remaining: AtomicUsize,
    pub calls: AtomicUsize,
}

impl FakeDownloader {
    pub fn failing(times: usize) -> Self {
        Self {
            failures_remaining: AtomicUsize::new(times),
            calls: AtomicUsize::new(0),
        }
    }
}

#[async_trait]
impl Downloader for FakeDownloader {
    async fn metadata(&self, _url: &str) -> Result<TrackMetadata, StageError> {
        Ok(TrackMetadata {
            name: "Fetched Track".to_string(),
            artists: vec!["Fetched Artist".to_string()],
            album_name: None,
            duration: Some(180.0),
            song_id: Some("fetched-1".to_string()),
            cover_url: None,
            isrc: None,
        })
    }

    async fn download(
        &self,
        _url: &str,
        format: &str,
        _bitrate: &str,
        dest_dir: &Path,
        progress: ProgressTx,
    ) -> Result<DownloadOutput, StageError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        if self
            .failures_remaining
            .fetch_update(Ordering::SeqCst, Ordering::SeqCst, |n| n.checked_sub(1))
            .is_ok()
        {
            return Err(StageError::retryable("simulated transfer failure"));
        }
        let _ = progress.send(50).await;
        let path = dest_dir.join(format!("source.{}", format));
        tokio::fs::write(&path, b"fake audio bytes")
            .await
            .map_err(|e| StageError::retryable(e.to_string()))?;
        let _ = progress.send(100).await;
        Ok(DownloadOutput {
            path: path.to_string_lossy().to_string(),
            size: 16,
            metadata: None,
        })
    }
}

/// Downloader whose every call fails with a non-retryable error
pub struct FatalDownloader;

#[async_trait]
impl Downloader for FatalDownloader {
    async fn metadata(&self, _url: &str) -> Result<TrackMetadata, StageError> {
        Err(StageError::fatal("track not available in region"))
    }

    async fn download(
        &self,
        _url: &str,
        _format: &str,
        _bitrate: &str,
        _dest_dir: &Path,
        _progress: ProgressTx,
    ) -> Result<DownloadOutput, StageError> {
        Err(StageError::fatal("track not available in region"))
    }
}

/// Local separator that writes one file per stem and tracks how many
/// separations run concurrently.
#[derive(Default)]
pub struct FakeSeparator {
    pub current: Arc<AtomicUsize>,
    pub peak: Arc<AtomicUsize>,
    pub delay_ms: u64,
}

impl FakeSeparator {
    pub fn slow(delay_ms: u64) -> Self {
        Self {
            delay_ms,
            ..Self::default()
        }
    }
}

#[async_trait]
impl LocalSeparator for FakeSeparator {
    async fn separate(
        &self,
        _input: &Path,
        model: SeparationModel,
        output_format: &str,
        out_dir: &Path,
        progress: ProgressTx,
    ) -> Result<Vec<StemFile>, StageError> {
        let running = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(running, Ordering::SeqCst);
        let _ = progress.send(10).await;
        if self.delay_ms > 0 {
            tokio::time::sleep(Duration::from_millis(self.delay_ms)).await;
        }

        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| StageError::retryable(e.to_string()))?;
        let mut files = Vec::new();
        for stem_type in model.stem_types() {
            let path = out_dir.join(format!("{}.{}", stem_type.as_str(), output_format));
            tokio::fs::write(&path, b"fake stem")
                .await
                .map_err(|e| StageError::retryable(e.to_string()))?;
            files.push(StemFile {
                stem_type: *stem_type,
                file_path: path.to_string_lossy().to_string(),
                file_size: Some(9),
            });
        }
        self.current.fetch_sub(1, Ordering::SeqCst);
        Ok(files)
    }
}

/// Cloud separator that completes immediately and records the
/// idempotency keys it saw.
#[derive(Default)]
pub struct FakeCloud {
    pub submissions: Mutex<Vec<String>>,
    pub cancelled: Mutex<Vec<String>>,
}

#[async_trait]
impl CloudSeparator for FakeCloud {
    async fn submit(
        &self,
        _input: &Path,
        _mode_params: &serde_json::Value,
        _preview: bool,
        idempotency_key: &str,
    ) -> Result<String, StageError> {
        let mut submissions = self.submissions.lock().unwrap();
        submissions.push(idempotency_key.to_string());
        Ok(format!("task-{}", submissions.len()))
    }

    async fn poll(&self, _task_id: &str) -> Result<CloudTaskStatus, StageError> {
        Ok(serde_json::from_str(r#"{"status":"completed","progress":100}"#).unwrap())
    }

    async fn fetch_results(
        &self,
        _task_id: &str,
        out_dir: &Path,
    ) -> Result<Vec<StemFile>, StageError> {
        tokio::fs::create_dir_all(out_dir)
            .await
            .map_err(|e| StageError::retryable(e.to_string()))?;
        let mut files = Vec::new();
        for name in ["vocals", "other"] {
            let path = out_dir.join(format!("{}.mp3", name));
            tokio::fs::write(&path, b"fake cloud stem")
                .await
                .map_err(|e| StageError::retryable(e.to_string()))?;
            files.push(StemFile {
                stem_type: sfa_pipeline::models::StemType::parse(name).unwrap(),
                file_path: path.to_string_lossy().to_string(),
                file_size: Some(15),
            });
        }
        Ok(files)
    }

    async fn cancel(&self, task_id: &str) -> Result<(), StageError> {
        self.cancelled.lock().unwrap().push(task_id.to_string());
        Ok(())
    }

    async fn quota(&self) -> Result<QuotaInfo, StageError> {
        Ok(serde_json::from_str(r#"{"remaining_minutes":120.0}"#).unwrap())
    }
}

/// Analyzer that returns a fixed feature map
pub struct FakeAnalyzer;

#[async_trait]
impl Analyzer for FakeAnalyzer {
    async fn analyze(
        &self,
        _input: &Path,
        features: &[Feature],
        progress: ProgressTx,
    ) -> Result<serde_json::Value, StageError> {
        let _ = progress.send(100).await;
        let mut map = serde_json::Map::new();
        for feature in features {
            match feature {
                Feature::Tempo | Feature::All => {
                    map.insert("tempo".to_string(), serde_json::json!(120.0));
                }
                Feature::Key => {
                    map.insert("key".to_string(), serde_json::json!("A minor"));
                }
                Feature::Energy => {
                    map.insert("energy".to_string(), serde_json::json!(0.5));
                }
                Feature::Spectral => {
                    map.insert("spectral_centroid".to_string(), serde_json::json!(1500.0));
                }
                Feature::Mfcc => {
                    map.insert("mfcc".to_string(), serde_json::json!([1.0, 2.0]));
                }
                Feature::Chroma => {
                    map.insert("chroma_stft".to_string(), serde_json::json!([0.1, 0.2]));
                }
            }
        }
        Ok(serde_json::Value::Object(map))
    }
}
