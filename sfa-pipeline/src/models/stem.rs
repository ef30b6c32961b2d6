//! Stem artifact model

use crate::models::engine::StemType;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// A derived audio artifact produced by a completed processing job
///
/// A track's stem set is rebuilt wholesale on every successful run
/// (delete-all-then-insert), never partially patched, so a track never
/// carries mixed-generation artifacts.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Stem {
    pub stem_id: Uuid,
    pub track_id: Uuid,
    pub processing_job_id: Uuid,
    pub stem_type: StemType,
    pub file_path: String,
    pub file_size: Option<i64>,
    pub created_at: DateTime<Utc>,
}

/// A separated stem file as reported by an engine adapter
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StemFile {
    pub stem_type: StemType,
    pub file_path: String,
    pub file_size: Option<i64>,
}
