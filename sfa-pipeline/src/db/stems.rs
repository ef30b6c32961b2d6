//! Stem row operations
//!
//! Inserts happen inside the processing job's completion transaction
//! (see `processing_jobs::complete_with_stems`); this module covers the
//! read and cleanup paths.

use crate::models::{Stem, StemType};
use sfa_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// All stems for a track
pub async fn list_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<Vec<Stem>> {
    let rows = sqlx::query(
        r#"
        SELECT stem_id, track_id, processing_job_id, stem_type,
               file_path, file_size, created_at
        FROM stems WHERE track_id = ?
        ORDER BY stem_type
        "#,
    )
    .bind(track_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(from_row).collect()
}

/// File paths of a track's current stems (for explicit file cleanup)
pub async fn file_paths_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<Vec<String>> {
    let paths = sqlx::query_scalar("SELECT file_path FROM stems WHERE track_id = ?")
        .bind(track_id.to_string())
        .fetch_all(pool)
        .await?;
    Ok(paths)
}

/// Delete all stem rows for a track
pub async fn delete_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM stems WHERE track_id = ?")
        .bind(track_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Stem> {
    let stem_id: String = row.get("stem_id");
    let track_id: String = row.get("track_id");
    let processing_job_id: String = row.get("processing_job_id");
    let stem_type: String = row.get("stem_type");
    let created_at: String = row.get("created_at");
    Ok(Stem {
        stem_id: super::parse_uuid(&stem_id)?,
        track_id: super::parse_uuid(&track_id)?,
        processing_job_id: super::parse_uuid(&processing_job_id)?,
        stem_type: StemType::parse(&stem_type)
            .ok_or_else(|| sfa_common::Error::Internal(format!("Unknown stem type: {}", stem_type)))?,
        file_path: row.get("file_path"),
        file_size: row.get("file_size"),
        created_at: super::parse_timestamp(&created_at)?,
    })
}
