//! Analysis result row operations
//!
//! Inserts happen inside the analysis job's completion transaction (see
//! `analysis_jobs::complete_with_result`).

use crate::models::AnalysisResult;
use sfa_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Current analysis result for a track, if any
pub async fn get_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<Option<AnalysisResult>> {
    let row = sqlx::query(
        r#"
        SELECT result_id, track_id, analysis_job_id, tempo, musical_key,
               energy, features, created_at
        FROM analysis_results
        WHERE track_id = ?
        ORDER BY created_at DESC
        LIMIT 1
        "#,
    )
    .bind(track_id.to_string())
    .fetch_optional(pool)
    .await?;
    row.map(from_row).transpose()
}

/// Delete all analysis results for a track
pub async fn delete_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM analysis_results WHERE track_id = ?")
        .bind(track_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<AnalysisResult> {
    let result_id: String = row.get("result_id");
    let track_id: String = row.get("track_id");
    let analysis_job_id: String = row.get("analysis_job_id");
    let features: String = row.get("features");
    let features: serde_json::Value = serde_json::from_str(&features)
        .map_err(|e| sfa_common::Error::Internal(format!("Failed to parse features: {}", e)))?;
    let created_at: String = row.get("created_at");
    Ok(AnalysisResult {
        result_id: super::parse_uuid(&result_id)?,
        track_id: super::parse_uuid(&track_id)?,
        analysis_job_id: super::parse_uuid(&analysis_job_id)?,
        tempo: row.get("tempo"),
        musical_key: row.get("musical_key"),
        energy: row.get("energy"),
        features,
        created_at: super::parse_timestamp(&created_at)?,
    })
}
