//! Analysis job row operations

use crate::models::{AnalysisJob, AnalysisJobOptions, AnalysisResult};
use chrono::Utc;
use sfa_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Insert a new analysis job row
pub async fn insert(pool: &SqlitePool, job: &AnalysisJob) -> Result<()> {
    let options = serde_json::to_string(&job.options)
        .map_err(|e| sfa_common::Error::Internal(format!("Failed to serialize options: {}", e)))?;
    sqlx::query(
        r#"
        INSERT INTO analysis_jobs (
            job_id, track_id, status, options, error,
            created_at, started_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.job_id.to_string())
    .bind(job.track_id.to_string())
    .bind(job.status.as_str())
    .bind(options)
    .bind(&job.error)
    .bind(job.created_at.to_rfc3339())
    .bind(job.started_at.map(|dt| dt.to_rfc3339()))
    .bind(job.finished_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;
    Ok(())
}

/// Load one analysis job by id
pub async fn get(pool: &SqlitePool, job_id: Uuid) -> Result<Option<AnalysisJob>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, track_id, status, options, error,
               created_at, started_at, finished_at
        FROM analysis_jobs WHERE job_id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;
    row.map(from_row).transpose()
}

/// Transition to `running` (from `queued` or a redelivered `running`)
pub async fn mark_running(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'running',
            started_at = COALESCE(started_at, ?)
        WHERE job_id = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Complete the job and replace the track's analysis results atomically
///
/// Same rebuild-not-patch policy as stems: prior results are deleted and
/// the new one inserted in one transaction, guarded by the conditional
/// status update.
pub async fn complete_with_result(
    pool: &SqlitePool,
    job_id: Uuid,
    result_row: &AnalysisResult,
) -> Result<bool> {
    let features = serde_json::to_string(&result_row.features)
        .map_err(|e| sfa_common::Error::Internal(format!("Failed to serialize features: {}", e)))?;

    let mut tx = pool.begin().await?;

    let update = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'completed', finished_at = ?
        WHERE job_id = ? AND status = 'running'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(&mut *tx)
    .await?;

    if update.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    sqlx::query("DELETE FROM analysis_results WHERE track_id = ?")
        .bind(result_row.track_id.to_string())
        .execute(&mut *tx)
        .await?;

    sqlx::query(
        r#"
        INSERT INTO analysis_results (
            result_id, track_id, analysis_job_id, tempo, musical_key,
            energy, features, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(result_row.result_id.to_string())
    .bind(result_row.track_id.to_string())
    .bind(result_row.analysis_job_id.to_string())
    .bind(result_row.tempo)
    .bind(&result_row.musical_key)
    .bind(result_row.energy)
    .bind(features)
    .bind(result_row.created_at.to_rfc3339())
    .execute(&mut *tx)
    .await?;

    tx.commit().await?;
    Ok(true)
}

/// Transition to `failed` with captured error detail
pub async fn mark_failed(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE analysis_jobs
        SET status = 'failed', error = ?, finished_at = ?
        WHERE job_id = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(error)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Record error detail without changing status (retryable failure)
pub async fn record_error(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<()> {
    sqlx::query("UPDATE analysis_jobs SET error = ? WHERE job_id = ?")
        .bind(error)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// All analysis jobs for a track (attempt history, newest first)
pub async fn list_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<Vec<AnalysisJob>> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, track_id, status, options, error,
               created_at, started_at, finished_at
        FROM analysis_jobs
        WHERE track_id = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(track_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(from_row).collect()
}

/// Delete all analysis jobs for a track (track deletion cascade)
pub async fn delete_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM analysis_jobs WHERE track_id = ?")
        .bind(track_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<AnalysisJob> {
    let job_id: String = row.get("job_id");
    let track_id: String = row.get("track_id");
    let status: String = row.get("status");
    let options: String = row.get("options");
    let options: AnalysisJobOptions = serde_json::from_str(&options)
        .map_err(|e| sfa_common::Error::Internal(format!("Failed to deserialize options: {}", e)))?;
    let created_at: String = row.get("created_at");
    Ok(AnalysisJob {
        job_id: super::parse_uuid(&job_id)?,
        track_id: super::parse_uuid(&track_id)?,
        status: super::parse_status(&status)?,
        options,
        error: row.get("error"),
        created_at: super::parse_timestamp(&created_at)?,
        started_at: super::parse_timestamp_opt(row.get("started_at"))?,
        finished_at: super::parse_timestamp_opt(row.get("finished_at"))?,
    })
}
