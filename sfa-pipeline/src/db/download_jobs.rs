//! Download job row operations
//!
//! Status transitions go through conditional UPDATEs so a job already in
//! a terminal state is never overwritten; callers check the returned
//! flag to detect a lost race.

use crate::models::{DownloadJob, DownloadJobOptions};
use chrono::Utc;
use sfa_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Insert a new download job row
pub async fn insert(pool: &SqlitePool, job: &DownloadJob) -> Result<()> {
    let options = serde_json::to_string(&job.options)
        .map_err(|e| sfa_common::Error::Internal(format!("Failed to serialize options: {}", e)))?;
    sqlx::query(
        r#"
        INSERT INTO download_jobs (
            job_id, track_id, status, options, output_path, file_size,
            error, created_at, started_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.job_id.to_string())
    .bind(job.track_id.to_string())
    .bind(job.status.as_str())
    .bind(options)
    .bind(&job.output_path)
    .bind(job.file_size)
    .bind(&job.error)
    .bind(job.created_at.to_rfc3339())
    .bind(job.started_at.map(|dt| dt.to_rfc3339()))
    .bind(job.finished_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;
    Ok(())
}

/// Load one download job by id
pub async fn get(pool: &SqlitePool, job_id: Uuid) -> Result<Option<DownloadJob>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, track_id, status, options, output_path, file_size,
               error, created_at, started_at, finished_at
        FROM download_jobs WHERE job_id = ?
        "#,
    )
    .bind(job_id.to_string())
    .fetch_optional(pool)
    .await?;
    row.map(from_row).transpose()
}

/// Transition to `running` (from `queued` or a redelivered `running`)
///
/// Returns false when the job is already terminal; the caller should
/// treat that as a no-op, not an error.
pub async fn mark_running(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE download_jobs
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

/// Transition to `completed` with the produced artifact
pub async fn mark_completed(
    pool: &SqlitePool,
    job_id: Uuid,
    output_path: &str,
    file_size: i64,
) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE download_jobs
        SET status = 'completed', output_path = ?, file_size = ?, finished_at = ?
        WHERE job_id = ? AND status = 'running'
        "#,
    )
    .bind(output_path)
    .bind(file_size)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Transition to `failed` with captured error detail
pub async fn mark_failed(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE download_jobs
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

/// Record error detail without changing status (retryable failure whose
/// unit of work will be redelivered by the queue)
pub async fn record_error(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<()> {
    sqlx::query("UPDATE download_jobs SET error = ? WHERE job_id = ?")
        .bind(error)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Latest completed download for a track, by recency
///
/// This is "the" authoritative source file for the processing and
/// analysis stages.
pub async fn latest_completed(pool: &SqlitePool, track_id: Uuid) -> Result<Option<DownloadJob>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, track_id, status, options, output_path, file_size,
               error, created_at, started_at, finished_at
        FROM download_jobs
        WHERE track_id = ? AND status = 'completed'
        ORDER BY finished_at DESC
        LIMIT 1
        "#,
    )
    .bind(track_id.to_string())
    .fetch_optional(pool)
    .await?;
    row.map(from_row).transpose()
}

/// All download jobs for a track (attempt history, newest first)
pub async fn list_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<Vec<DownloadJob>> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, track_id, status, options, output_path, file_size,
               error, created_at, started_at, finished_at
        FROM download_jobs
        WHERE track_id = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(track_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(from_row).collect()
}

/// Delete all download jobs for a track (track deletion cascade)
pub async fn delete_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM download_jobs WHERE track_id = ?")
        .bind(track_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<DownloadJob> {
    let job_id: String = row.get("job_id");
    let track_id: String = row.get("track_id");
    let status: String = row.get("status");
    let options: String = row.get("options");
    let options: DownloadJobOptions = serde_json::from_str(&options)
        .map_err(|e| sfa_common::Error::Internal(format!("Failed to deserialize options: {}", e)))?;
    let created_at: String = row.get("created_at");
    Ok(DownloadJob {
        job_id: super::parse_uuid(&job_id)?,
        track_id: super::parse_uuid(&track_id)?,
        status: super::parse_status(&status)?,
        options,
        output_path: row.get("output_path"),
        file_size: row.get("file_size"),
        error: row.get("error"),
        created_at: super::parse_timestamp(&created_at)?,
        started_at: super::parse_timestamp_opt(row.get("started_at"))?,
        finished_at: super::parse_timestamp_opt(row.get("finished_at"))?,
    })
}
