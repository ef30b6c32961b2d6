//! Processing job row operations
//!
//! The idempotency key is written in the same INSERT as the row itself,
//! eliminating a read-modify-write race. The remote task id is written
//! the moment cloud submission succeeds so a concurrent cancel request
//! can always find it. Completion and stem replacement happen in one
//! transaction: the conditional status update decides the race against
//! cancellation, and the stem set is only rebuilt when it wins.

use crate::models::{ProcessingJob, ProcessingJobOptions, StemFile};
use chrono::Utc;
use sfa_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Insert a new processing job row (idempotency key included)
pub async fn insert(pool: &SqlitePool, job: &ProcessingJob) -> Result<()> {
    let options = serde_json::to_string(&job.options)
        .map_err(|e| sfa_common::Error::Internal(format!("Failed to serialize options: {}", e)))?;
    sqlx::query(
        r#"
        INSERT INTO processing_jobs (
            job_id, track_id, status, engine, mode, options,
            idempotency_key, remote_task_id, error,
            created_at, started_at, finished_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(job.job_id.to_string())
    .bind(job.track_id.to_string())
    .bind(job.status.as_str())
    .bind(&job.engine)
    .bind(&job.mode)
    .bind(options)
    .bind(&job.idempotency_key)
    .bind(&job.remote_task_id)
    .bind(&job.error)
    .bind(job.created_at.to_rfc3339())
    .bind(job.started_at.map(|dt| dt.to_rfc3339()))
    .bind(job.finished_at.map(|dt| dt.to_rfc3339()))
    .execute(pool)
    .await?;
    Ok(())
}

/// Load one processing job by id
pub async fn get(pool: &SqlitePool, job_id: Uuid) -> Result<Option<ProcessingJob>> {
    let row = sqlx::query(
        r#"
        SELECT job_id, track_id, status, engine, mode, options,
               idempotency_key, remote_task_id, error,
               created_at, started_at, finished_at
        FROM processing_jobs WHERE job_id = ?
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
        UPDATE processing_jobs
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

/// Persist the cloud task handle immediately after submission succeeds
pub async fn set_remote_task_id(pool: &SqlitePool, job_id: Uuid, task_id: &str) -> Result<()> {
    sqlx::query("UPDATE processing_jobs SET remote_task_id = ? WHERE job_id = ?")
        .bind(task_id)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Complete the job and rebuild the track's stem set atomically
///
/// Returns false without touching any stems when the job is no longer
/// `running` (e.g. cancelled while the polling loop was in flight) —
/// the conditional update is what makes the cancel/complete race end in
/// exactly one terminal state.
pub async fn complete_with_stems(
    pool: &SqlitePool,
    job_id: Uuid,
    track_id: Uuid,
    stems: &[StemFile],
) -> Result<bool> {
    let mut tx = pool.begin().await?;

    let result = sqlx::query(
        r#"
        UPDATE processing_jobs
        SET status = 'completed', finished_at = ?
        WHERE job_id = ? AND status = 'running'
        "#,
    )
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(&mut *tx)
    .await?;

    if result.rows_affected() == 0 {
        tx.rollback().await?;
        return Ok(false);
    }

    // Rebuild-not-patch: the old set goes away wholesale
    sqlx::query("DELETE FROM stems WHERE track_id = ?")
        .bind(track_id.to_string())
        .execute(&mut *tx)
        .await?;

    for stem in stems {
        sqlx::query(
            r#"
            INSERT INTO stems (
                stem_id, track_id, processing_job_id, stem_type,
                file_path, file_size, created_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(Uuid::new_v4().to_string())
        .bind(track_id.to_string())
        .bind(job_id.to_string())
        .bind(stem.stem_type.as_str())
        .bind(&stem.file_path)
        .bind(stem.file_size)
        .bind(Utc::now().to_rfc3339())
        .execute(&mut *tx)
        .await?;
    }

    tx.commit().await?;
    Ok(true)
}

/// Transition to `failed` with captured error detail
pub async fn mark_failed(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE processing_jobs
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

/// Transition to `cancelled` (user-initiated, out-of-band)
pub async fn mark_cancelled(pool: &SqlitePool, job_id: Uuid, reason: &str) -> Result<bool> {
    let result = sqlx::query(
        r#"
        UPDATE processing_jobs
        SET status = 'cancelled', error = ?, finished_at = ?
        WHERE job_id = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(reason)
    .bind(Utc::now().to_rfc3339())
    .bind(job_id.to_string())
    .execute(pool)
    .await?;
    Ok(result.rows_affected() > 0)
}

/// Record error detail without changing status (retryable failure)
pub async fn record_error(pool: &SqlitePool, job_id: Uuid, error: &str) -> Result<()> {
    sqlx::query("UPDATE processing_jobs SET error = ? WHERE job_id = ?")
        .bind(error)
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Whether the track has a processing job still in flight
///
/// Convenience check for batch mode; the data model itself does not
/// forbid concurrent processing jobs for one track.
pub async fn has_active_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<bool> {
    let count: i64 = sqlx::query_scalar(
        r#"
        SELECT COUNT(*) FROM processing_jobs
        WHERE track_id = ? AND status IN ('queued', 'running')
        "#,
    )
    .bind(track_id.to_string())
    .fetch_one(pool)
    .await?;
    Ok(count > 0)
}

/// All processing jobs for a track (attempt history, newest first)
pub async fn list_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<Vec<ProcessingJob>> {
    let rows = sqlx::query(
        r#"
        SELECT job_id, track_id, status, engine, mode, options,
               idempotency_key, remote_task_id, error,
               created_at, started_at, finished_at
        FROM processing_jobs
        WHERE track_id = ?
        ORDER BY created_at DESC
        "#,
    )
    .bind(track_id.to_string())
    .fetch_all(pool)
    .await?;
    rows.into_iter().map(from_row).collect()
}

/// Delete all processing jobs for a track (track deletion cascade)
pub async fn delete_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM processing_jobs WHERE track_id = ?")
        .bind(track_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<ProcessingJob> {
    let job_id: String = row.get("job_id");
    let track_id: String = row.get("track_id");
    let status: String = row.get("status");
    let options: String = row.get("options");
    let options: ProcessingJobOptions = serde_json::from_str(&options)
        .map_err(|e| sfa_common::Error::Internal(format!("Failed to deserialize options: {}", e)))?;
    let created_at: String = row.get("created_at");
    Ok(ProcessingJob {
        job_id: super::parse_uuid(&job_id)?,
        track_id: super::parse_uuid(&track_id)?,
        status: super::parse_status(&status)?,
        engine: row.get("engine"),
        mode: row.get("mode"),
        options,
        idempotency_key: row.get("idempotency_key"),
        remote_task_id: row.get("remote_task_id"),
        error: row.get("error"),
        created_at: super::parse_timestamp(&created_at)?,
        started_at: super::parse_timestamp_opt(row.get("started_at"))?,
        finished_at: super::parse_timestamp_opt(row.get("finished_at"))?,
    })
}
