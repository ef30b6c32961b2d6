//! Durable work queue
//!
//! Each stage job that should run gets one row here. Workers claim rows
//! with a single conditional UPDATE so two workers can never lease the
//! same item, even across processes sharing the database file. Attempts
//! are counted at claim time: a worker that crashes mid-item has still
//! consumed an attempt, so a poisoned item cannot loop forever.

use chrono::{DateTime, Duration, Utc};
use sfa_common::events::Stage;
use sfa_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// A unit of work owned by the queue
#[derive(Debug, Clone)]
pub struct WorkItem {
    pub item_id: Uuid,
    pub stage: Stage,
    pub job_id: Uuid,
    pub track_id: Uuid,
    pub state: WorkState,
    pub attempts: i64,
    pub max_attempts: i64,
    pub run_at: DateTime<Utc>,
    pub leased_at: Option<DateTime<Utc>>,
    pub created_at: DateTime<Utc>,
}

impl WorkItem {
    /// Whether another delivery is allowed after this one fails
    pub fn attempts_remaining(&self) -> bool {
        self.attempts < self.max_attempts
    }
}

/// Queue-side lifecycle of a work item, independent of job status
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WorkState {
    Queued,
    Leased,
    Done,
    Dead,
}

impl WorkState {
    pub fn as_str(&self) -> &'static str {
        match self {
            WorkState::Queued => "queued",
            WorkState::Leased => "leased",
            WorkState::Done => "done",
            WorkState::Dead => "dead",
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "queued" => Some(WorkState::Queued),
            "leased" => Some(WorkState::Leased),
            "done" => Some(WorkState::Done),
            "dead" => Some(WorkState::Dead),
            _ => None,
        }
    }
}

/// Enqueue a stage job, runnable immediately
pub async fn enqueue(
    pool: &SqlitePool,
    stage: Stage,
    job_id: Uuid,
    track_id: Uuid,
    max_attempts: i64,
) -> Result<Uuid> {
    let item_id = Uuid::new_v4();
    let now = Utc::now().to_rfc3339();
    sqlx::query(
        r#"
        INSERT INTO work_queue (
            item_id, stage, job_id, track_id, state,
            attempts, max_attempts, run_at, leased_at, created_at
        ) VALUES (?, ?, ?, ?, 'queued', 0, ?, ?, NULL, ?)
        "#,
    )
    .bind(item_id.to_string())
    .bind(stage.as_str())
    .bind(job_id.to_string())
    .bind(track_id.to_string())
    .bind(max_attempts)
    .bind(&now)
    .bind(&now)
    .execute(pool)
    .await?;
    Ok(item_id)
}

/// Claim the oldest runnable item for a stage
///
/// The UPDATE targets a single row chosen by a subselect and flips it to
/// `leased` while incrementing the attempt counter; RETURNING hands the
/// claimed row back in the same statement. Returns None when nothing is
/// due.
pub async fn claim(pool: &SqlitePool, stage: Stage) -> Result<Option<WorkItem>> {
    let now = Utc::now().to_rfc3339();
    let row = sqlx::query(
        r#"
        UPDATE work_queue
        SET state = 'leased', attempts = attempts + 1, leased_at = ?
        WHERE item_id = (
            SELECT item_id FROM work_queue
            WHERE stage = ? AND state = 'queued' AND run_at <= ?
            ORDER BY run_at
            LIMIT 1
        )
        RETURNING item_id, stage, job_id, track_id, state,
                  attempts, max_attempts, run_at, leased_at, created_at
        "#,
    )
    .bind(&now)
    .bind(stage.as_str())
    .bind(&now)
    .fetch_optional(pool)
    .await?;
    row.map(from_row).transpose()
}

/// Finish an item (the stage reached a terminal outcome, good or bad)
pub async fn complete(pool: &SqlitePool, item_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE work_queue SET state = 'done' WHERE item_id = ?")
        .bind(item_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Return a leased item to the queue with exponential backoff
///
/// Delay doubles with each consumed attempt: base, 2x base, 4x base...
pub async fn reschedule(pool: &SqlitePool, item: &WorkItem, backoff_base_secs: u64) -> Result<()> {
    let exponent = (item.attempts - 1).max(0).min(16) as u32;
    let delay_secs = backoff_base_secs.saturating_mul(1u64 << exponent);
    let run_at = Utc::now() + Duration::seconds(delay_secs as i64);
    sqlx::query(
        r#"
        UPDATE work_queue
        SET state = 'queued', run_at = ?, leased_at = NULL
        WHERE item_id = ? AND state = 'leased'
        "#,
    )
    .bind(run_at.to_rfc3339())
    .bind(item.item_id.to_string())
    .execute(pool)
    .await?;
    Ok(())
}

/// Mark an item dead (attempts exhausted or fatal failure)
pub async fn mark_dead(pool: &SqlitePool, item_id: Uuid) -> Result<()> {
    sqlx::query("UPDATE work_queue SET state = 'dead' WHERE item_id = ?")
        .bind(item_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Remove queue entries for a job that was cancelled before pickup
pub async fn remove_for_job(pool: &SqlitePool, job_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM work_queue WHERE job_id = ? AND state = 'queued'")
        .bind(job_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

/// Remove all queue entries for a track (track deletion cascade)
pub async fn remove_for_track(pool: &SqlitePool, track_id: Uuid) -> Result<()> {
    sqlx::query("DELETE FROM work_queue WHERE track_id = ?")
        .bind(track_id.to_string())
        .execute(pool)
        .await?;
    Ok(())
}

/// Requeue items whose lease outlived the configured bound
///
/// Run periodically; catches workers that died holding a lease. Items
/// out of attempts go dead instead of back in the queue.
pub async fn requeue_expired_leases(pool: &SqlitePool, lease_secs: u64) -> Result<u64> {
    let cutoff = (Utc::now() - Duration::seconds(lease_secs as i64)).to_rfc3339();
    let now = Utc::now().to_rfc3339();

    sqlx::query(
        r#"
        UPDATE work_queue
        SET state = 'dead'
        WHERE state = 'leased' AND leased_at < ? AND attempts >= max_attempts
        "#,
    )
    .bind(&cutoff)
    .execute(pool)
    .await?;

    let result = sqlx::query(
        r#"
        UPDATE work_queue
        SET state = 'queued', run_at = ?, leased_at = NULL
        WHERE state = 'leased' AND leased_at < ?
        "#,
    )
    .bind(&now)
    .bind(&cutoff)
    .execute(pool)
    .await?;
    Ok(result.rows_affected())
}

/// Pending (queued or leased) item count per stage, for status reporting
pub async fn pending_count(pool: &SqlitePool, stage: Stage) -> Result<i64> {
    let count: i64 = sqlx::query_scalar(
        "SELECT COUNT(*) FROM work_queue WHERE stage = ? AND state IN ('queued', 'leased')",
    )
    .bind(stage.as_str())
    .fetch_one(pool)
    .await?;
    Ok(count)
}

fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<WorkItem> {
    let item_id: String = row.get("item_id");
    let stage: String = row.get("stage");
    let job_id: String = row.get("job_id");
    let track_id: String = row.get("track_id");
    let state: String = row.get("state");
    let run_at: String = row.get("run_at");
    let created_at: String = row.get("created_at");
    Ok(WorkItem {
        item_id: super::parse_uuid(&item_id)?,
        stage: Stage::parse(&stage)
            .ok_or_else(|| sfa_common::Error::Internal(format!("Unknown stage: {}", stage)))?,
        job_id: super::parse_uuid(&job_id)?,
        track_id: super::parse_uuid(&track_id)?,
        state: WorkState::parse(&state)
            .ok_or_else(|| sfa_common::Error::Internal(format!("Unknown work state: {}", state)))?,
        attempts: row.get("attempts"),
        max_attempts: row.get("max_attempts"),
        run_at: super::parse_timestamp(&run_at)?,
        leased_at: super::parse_timestamp_opt(row.get("leased_at"))?,
        created_at: super::parse_timestamp(&created_at)?,
    })
}
