//! Database access for the SFA pipeline
//!
//! SQLite is the single source of truth for tracks, stage jobs, derived
//! artifacts and the durable work queue. Writers use row-level
//! conditional updates keyed by job id, so concurrent readers/writers
//! are safe without any additional locking.

pub mod analysis_jobs;
pub mod analysis_results;
pub mod download_jobs;
pub mod processing_jobs;
pub mod queue;
pub mod stems;
pub mod tracks;

use sfa_common::Result;
use sqlx::SqlitePool;
use std::path::Path;

/// Initialize database connection pool
pub async fn init_database_pool(db_path: &Path) -> Result<SqlitePool> {
    if let Some(parent) = db_path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    // SQLite URI with mode=rwc (read, write, create)
    let db_url = format!("sqlite://{}?mode=rwc", db_path.display());
    tracing::debug!("Connecting to database: {}", db_url);

    let pool = SqlitePool::connect(&db_url).await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// In-memory pool for tests
///
/// Capped at one connection: every `sqlite::memory:` connection is its
/// own database, so a larger pool would hand out empty databases.
pub async fn init_memory_pool() -> Result<SqlitePool> {
    let pool = sqlx::sqlite::SqlitePoolOptions::new()
        .max_connections(1)
        .connect("sqlite::memory:")
        .await?;
    init_tables(&pool).await?;
    Ok(pool)
}

/// Create pipeline tables if they don't exist
pub async fn init_tables(pool: &SqlitePool) -> Result<()> {
    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS tracks (
            track_id TEXT PRIMARY KEY,
            title TEXT NOT NULL,
            artist TEXT NOT NULL,
            album TEXT,
            source_url TEXT NOT NULL,
            provider_id TEXT,
            duration_seconds REAL,
            cover_url TEXT,
            isrc TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS download_jobs (
            job_id TEXT PRIMARY KEY,
            track_id TEXT NOT NULL,
            status TEXT NOT NULL,
            options TEXT NOT NULL,
            output_path TEXT,
            file_size INTEGER,
            error TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS processing_jobs (
            job_id TEXT PRIMARY KEY,
            track_id TEXT NOT NULL,
            status TEXT NOT NULL,
            engine TEXT NOT NULL,
            mode TEXT NOT NULL,
            options TEXT NOT NULL,
            idempotency_key TEXT NOT NULL,
            remote_task_id TEXT,
            error TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_jobs (
            job_id TEXT PRIMARY KEY,
            track_id TEXT NOT NULL,
            status TEXT NOT NULL,
            options TEXT NOT NULL,
            error TEXT,
            created_at TEXT NOT NULL,
            started_at TEXT,
            finished_at TEXT
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS stems (
            stem_id TEXT PRIMARY KEY,
            track_id TEXT NOT NULL,
            processing_job_id TEXT NOT NULL,
            stem_type TEXT NOT NULL,
            file_path TEXT NOT NULL,
            file_size INTEGER,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS analysis_results (
            result_id TEXT PRIMARY KEY,
            track_id TEXT NOT NULL,
            analysis_job_id TEXT NOT NULL,
            tempo REAL,
            musical_key TEXT,
            energy REAL,
            features TEXT NOT NULL,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        r#"
        CREATE TABLE IF NOT EXISTS work_queue (
            item_id TEXT PRIMARY KEY,
            stage TEXT NOT NULL,
            job_id TEXT NOT NULL,
            track_id TEXT NOT NULL,
            state TEXT NOT NULL DEFAULT 'queued',
            attempts INTEGER NOT NULL DEFAULT 0,
            max_attempts INTEGER NOT NULL,
            run_at TEXT NOT NULL,
            leased_at TEXT,
            created_at TEXT NOT NULL
        )
        "#,
    )
    .execute(pool)
    .await?;

    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_download_jobs_track ON download_jobs(track_id, status)",
    )
    .execute(pool)
    .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_processing_jobs_track ON processing_jobs(track_id, status)",
    )
    .execute(pool)
    .await?;
    sqlx::query("CREATE INDEX IF NOT EXISTS idx_stems_track ON stems(track_id)")
        .execute(pool)
        .await?;
    sqlx::query(
        "CREATE INDEX IF NOT EXISTS idx_work_queue_claim ON work_queue(stage, state, run_at)",
    )
    .execute(pool)
    .await?;

    tracing::info!("Database tables initialized");
    Ok(())
}

/// Parse an RFC3339 TEXT column into a UTC timestamp
pub(crate) fn parse_timestamp(s: &str) -> Result<chrono::DateTime<chrono::Utc>> {
    chrono::DateTime::parse_from_rfc3339(s)
        .map(|dt| dt.with_timezone(&chrono::Utc))
        .map_err(|e| sfa_common::Error::Internal(format!("Failed to parse timestamp: {}", e)))
}

/// Parse an optional RFC3339 TEXT column
pub(crate) fn parse_timestamp_opt(
    s: Option<String>,
) -> Result<Option<chrono::DateTime<chrono::Utc>>> {
    s.map(|s| parse_timestamp(&s)).transpose()
}

/// Parse a TEXT uuid column
pub(crate) fn parse_uuid(s: &str) -> Result<uuid::Uuid> {
    uuid::Uuid::parse_str(s)
        .map_err(|e| sfa_common::Error::Internal(format!("Failed to parse uuid: {}", e)))
}

/// Parse a TEXT status column
pub(crate) fn parse_status(s: &str) -> Result<sfa_common::events::StageStatus> {
    sfa_common::events::StageStatus::parse(s)
        .ok_or_else(|| sfa_common::Error::Internal(format!("Unknown job status: {}", s)))
}
