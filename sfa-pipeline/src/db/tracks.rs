//! Track row operations

use crate::models::Track;
use sfa_common::Result;
use sqlx::{Row, SqlitePool};
use uuid::Uuid;

/// Insert a new track row
pub async fn insert(pool: &SqlitePool, track: &Track) -> Result<()> {
    sqlx::query(
        r#"
        INSERT INTO tracks (
            track_id, title, artist, album, source_url, provider_id,
            duration_seconds, cover_url, isrc, created_at
        ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
        "#,
    )
    .bind(track.track_id.to_string())
    .bind(&track.title)
    .bind(&track.artist)
    .bind(&track.album)
    .bind(&track.source_url)
    .bind(&track.provider_id)
    .bind(track.duration_seconds)
    .bind(&track.cover_url)
    .bind(&track.isrc)
    .bind(track.created_at.to_rfc3339())
    .execute(pool)
    .await?;
    Ok(())
}

/// Load one track by id
pub async fn get(pool: &SqlitePool, track_id: Uuid) -> Result<Option<Track>> {
    let row = sqlx::query(
        r#"
        SELECT track_id, title, artist, album, source_url, provider_id,
               duration_seconds, cover_url, isrc, created_at
        FROM tracks WHERE track_id = ?
        "#,
    )
    .bind(track_id.to_string())
    .fetch_optional(pool)
    .await?;

    row.map(from_row).transpose()
}

/// Delete one track row (artifact rows and files are cleaned up by the
/// coordinator before this is called)
pub async fn delete(pool: &SqlitePool, track_id: Uuid) -> Result<bool> {
    let result = sqlx::query("DELETE FROM tracks WHERE track_id = ?")
        .bind(track_id.to_string())
        .execute(pool)
        .await?;
    Ok(result.rows_affected() > 0)
}

fn from_row(row: sqlx::sqlite::SqliteRow) -> Result<Track> {
    let track_id: String = row.get("track_id");
    let created_at: String = row.get("created_at");
    Ok(Track {
        track_id: super::parse_uuid(&track_id)?,
        title: row.get("title"),
        artist: row.get("artist"),
        album: row.get("album"),
        source_url: row.get("source_url"),
        provider_id: row.get("provider_id"),
        duration_seconds: row.get("duration_seconds"),
        cover_url: row.get("cover_url"),
        isrc: row.get("isrc"),
        created_at: super::parse_timestamp(&created_at)?,
    })
}
