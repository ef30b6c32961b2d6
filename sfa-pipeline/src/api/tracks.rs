//! Track import, inspection and deletion endpoints

use axum::{
    extract::{Path, State},
    routing::{get, post},
    Json, Router,
};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use crate::db;
use crate::error::{ApiError, ApiResult};
use crate::models::{AnalysisResult, Stem, Track};
use crate::AppState;

#[derive(Debug, Deserialize)]
pub struct ImportRequest {
    /// Provider URL to import
    pub url: String,
}

/// Track with its current derived artifacts
#[derive(Debug, Serialize)]
pub struct TrackDetail {
    #[serde(flatten)]
    pub track: Track,
    pub stems: Vec<Stem>,
    pub analysis: Option<AnalysisResult>,
}

/// POST /tracks - import a track by URL (metadata fetch, no download)
pub async fn import_track(
    State(state): State<AppState>,
    Json(request): Json<ImportRequest>,
) -> ApiResult<Json<Track>> {
    if request.url.trim().is_empty() {
        return Err(ApiError::BadRequest("url must not be empty".to_string()));
    }
    let track = state.coordinator.import_track(&request.url).await?;
    Ok(Json(track))
}

/// GET /tracks/:id - track with stems and analysis
pub async fn get_track(
    State(state): State<AppState>,
    Path(track_id): Path<Uuid>,
) -> ApiResult<Json<TrackDetail>> {
    let track = db::tracks::get(&state.db, track_id)
        .await?
        .ok_or_else(|| ApiError::NotFound(format!("Track {} not found", track_id)))?;
    let stems = db::stems::list_for_track(&state.db, track_id).await?;
    let analysis = db::analysis_results::get_for_track(&state.db, track_id).await?;
    Ok(Json(TrackDetail {
        track,
        stems,
        analysis,
    }))
}

/// DELETE /tracks/:id - remove the track, its jobs and artifact files
pub async fn delete_track(
    State(state): State<AppState>,
    Path(track_id): Path<Uuid>,
) -> ApiResult<Json<serde_json::Value>> {
    state.coordinator.delete_track(track_id).await?;
    Ok(Json(serde_json::json!({ "deleted": track_id })))
}

/// Build track routes
pub fn track_routes() -> Router<AppState> {
    Router::new()
        .route("/tracks", post(import_track))
        .route("/tracks/:id", get(get_track).delete(delete_track))
}
