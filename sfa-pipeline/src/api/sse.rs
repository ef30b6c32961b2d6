//! Server-Sent Events endpoint for pipeline progress

use crate::AppState;
use axum::{
    extract::State,
    response::sse::{Event, Sse},
};
use futures::stream::Stream;
use std::convert::Infallible;

/// GET /events - SSE stream of all pipeline events
///
/// Streams StageProgress, StageFailed, PipelineComplete, BatchProgress
/// and BatchComplete as they are published.
pub async fn event_stream(
    State(state): State<AppState>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    sfa_common::sse::create_event_sse_stream(&state.event_bus)
}
