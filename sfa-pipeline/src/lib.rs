//! sfa-pipeline library interface
//!
//! Exposes the pipeline service internals for integration testing.

pub mod api;
pub mod coordinator;
pub mod db;
pub mod error;
pub mod executors;
pub mod models;
pub mod queue;
pub mod services;

pub use crate::error::{ApiError, ApiResult};

use axum::Router;
use chrono::{DateTime, Utc};
use coordinator::Coordinator;
use sfa_common::events::EventBus;
use sqlx::SqlitePool;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    /// Database connection pool
    pub db: SqlitePool,
    /// Event bus for SSE broadcasting
    pub event_bus: EventBus,
    /// Pipeline coordinator
    pub coordinator: Coordinator,
    /// Service startup timestamp for uptime tracking
    pub startup_time: DateTime<Utc>,
}

impl AppState {
    pub fn new(db: SqlitePool, event_bus: EventBus, coordinator: Coordinator) -> Self {
        Self {
            db,
            event_bus,
            coordinator,
            startup_time: Utc::now(),
        }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .merge(api::track_routes())
        .merge(api::pipeline_routes())
        .route("/events", get(api::event_stream))
        .merge(api::health_routes())
        .with_state(state)
}
