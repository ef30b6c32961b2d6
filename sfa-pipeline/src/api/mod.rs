//! HTTP API handlers for sfa-pipeline

pub mod health;
pub mod pipeline;
pub mod sse;
pub mod tracks;

pub use health::health_routes;
pub use pipeline::pipeline_routes;
pub use sse::event_stream;
pub use tracks::track_routes;
