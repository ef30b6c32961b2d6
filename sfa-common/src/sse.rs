//! Server-Sent Events (SSE) utilities
//!
//! Bridges the broadcast EventBus to SSE streams for browser observers.

use crate::events::EventBus;
use axum::response::sse::{Event, KeepAlive, Sse};
use futures::stream::Stream;
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, info, warn};

/// Create an SSE stream delivering every pipeline event to one client
///
/// Each event is serialized as JSON with its type name as the SSE event
/// name. A lagging client drops old events and keeps going; delivery is
/// at-least-once by contract, so observers already tolerate gaps filled
/// in by re-querying state.
pub fn create_event_sse_stream(
    bus: &EventBus,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    let mut rx = bus.subscribe();
    info!("New SSE client connected to pipeline events");

    let stream = async_stream::stream! {
        // Initial connection marker so clients can show status immediately
        yield Ok(Event::default().event("ConnectionStatus").data("connected"));

        loop {
            match rx.recv().await {
                Ok(event) => {
                    match serde_json::to_string(&event) {
                        Ok(json) => {
                            yield Ok(Event::default().event(event.event_type()).data(json));
                        }
                        Err(e) => {
                            warn!(error = %e, "Failed to serialize pipeline event for SSE");
                        }
                    }
                }
                Err(tokio::sync::broadcast::error::RecvError::Lagged(skipped)) => {
                    debug!(skipped, "SSE client lagged, events dropped");
                    continue;
                }
                Err(tokio::sync::broadcast::error::RecvError::Closed) => break,
            }
        }
    };

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("heartbeat"),
    )
}
