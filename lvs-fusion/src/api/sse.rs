//! Server-Sent Events for read-only observers
//!
//! Streams the same updates WebSocket observers receive for one meeting.
//! The meeting is pruned when the client disconnects.

use crate::AppState;
use axum::{
    extract::{Path, State},
    response::sse::{Event, KeepAlive, Sse},
};
use futures::stream::{Stream, StreamExt};
use std::convert::Infallible;
use std::time::Duration;
use tracing::{debug, warn};

/// GET /api/v1/meetings/:meeting_code/events
pub async fn meeting_events(
    State(state): State<AppState>,
    Path(meeting_code): Path<String>,
) -> Sse<impl Stream<Item = Result<Event, Infallible>>> {
    debug!("SSE observer joined meeting {}", meeting_code);
    let subscription = state.engine.registry.subscribe(&meeting_code).await;

    let stream = subscription.filter_map(|result| async move {
        match result {
            Ok(update) => match serde_json::to_string(&update) {
                Ok(json) => Some(Ok(Event::default().event("verification").data(json))),
                Err(e) => {
                    warn!("Failed to serialize update: {}", e);
                    None
                }
            },
            Err(e) => {
                // Lagged observers skip ahead
                warn!("SSE stream error: {:?}", e);
                None
            }
        }
    });

    Sse::new(stream).keep_alive(
        KeepAlive::new()
            .interval(Duration::from_secs(15))
            .text("keep-alive"),
    )
}
