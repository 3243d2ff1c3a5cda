//! lvs-fusion library - live verification streaming fusion engine
//!
//! Windows incoming video frames per session, serializes heavy analysis
//! across all sessions behind one gate, fuses liveness, deepfake and
//! face-match evidence into a verdict, and persists one record per
//! (meeting, subject).

use axum::Router;
use std::sync::Arc;
use tower_http::cors::CorsLayer;
use tower_http::trace::TraceLayer;

pub mod api;
pub mod db;
pub mod deepfake;
pub mod error;
pub mod face_match;
pub mod frame;
pub mod geo;
pub mod liveness;
pub mod models;
pub mod pipeline;
pub mod session;

pub use error::{Error, Result};
pub use session::FusionEngine;

/// Application state shared across handlers
#[derive(Clone)]
pub struct AppState {
    pub engine: Arc<FusionEngine>,
}

impl AppState {
    pub fn new(engine: Arc<FusionEngine>) -> Self {
        Self { engine }
    }
}

/// Build application router
pub fn build_router(state: AppState) -> Router {
    use axum::routing::get;

    Router::new()
        .route(
            "/ws/verify/:meeting_code/:subject_id",
            get(api::verify_socket),
        )
        .route(
            "/api/v1/meetings/:meeting_code/events",
            get(api::meeting_events),
        )
        .merge(api::health_routes())
        .with_state(state)
        .layer(TraceLayer::new_for_http())
        .layer(CorsLayer::permissive())
}
