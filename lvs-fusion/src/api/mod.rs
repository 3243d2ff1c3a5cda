//! HTTP, WebSocket and SSE handlers

pub mod health;
pub mod sse;
pub mod ws;

pub use health::health_routes;
pub use sse::meeting_events;
pub use ws::verify_socket;
