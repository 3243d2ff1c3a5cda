//! Streaming endpoint
//!
//! Every connection is an observer of its meeting: it receives all updates
//! broadcast by any session of that meeting. Connections that also send
//! frames drive a verification session. Finalize runs once after the receive
//! loop ends, however it ends. Sockets are tracked by the engine so shutdown
//! can wait for every session to finalize.

use crate::liveness::Challenge;
use crate::session::{FusionEngine, Session, SessionKey};
use crate::AppState;
use axum::{
    extract::{
        ws::{Message, WebSocket, WebSocketUpgrade},
        ConnectInfo, Path, Query, State,
    },
    response::Response,
};
use futures::stream::{Stream, StreamExt};
use futures::{FutureExt, SinkExt};
use serde::Deserialize;
use std::net::SocketAddr;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use tokio::sync::broadcast::error::RecvError;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

#[derive(Debug, Deserialize)]
pub struct VerifyParams {
    pub challenge: Option<String>,
}

/// GET /ws/verify/:meeting_code/:subject_id
pub async fn verify_socket(
    ws: WebSocketUpgrade,
    State(state): State<AppState>,
    Path((meeting_code, subject_id)): Path<(String, i64)>,
    Query(params): Query<VerifyParams>,
    connect_info: Option<ConnectInfo<SocketAddr>>,
) -> Response {
    let challenge = match params.challenge.as_deref().map(str::parse::<Challenge>) {
        Some(Ok(challenge)) => challenge,
        Some(Err(e)) => {
            warn!("{}, using blink", e);
            Challenge::default()
        }
        None => Challenge::default(),
    };
    let client_ip = connect_info.map(|ConnectInfo(addr)| addr.ip());
    let key = SessionKey {
        meeting_code,
        subject_id,
    };

    let sessions = state.engine.sessions.clone();
    ws.on_upgrade(move |socket| {
        sessions.track_future(run_socket(socket, state.engine, key, challenge, client_ip))
    })
}

async fn run_socket(
    socket: WebSocket,
    engine: Arc<FusionEngine>,
    key: SessionKey,
    challenge: Challenge,
    client_ip: Option<std::net::IpAddr>,
) {
    let (mut sender, receiver) = socket.split();
    let shutdown = engine.shutdown_token.clone();
    let mut session = Session::start(engine, key, challenge, client_ip).await;
    let session_id = session.id();

    let updates = session.subscribe();
    let forward = tokio::spawn(async move {
        let Some(mut updates) = updates else {
            return;
        };
        loop {
            match updates.recv().await {
                Ok(update) => {
                    let json = match serde_json::to_string(&update) {
                        Ok(json) => json,
                        Err(e) => {
                            warn!("Failed to serialize update: {}", e);
                            continue;
                        }
                    };
                    if sender.send(Message::Text(json)).await.is_err() {
                        break;
                    }
                }
                Err(RecvError::Lagged(skipped)) => {
                    debug!("Observer lagged, skipped {} updates", skipped);
                }
                Err(RecvError::Closed) => break,
            }
        }
    });

    let exit = AssertUnwindSafe(drive_session(&mut session, receiver, &shutdown))
        .catch_unwind()
        .await;
    match exit {
        Ok(reason) => info!("Session {} closed: {}", session_id, reason),
        Err(_) => error!("Session {} receive loop panicked", session_id),
    }

    // Forwarder holds a receiver; stop it before leaving the meeting
    forward.abort();
    let _ = forward.await;
    session.finalize().await;
}

/// Feed client messages into a session until the client goes away or the
/// server shuts down; returns why it stopped
///
/// The caller finalizes the session afterwards.
pub async fn drive_session<S>(
    session: &mut Session,
    mut incoming: S,
    shutdown: &CancellationToken,
) -> &'static str
where
    S: Stream<Item = Result<Message, axum::Error>> + Unpin,
{
    loop {
        let message = tokio::select! {
            _ = shutdown.cancelled() => return "server shutdown",
            message = incoming.next() => message,
        };
        let Some(message) = message else {
            return "stream ended";
        };
        match message {
            Ok(Message::Text(text)) => {
                session.handle_text(&text).await;
            }
            Ok(Message::Binary(bytes)) => match String::from_utf8(bytes) {
                Ok(text) => {
                    session.handle_text(&text).await;
                }
                Err(_) => debug!("Session {} dropped binary message", session.id()),
            },
            Ok(Message::Close(_)) => return "client closed",
            Ok(Message::Ping(_)) | Ok(Message::Pong(_)) => {}
            Err(e) => {
                warn!("Session {} socket error: {}", session.id(), e);
                return "socket error";
            }
        }
    }
}
