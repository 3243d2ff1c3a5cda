//! Session runner
//!
//! Frames of one session are processed strictly in arrival order: the
//! transport awaits each `ingest_*` call before reading the next message.
//! CPU-bound work (decode, downsample, inference) runs on the blocking pool.

use super::fuser::Verdict;
use super::registry::Membership;
use super::state::SessionState;
use super::FusionEngine;
use crate::db::{latest_identity_document, VerificationGateway, VerificationWrite};
use crate::face_match::ReferenceFace;
use crate::frame::{decode_frame, Frame, FrameWindow, WindowOffer};
use crate::geo::GeoPoint;
use crate::liveness::Challenge;
use lvs_common::messages::{InboundMessage, VerificationUpdate};
use std::net::IpAddr;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use tokio::sync::broadcast;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// (meeting, subject) pair a session verifies
#[derive(Debug, Clone, PartialEq, Eq, Hash)]
pub struct SessionKey {
    pub meeting_code: String,
    pub subject_id: i64,
}

pub struct Session {
    id: Uuid,
    key: SessionKey,
    challenge: Challenge,
    engine: Arc<FusionEngine>,
    membership: Option<Membership>,
    state: SessionState,
    window: FrameWindow,
    reference: Arc<ReferenceFace>,
    gateway: VerificationGateway,
    client_ip: Option<IpAddr>,
    geo: Option<GeoPoint>,
    finalized: bool,
}

impl Session {
    /// Accept a connection: join the meeting, resolve the reference face and
    /// geolocate the client
    pub async fn start(
        engine: Arc<FusionEngine>,
        key: SessionKey,
        challenge: Challenge,
        client_ip: Option<IpAddr>,
    ) -> Session {
        let id = Uuid::new_v4();
        info!(
            "Session {} started for meeting {} subject {} (challenge {:?})",
            id, key.meeting_code, key.subject_id, challenge
        );

        let membership = engine.registry.join(&key.meeting_code).await;
        let reference = Arc::new(load_reference(&engine, key.subject_id).await);
        let geo = match client_ip {
            Some(ip) => engine.geo.locate(ip).await,
            None => None,
        };

        let availability = engine.availability_for(challenge);
        if !availability.liveness {
            warn!(
                "Session {} cannot score {:?}, liveness reported unavailable",
                id, challenge
            );
        }

        let tunables = &engine.tunables;
        Session {
            id,
            challenge,
            state: SessionState::new(tunables, availability),
            window: FrameWindow::new(tunables.chunk_size, tunables.overflow_limit()),
            gateway: VerificationGateway::new(engine.db.clone()),
            membership: Some(membership),
            reference,
            client_ip,
            geo,
            key,
            engine,
            finalized: false,
        }
    }

    pub fn id(&self) -> Uuid {
        self.id
    }

    pub fn key(&self) -> &SessionKey {
        &self.key
    }

    pub fn state(&self) -> &SessionState {
        &self.state
    }

    pub fn reference(&self) -> &ReferenceFace {
        &self.reference
    }

    /// Updates broadcast to this session's meeting
    pub fn subscribe(&self) -> Option<broadcast::Receiver<VerificationUpdate>> {
        self.membership.as_ref().map(Membership::subscribe)
    }

    /// Handle one text message; Some when an update was broadcast
    pub async fn handle_text(&mut self, text: &str) -> Option<VerificationUpdate> {
        match InboundMessage::parse(text) {
            Some(InboundMessage::Frame { payload }) => self.ingest_payload(payload).await,
            Some(InboundMessage::Ping) => None,
            None => {
                debug!("Session {} dropped unrecognized message", self.id);
                None
            }
        }
    }

    /// Decode a transport payload and ingest it; undecodable payloads are dropped
    pub async fn ingest_payload(&mut self, payload: String) -> Option<VerificationUpdate> {
        let decoded = tokio::task::spawn_blocking(move || decode_frame(&payload)).await;
        match decoded {
            Ok(Ok(frame)) => Some(self.ingest_frame(frame).await),
            Ok(Err(e)) => {
                debug!("Session {} dropped frame: {}", self.id, e);
                None
            }
            Err(e) => {
                warn!("Session {} decode task failed: {}", self.id, e);
                None
            }
        }
    }

    /// Run one decoded frame through the fast path and the window
    pub async fn ingest_frame(&mut self, frame: Frame) -> VerificationUpdate {
        self.state.record_frame();

        let run_fast_path = !self.state.confirmed();
        let pipeline = Arc::clone(&self.engine.pipeline);
        let fast_width = self.engine.tunables.liveness_target_width;
        let heavy_width = self.engine.tunables.heavy_target_width;

        let prepared = tokio::task::spawn_blocking(move || {
            let instant = run_fast_path.then(|| {
                pipeline
                    .liveness()
                    .fast_check(&frame.downsample(fast_width))
            });
            (instant, frame.downsample(heavy_width))
        })
        .await;

        match prepared {
            Ok((instant, heavy_frame)) => {
                match instant {
                    Some(Ok(Some(score))) => self.state.apply_instant(score),
                    Some(Ok(None)) | None => {}
                    Some(Err(e)) => debug!("Session {} fast path: {}", self.id, e),
                }
                if self.window.push(heavy_frame) {
                    self.offer_window().await;
                }
            }
            Err(e) => warn!("Session {} frame preparation failed: {}", self.id, e),
        }

        let update = self.state.snapshot();
        if let Some(membership) = &self.membership {
            membership.broadcast(update);
        }
        update
    }

    async fn offer_window(&mut self) {
        let Some(permit) = self.engine.gate.try_enter() else {
            if let WindowOffer::Dropped { len } = self.window.defer() {
                debug!("Session {} lost {} frames to contention", self.id, len);
            }
            return;
        };

        let chunk = self.window.take_chunk();
        let outcome = self
            .engine
            .pipeline
            .run(permit, chunk, Arc::clone(&self.reference), self.challenge)
            .await;
        for (stage, failure) in [
            ("liveness", outcome.liveness.as_ref().err()),
            ("deepfake", outcome.deepfake.as_ref().err()),
            ("face match", outcome.face_match.as_ref().err()),
        ] {
            if let Some(e) = failure {
                debug!("Session {} {} stage: {}", self.id, stage, e);
            }
        }

        let result = self.state.apply_chunk(&outcome);
        debug!("Session {} chunk result: {:?}", self.id, result);

        // Gate already released; live writes are best-effort
        let verdict = self.state.live_verdict();
        if let Err(e) = self.persist(&verdict).await {
            error!("Session {} live persistence failed: {}", self.id, e);
        }
    }

    /// Compute and persist the authoritative verdict, then leave the meeting
    ///
    /// Runs at most once; later calls return None. Sessions that never
    /// decoded a frame persist nothing.
    pub async fn finalize(&mut self) -> Option<Verdict> {
        if self.finalized {
            return None;
        }
        self.finalized = true;

        let verdict = if self.state.frames_decoded() == 0 {
            info!("Session {} ended without frames, nothing to persist", self.id);
            None
        } else {
            let verdict = self.state.final_verdict();
            info!(
                "Session {} final: pass={} liveness={:.2} deepfake={:.2} face={:.2} chunks={} reason={}",
                self.id,
                verdict.is_pass(),
                verdict.scores.liveness,
                verdict.scores.deepfake,
                verdict.scores.face_match,
                self.state.accumulator().chunks(),
                verdict.failure_reason()
            );
            if let Err(e) = self.persist(&verdict).await {
                error!("Session {} final persistence failed: {}", self.id, e);
            }
            Some(verdict)
        };

        if let Some(membership) = self.membership.take() {
            self.engine.registry.leave(membership).await;
        }
        verdict
    }

    async fn persist(&mut self, verdict: &Verdict) -> crate::Result<i64> {
        let write = VerificationWrite {
            meeting_code: self.key.meeting_code.clone(),
            subject_id: self.key.subject_id,
            liveness_score: verdict.scores.liveness,
            deepfake_score: verdict.scores.deepfake,
            face_match_score: verdict.scores.face_match,
            is_pass: verdict.is_pass(),
            failure_reason: verdict.failure_reason(),
            ip_address: self.client_ip.map(|ip| ip.to_string()),
            latitude: self.geo.map(|g| g.latitude),
            longitude: self.geo.map(|g| g.longitude),
        };
        self.gateway.upsert(&write).await
    }
}

impl Drop for Session {
    fn drop(&mut self) {
        if !self.finalized {
            error!("Session {} dropped without finalize", self.id);
        }
    }
}

/// Resolve the subject's reference face once, at session start
async fn load_reference(engine: &FusionEngine, subject_id: i64) -> ReferenceFace {
    if !engine.pipeline.face_match().is_available() {
        return ReferenceFace::Unavailable("face match unavailable".to_string());
    }

    let document = match latest_identity_document(&engine.db, subject_id).await {
        Ok(Some(document)) => document,
        Ok(None) => {
            warn!("Subject {} has no identity document", subject_id);
            return ReferenceFace::Unavailable("no identity document".to_string());
        }
        Err(e) => {
            warn!("Identity document lookup for subject {} failed: {}", subject_id, e);
            return ReferenceFace::Unavailable(e.to_string());
        }
    };

    let Some(path) = resolve_document_path(&engine.uploads_dir, &document.file_path) else {
        warn!(
            "Identity document {} has no usable file name: {:?}",
            document.id, document.file_path
        );
        return ReferenceFace::Unavailable("invalid document path".to_string());
    };
    let pipeline = Arc::clone(&engine.pipeline);
    match tokio::task::spawn_blocking(move || pipeline.face_match().load_reference(&path)).await {
        Ok(reference) => reference,
        Err(e) => ReferenceFace::Unavailable(format!("reference task failed: {}", e)),
    }
}

/// Stored paths may be URLs or absolute paths; only the file name is kept,
/// so the result always lies directly inside `uploads_dir`
fn resolve_document_path(uploads_dir: &Path, file_path: &str) -> Option<PathBuf> {
    let name = Path::new(file_path).file_name()?;
    Some(uploads_dir.join(name))
}
