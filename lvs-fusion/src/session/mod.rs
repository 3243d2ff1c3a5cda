//! Streaming sessions
//!
//! A session is one connection for one (meeting, subject) pair. It owns its
//! window and state; the only things it shares with other sessions are the
//! services bundled in [`FusionEngine`].

pub mod fuser;
pub mod registry;
pub mod runner;
pub mod state;

pub use fuser::{RejectReason, Thresholds, Verdict};
pub use registry::{MeetingRegistry, Membership, Subscription};
pub use runner::{Session, SessionKey};
pub use state::{SessionAccumulator, SessionState};

use crate::geo::GeoLocator;
use crate::liveness::Challenge;
use crate::models::{Availability, ModelSet};
use crate::pipeline::{HeavyGate, HeavyPipeline};
use lvs_common::Tunables;
use sqlx::SqlitePool;
use std::path::PathBuf;
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::info;

/// Process-wide services handed to every session
pub struct FusionEngine {
    pub pipeline: Arc<HeavyPipeline>,
    pub gate: HeavyGate,
    pub registry: MeetingRegistry,
    pub db: SqlitePool,
    pub tunables: Tunables,
    pub geo: GeoLocator,
    /// Folder identity documents are read from, by file name
    pub uploads_dir: PathBuf,
    /// Cancelled when the server stops; sessions stop reading and finalize
    pub shutdown_token: CancellationToken,
    /// Every running socket session
    pub sessions: TaskTracker,
}

impl FusionEngine {
    pub fn new(
        models: &ModelSet,
        tunables: Tunables,
        db: SqlitePool,
        geo: GeoLocator,
        uploads_dir: PathBuf,
    ) -> Self {
        Self {
            pipeline: Arc::new(HeavyPipeline::new(models, &tunables)),
            gate: HeavyGate::new(),
            registry: MeetingRegistry::new(tunables.broadcast_capacity),
            db,
            tunables,
            geo,
            uploads_dir,
            shutdown_token: CancellationToken::new(),
            sessions: TaskTracker::new(),
        }
    }

    /// Stop every tracked session and wait until each has finalized
    pub async fn shutdown(&self) {
        let open = self.sessions.len();
        if open > 0 {
            info!("Finalizing {} open sessions", open);
        }
        self.shutdown_token.cancel();
        self.sessions.close();
        self.sessions.wait().await;
    }

    pub fn availability(&self) -> Availability {
        self.pipeline.availability()
    }

    pub fn availability_for(&self, challenge: Challenge) -> Availability {
        self.pipeline.availability_for(challenge)
    }
}
