//! Heavy-pipeline orchestration
//!
//! A heavy pass runs the deepfake aggregator, the liveness chunk path and the
//! face-match evaluator over one chunk, on the blocking pool, while holding
//! the process-wide [`HeavyGate`] token. Each stage reports its own typed
//! result; [`ChunkOutcome::result`] composes them into the [`ChunkResult`]
//! the session folds in, substituting neutral values for failed stages.

pub mod gate;
pub mod orchestrator;

pub use gate::{HeavyGate, HeavyPermit};
pub use orchestrator::HeavyPipeline;

use crate::deepfake::DeepfakeChunk;
use crate::face_match::{FaceMatchChunk, FAIL_SAFE_DISTANCE};
use crate::liveness::LivenessChunk;
use thiserror::Error;

/// Failure of one evaluator stage
#[derive(Debug, Clone, PartialEq, Error)]
pub enum StageError {
    /// Capability missing since process start
    #[error("{0} unavailable")]
    Unavailable(&'static str),

    /// The stage as a whole failed for this chunk
    #[error("stage failed: {0}")]
    Failed(String),
}

/// Per-stage outcome of one heavy pass
#[derive(Debug, Clone, PartialEq)]
pub struct ChunkOutcome {
    pub liveness: Result<LivenessChunk, StageError>,
    pub deepfake: Result<DeepfakeChunk, StageError>,
    pub face_match: Result<FaceMatchChunk, StageError>,
}

/// Composed result of one heavy pass
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChunkResult {
    /// Scaled chunk score
    pub deepfake_score: f64,
    /// Raw 90th-percentile score, before scaling
    pub deepfake_raw: f64,
    pub is_deepfake: bool,
    pub face_match_distance: f64,
    pub liveness_chunk_score: f64,
    pub liveness_chunk_passed: bool,
}

impl ChunkOutcome {
    /// Every stage failed, e.g. the blocking task died
    pub fn failed(reason: impl Into<String>) -> Self {
        let reason = reason.into();
        Self {
            liveness: Err(StageError::Failed(reason.clone())),
            deepfake: Err(StageError::Failed(reason.clone())),
            face_match: Err(StageError::Failed(reason)),
        }
    }

    /// Compose the stages, substituting neutral values for failures
    ///
    /// Neutral is: not fake with score 0, liveness 0 and not passed, and the
    /// fail-safe face distance.
    pub fn result(&self) -> ChunkResult {
        let liveness = self
            .liveness
            .as_ref()
            .copied()
            .unwrap_or_else(|_| LivenessChunk::neutral());
        let deepfake = self
            .deepfake
            .as_ref()
            .copied()
            .unwrap_or_else(|_| DeepfakeChunk::neutral());
        let face_match_distance = self
            .face_match
            .as_ref()
            .map(|f| f.distance)
            .unwrap_or(FAIL_SAFE_DISTANCE);

        ChunkResult {
            deepfake_score: deepfake.scaled_score,
            deepfake_raw: deepfake.score,
            is_deepfake: deepfake.is_deepfake,
            face_match_distance,
            liveness_chunk_score: liveness.score,
            liveness_chunk_passed: liveness.passed,
        }
    }
}
