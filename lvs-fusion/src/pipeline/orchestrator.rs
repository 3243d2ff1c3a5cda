//! Heavy pass execution

use super::{ChunkOutcome, HeavyPermit};
use crate::deepfake::DeepfakeAggregator;
use crate::face_match::{FaceMatcher, ReferenceFace};
use crate::frame::Frame;
use crate::liveness::{Challenge, ChallengeRules, LivenessEvaluator};
use crate::models::{Availability, ModelSet};
use lvs_common::Tunables;
use std::sync::Arc;
use std::time::Instant;
use tracing::{debug, error};

/// The three heavy evaluators, shared by all sessions
pub struct HeavyPipeline {
    liveness: LivenessEvaluator,
    deepfake: DeepfakeAggregator,
    face_match: FaceMatcher,
}

impl HeavyPipeline {
    pub fn new(models: &ModelSet, tunables: &Tunables) -> Self {
        Self {
            liveness: LivenessEvaluator::new(
                models.landmarks.clone(),
                models.head_pose.clone(),
                ChallengeRules::from(tunables),
            ),
            deepfake: DeepfakeAggregator::new(
                models.fake_classifier.clone(),
                tunables.deepfake_threshold,
                tunables.deepfake_sensitivity,
            ),
            face_match: FaceMatcher::new(
                models.face_extractor.clone(),
                models.face_comparator.clone(),
                tunables.face_match_threshold,
            ),
        }
    }

    /// Liveness evaluator, also used ungated by the fast path
    pub fn liveness(&self) -> &LivenessEvaluator {
        &self.liveness
    }

    pub fn face_match(&self) -> &FaceMatcher {
        &self.face_match
    }

    pub fn availability(&self) -> Availability {
        Availability {
            liveness: self.liveness.is_available(),
            deepfake: self.deepfake.is_available(),
            face_match: self.face_match.is_available(),
        }
    }

    /// Availability as seen by a session performing `challenge`
    pub fn availability_for(&self, challenge: Challenge) -> Availability {
        Availability {
            liveness: self.liveness.supports(challenge),
            ..self.availability()
        }
    }

    /// Run one heavy pass on the blocking pool
    ///
    /// The permit moves into the blocking task, so the token stays held until
    /// inference actually finishes even if the calling session goes away.
    pub async fn run(
        self: &Arc<Self>,
        permit: HeavyPermit,
        chunk: Vec<Frame>,
        reference: Arc<ReferenceFace>,
        challenge: Challenge,
    ) -> ChunkOutcome {
        let pipeline = Arc::clone(self);
        let task = tokio::task::spawn_blocking(move || {
            let _permit = permit;
            pipeline.run_blocking(&chunk, &reference, challenge)
        });

        match task.await {
            Ok(outcome) => outcome,
            Err(e) => {
                error!("Heavy pass aborted: {}", e);
                ChunkOutcome::failed(e.to_string())
            }
        }
    }

    /// Evaluate a chunk on the current thread
    pub fn run_blocking(
        &self,
        chunk: &[Frame],
        reference: &ReferenceFace,
        challenge: Challenge,
    ) -> ChunkOutcome {
        let started = Instant::now();
        let outcome = ChunkOutcome {
            deepfake: self.deepfake.aggregate(chunk),
            liveness: self.liveness.evaluate_chunk(chunk, challenge),
            face_match: self.face_match.compare_chunk(reference, chunk),
        };
        debug!(
            "Heavy pass over {} frames took {} ms",
            chunk.len(),
            started.elapsed().as_millis()
        );
        outcome
    }
}
