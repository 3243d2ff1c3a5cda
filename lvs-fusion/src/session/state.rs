//! Per-session mutable state
//!
//! Owned by the session task and passed by `&mut`; nothing here is shared.
//! Displayed values feed every broadcast. The accumulator only matters at
//! finalize, where its means replace the last live values.

use super::fuser::{fuse, Scores, Thresholds, Verdict};
use crate::face_match::FAIL_SAFE_DISTANCE;
use crate::liveness::LivenessState;
use crate::models::Availability;
use crate::pipeline::{ChunkOutcome, ChunkResult};
use lvs_common::messages::{DeepfakeStatus, FaceMatchStatus, LivenessStatus, VerificationUpdate};
use lvs_common::Tunables;

/// Running sums over processed chunks
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct SessionAccumulator {
    deepfake_sum: f64,
    face_match_sum: f64,
    chunks: u32,
}

impl SessionAccumulator {
    pub fn add(&mut self, result: &ChunkResult) {
        self.deepfake_sum += result.deepfake_score;
        self.face_match_sum += result.face_match_distance;
        self.chunks += 1;
    }

    pub fn chunks(&self) -> u32 {
        self.chunks
    }

    /// (deepfake, face match) session means; None before the first chunk
    pub fn means(&self) -> Option<(f64, f64)> {
        if self.chunks == 0 {
            return None;
        }
        let n = self.chunks as f64;
        Some((self.deepfake_sum / n, self.face_match_sum / n))
    }
}

#[derive(Debug, Clone)]
pub struct SessionState {
    liveness: LivenessState,
    deepfake_score: f64,
    is_deepfake: bool,
    face_match_distance: f64,
    accumulator: SessionAccumulator,
    /// Highest raw score among chunks flagged as deepfake
    deepfake_peak: Option<f64>,
    latch_deepfake: bool,
    thresholds: Thresholds,
    availability: Availability,
    frames_decoded: u64,
}

impl SessionState {
    pub fn new(tunables: &Tunables, availability: Availability) -> Self {
        Self {
            liveness: LivenessState::default(),
            deepfake_score: 0.0,
            is_deepfake: false,
            face_match_distance: FAIL_SAFE_DISTANCE,
            accumulator: SessionAccumulator::default(),
            deepfake_peak: None,
            latch_deepfake: tunables.deepfake_latch,
            thresholds: Thresholds::from(tunables),
            availability,
            frames_decoded: 0,
        }
    }

    pub fn record_frame(&mut self) {
        self.frames_decoded += 1;
    }

    pub fn frames_decoded(&self) -> u64 {
        self.frames_decoded
    }

    pub fn confirmed(&self) -> bool {
        self.liveness.confirmed()
    }

    pub fn accumulator(&self) -> &SessionAccumulator {
        &self.accumulator
    }

    /// Fold in a fast-path instant score
    pub fn apply_instant(&mut self, score: f64) {
        self.liveness.record_score(score);
    }

    /// Fold in a heavy pass
    ///
    /// The accumulator always advances, with neutral values for failed
    /// stages. Displayed deepfake and face-match values only change for
    /// stages that produced a result.
    pub fn apply_chunk(&mut self, outcome: &ChunkOutcome) -> ChunkResult {
        let result = outcome.result();

        self.liveness
            .record_chunk(result.liveness_chunk_score, result.liveness_chunk_passed);

        if let Ok(deepfake) = &outcome.deepfake {
            self.deepfake_score = deepfake.scaled_score;
            self.is_deepfake = deepfake.is_deepfake;
            if deepfake.is_deepfake && self.latch_deepfake {
                let peak = self.deepfake_peak.map_or(deepfake.score, |p| p.max(deepfake.score));
                self.deepfake_peak = Some(peak);
            }
        }

        if let Ok(face_match) = &outcome.face_match {
            self.face_match_distance = face_match.distance;
        }

        self.accumulator.add(&result);
        result
    }

    /// Outbound status from the displayed values
    pub fn snapshot(&self) -> VerificationUpdate {
        VerificationUpdate {
            liveness: LivenessStatus {
                confirmed: self.liveness.confirmed(),
                score: self.liveness.display_score(),
                available: self.availability.liveness,
            },
            deepfake: DeepfakeStatus {
                is_deepfake: self.is_deepfake,
                score: self.deepfake_score,
                available: self.availability.deepfake,
            },
            face_match: FaceMatchStatus {
                distance: self.face_match_distance,
                is_match: self.face_match_distance <= self.thresholds.face_match,
                available: self.availability.face_match,
            },
        }
    }

    /// Verdict over the displayed values, persisted after each heavy pass
    pub fn live_verdict(&self) -> Verdict {
        let scores = Scores {
            liveness: self.liveness.display_score(),
            deepfake: self.deepfake_score,
            face_match: self.face_match_distance,
        };
        fuse(scores, &self.thresholds, self.deepfake_peak)
    }

    /// Authoritative verdict: session means once any chunk was processed
    pub fn final_verdict(&self) -> Verdict {
        let (deepfake, face_match) = self
            .accumulator
            .means()
            .unwrap_or((self.deepfake_score, self.face_match_distance));
        let scores = Scores {
            liveness: self.liveness.display_score(),
            deepfake,
            face_match,
        };
        fuse(scores, &self.thresholds, self.deepfake_peak)
    }
}
