//! Liveness evaluator
//!
//! Two tiers:
//! - **Fast path**, every frame until the session is confirmed: eye landmarks
//!   on a downsampled frame, instant score `max(0, 1 - EAR)`. Exempt from the
//!   heavy-pipeline gate.
//! - **Chunk path**, inside a heavy pass: every `stride`-th frame is checked
//!   against the active challenge. Runs of consecutive passing frames that
//!   reach the challenge's minimum length count as one completed action;
//!   passing frames contribute a normalized intensity. A chunk passes when at
//!   least one action completed and the mean intensity reaches the minimum.

use crate::frame::Frame;
use crate::models::{HeadPoseEstimator, LandmarkDetector, Landmarks, Point};
use crate::pipeline::StageError;
use lvs_common::Tunables;
use serde::{Deserialize, Serialize};
use std::str::FromStr;
use std::sync::Arc;
use tracing::{debug, warn};

/// Challenge the subject is asked to perform
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Challenge {
    #[default]
    Blink,
    TurnLeft,
    TurnRight,
}

impl FromStr for Challenge {
    type Err = String;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "blink" => Ok(Challenge::Blink),
            "turn_left" => Ok(Challenge::TurnLeft),
            "turn_right" => Ok(Challenge::TurnRight),
            other => Err(format!("unknown challenge: {}", other)),
        }
    }
}

/// Eye aspect ratio of one eye (six points, corner-top-top-corner-bottom-bottom)
///
/// None for a degenerate eye with no horizontal extent.
pub fn eye_aspect_ratio(eye: &[Point]) -> Option<f64> {
    if eye.len() != 6 {
        return None;
    }
    let vertical_1 = eye[1].distance(&eye[5]);
    let vertical_2 = eye[2].distance(&eye[4]);
    let horizontal = eye[0].distance(&eye[3]);
    if horizontal <= f64::EPSILON {
        return None;
    }
    Some((vertical_1 + vertical_2) / (2.0 * horizontal))
}

/// Mean EAR of both eyes
pub fn average_ear(landmarks: &Landmarks) -> Option<f64> {
    let left = eye_aspect_ratio(landmarks.left_eye())?;
    let right = eye_aspect_ratio(landmarks.right_eye())?;
    Some((left + right) / 2.0)
}

/// Fast-path score for one frame
pub fn instant_score(ear: f64) -> f64 {
    (1.0 - ear).max(0.0)
}

/// Challenge thresholds, taken from the tunables
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct ChallengeRules {
    pub blink_ear_cutoff: f64,
    pub yaw_cutoff: f64,
    pub yaw_full_scale: f64,
    pub blink_min_run: usize,
    pub turn_min_run: usize,
    pub min_intensity: f64,
    pub sample_stride: usize,
}

impl From<&Tunables> for ChallengeRules {
    fn from(t: &Tunables) -> Self {
        Self {
            blink_ear_cutoff: t.blink_ear_cutoff,
            yaw_cutoff: t.head_turn_yaw_cutoff,
            yaw_full_scale: t.head_turn_full_scale,
            blink_min_run: t.blink_min_run,
            turn_min_run: t.turn_min_run,
            min_intensity: t.min_chunk_intensity,
            sample_stride: t.chunk_sample_stride,
        }
    }
}

impl Default for ChallengeRules {
    fn default() -> Self {
        Self::from(&Tunables::default())
    }
}

impl ChallengeRules {
    fn min_run(&self, challenge: Challenge) -> usize {
        match challenge {
            Challenge::Blink => self.blink_min_run,
            Challenge::TurnLeft | Challenge::TurnRight => self.turn_min_run,
        }
    }

    /// Intensity of a frame satisfying the challenge, None if it does not
    ///
    /// `metric` is EAR for blink, yaw in degrees for turns.
    fn intensity(&self, challenge: Challenge, metric: f64) -> Option<f64> {
        match challenge {
            Challenge::Blink if metric < self.blink_ear_cutoff => Some(instant_score(metric)),
            Challenge::TurnLeft if metric > self.yaw_cutoff => {
                Some((metric.abs() / self.yaw_full_scale).clamp(0.0, 1.0))
            }
            Challenge::TurnRight if metric < -self.yaw_cutoff => {
                Some((metric.abs() / self.yaw_full_scale).clamp(0.0, 1.0))
            }
            _ => None,
        }
    }
}

/// Outcome of the chunk path
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LivenessChunk {
    pub action_count: usize,
    /// Mean intensity of passing frames, 0 when none passed
    pub score: f64,
    pub passed: bool,
}

impl LivenessChunk {
    /// Substitute for a failed or unavailable chunk evaluation
    pub fn neutral() -> Self {
        Self {
            action_count: 0,
            score: 0.0,
            passed: false,
        }
    }
}

/// Per-chunk challenge bookkeeping
///
/// Fresh for every chunk; only the session's confirmation survives a chunk.
#[derive(Debug, Clone)]
pub struct ChallengeTracker {
    challenge: Challenge,
    rules: ChallengeRules,
    consecutive_run: usize,
    action_count: usize,
    active_scores: Vec<f64>,
}

impl ChallengeTracker {
    pub fn new(challenge: Challenge, rules: ChallengeRules) -> Self {
        Self {
            challenge,
            rules,
            consecutive_run: 0,
            action_count: 0,
            active_scores: Vec::new(),
        }
    }

    /// Feed one sampled frame's metric
    pub fn observe(&mut self, metric: f64) {
        match self.rules.intensity(self.challenge, metric) {
            Some(intensity) => {
                self.consecutive_run += 1;
                self.active_scores.push(intensity);
            }
            None => self.close_run(),
        }
    }

    fn close_run(&mut self) {
        if self.consecutive_run >= self.rules.min_run(self.challenge) {
            self.action_count += 1;
        }
        self.consecutive_run = 0;
    }

    pub fn action_count(&self) -> usize {
        self.action_count
    }

    pub fn active_scores(&self) -> &[f64] {
        &self.active_scores
    }

    /// Flush any open run and produce the chunk result
    pub fn finish(mut self) -> LivenessChunk {
        self.close_run();
        let score = if self.active_scores.is_empty() {
            0.0
        } else {
            self.active_scores.iter().sum::<f64>() / self.active_scores.len() as f64
        };
        LivenessChunk {
            action_count: self.action_count,
            score,
            passed: self.action_count > 0 && score >= self.rules.min_intensity,
        }
    }
}

/// Session-level liveness: monotonic confirmation plus running-max score
#[derive(Debug, Clone, Copy, Default, PartialEq)]
pub struct LivenessState {
    confirmed: bool,
    peak_score: f64,
}

impl LivenessState {
    pub fn confirmed(&self) -> bool {
        self.confirmed
    }

    pub fn peak_score(&self) -> f64 {
        self.peak_score
    }

    /// Fold in an instant or chunk score; the peak never decreases
    pub fn record_score(&mut self, score: f64) {
        if score > self.peak_score {
            self.peak_score = score;
        }
    }

    /// Fold in a chunk result; confirmation is write-once
    pub fn record_chunk(&mut self, score: f64, passed: bool) {
        self.record_score(score);
        if passed {
            self.confirmed = true;
        }
    }

    /// Displayed value: 1.0 once confirmed, else the running max
    pub fn display_score(&self) -> f64 {
        if self.confirmed {
            1.0
        } else {
            self.peak_score
        }
    }
}

/// Liveness evaluator over the landmark and head-pose capabilities
#[derive(Clone)]
pub struct LivenessEvaluator {
    detector: Option<Arc<dyn LandmarkDetector>>,
    head_pose: Option<Arc<dyn HeadPoseEstimator>>,
    rules: ChallengeRules,
}

impl LivenessEvaluator {
    pub fn new(
        detector: Option<Arc<dyn LandmarkDetector>>,
        head_pose: Option<Arc<dyn HeadPoseEstimator>>,
        rules: ChallengeRules,
    ) -> Self {
        if detector.is_none() {
            warn!("Landmark detector unavailable, liveness will report unavailable");
        }
        Self {
            detector,
            head_pose,
            rules,
        }
    }

    pub fn is_available(&self) -> bool {
        self.detector.is_some()
    }

    /// Whether chunks for `challenge` can be scored at all
    ///
    /// Head turns need the pose estimator on top of the landmark detector.
    pub fn supports(&self, challenge: Challenge) -> bool {
        match challenge {
            Challenge::Blink => self.detector.is_some(),
            Challenge::TurnLeft | Challenge::TurnRight => {
                self.detector.is_some() && self.head_pose.is_some()
            }
        }
    }

    /// Fast path: instant score for one (already downsampled) frame
    ///
    /// Ok(None) when no face was found.
    pub fn fast_check(&self, frame: &Frame) -> Result<Option<f64>, StageError> {
        let detector = self
            .detector
            .as_ref()
            .ok_or(StageError::Unavailable("landmark detector"))?;
        let landmarks = detector
            .detect_landmarks(frame)
            .map_err(|e| StageError::Failed(e.to_string()))?;
        Ok(landmarks.as_ref().and_then(average_ear).map(instant_score))
    }

    /// Chunk path over every `stride`-th frame
    pub fn evaluate_chunk(
        &self,
        frames: &[Frame],
        challenge: Challenge,
    ) -> Result<LivenessChunk, StageError> {
        let detector = self
            .detector
            .as_ref()
            .ok_or(StageError::Unavailable("landmark detector"))?;
        let head_pose = match challenge {
            Challenge::Blink => None,
            Challenge::TurnLeft | Challenge::TurnRight => Some(
                self.head_pose
                    .as_ref()
                    .ok_or(StageError::Unavailable("head pose estimator"))?,
            ),
        };

        let mut tracker = ChallengeTracker::new(challenge, self.rules);
        let stride = self.rules.sample_stride.max(1);

        for (index, frame) in frames.iter().enumerate().step_by(stride) {
            let landmarks = match detector.detect_landmarks(frame) {
                Ok(Some(landmarks)) => landmarks,
                // No face: frame does not count either way
                Ok(None) => continue,
                Err(e) => {
                    warn!("Liveness skipped frame {}: {}", index, e);
                    continue;
                }
            };

            let metric = match head_pose {
                None => average_ear(&landmarks),
                Some(estimator) => {
                    match estimator.estimate_head_pose(&landmarks, frame.width(), frame.height()) {
                        Ok(pose) => Some(pose.yaw),
                        Err(e) => {
                            warn!("Head pose failed on frame {}: {}", index, e);
                            None
                        }
                    }
                }
            };

            if let Some(metric) = metric {
                tracker.observe(metric);
            }
        }

        let chunk = tracker.finish();
        debug!(
            "Liveness chunk ({:?}): actions={} score={:.3} passed={}",
            challenge, chunk.action_count, chunk.score, chunk.passed
        );
        Ok(chunk)
    }
}
