//! Decision fuser
//!
//! Pure pass/fail policy over three scores. Reasons are evaluated in a fixed
//! order (liveness, deepfake, face match) and independently of each other.

use lvs_common::Tunables;
use std::fmt;

#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Thresholds {
    /// Minimum liveness to pass
    pub liveness: f64,
    /// Maximum deepfake score to pass
    pub deepfake: f64,
    /// Maximum face distance to pass
    pub face_match: f64,
}

impl From<&Tunables> for Thresholds {
    fn from(t: &Tunables) -> Self {
        Self {
            liveness: t.liveness_threshold,
            deepfake: t.deepfake_threshold,
            face_match: t.face_match_threshold,
        }
    }
}

impl Default for Thresholds {
    fn default() -> Self {
        Self::from(&Tunables::default())
    }
}

/// Scores a verdict is computed from
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Scores {
    pub liveness: f64,
    pub deepfake: f64,
    pub face_match: f64,
}

#[derive(Debug, Clone, Copy, PartialEq)]
pub enum RejectReason {
    LivenessLow(f64),
    DeepfakeDetected(f64),
    /// A chunk was flagged even though the session mean stayed under threshold
    DeepfakePeak(f64),
    FaceMismatch(f64),
}

impl fmt::Display for RejectReason {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            RejectReason::LivenessLow(v) => write!(f, "Liveness Low ({:.2})", v),
            RejectReason::DeepfakeDetected(v) => write!(f, "Deepfake Detected ({:.2})", v),
            RejectReason::DeepfakePeak(v) => write!(f, "Deepfake Detected (peak {:.2})", v),
            RejectReason::FaceMismatch(v) => write!(f, "Face Mismatch ({:.2})", v),
        }
    }
}

#[derive(Debug, Clone, PartialEq)]
pub struct Verdict {
    pub scores: Scores,
    pub reasons: Vec<RejectReason>,
}

impl Verdict {
    pub fn is_pass(&self) -> bool {
        self.reasons.is_empty()
    }

    /// "NA" on pass, otherwise the reasons joined by ", "
    pub fn failure_reason(&self) -> String {
        if self.is_pass() {
            return "NA".to_string();
        }
        self.reasons
            .iter()
            .map(ToString::to_string)
            .collect::<Vec<_>>()
            .join(", ")
    }
}

/// Apply the pass policy
///
/// `deepfake_peak` is the latched raw score of a chunk flagged as deepfake,
/// if any; it rejects only when the mean itself does not.
pub fn fuse(scores: Scores, thresholds: &Thresholds, deepfake_peak: Option<f64>) -> Verdict {
    let mut reasons = Vec::new();

    if scores.liveness < thresholds.liveness {
        reasons.push(RejectReason::LivenessLow(scores.liveness));
    }

    if scores.deepfake > thresholds.deepfake {
        reasons.push(RejectReason::DeepfakeDetected(scores.deepfake));
    } else if let Some(peak) = deepfake_peak {
        reasons.push(RejectReason::DeepfakePeak(peak));
    }

    if scores.face_match > thresholds.face_match {
        reasons.push(RejectReason::FaceMismatch(scores.face_match));
    }

    Verdict { scores, reasons }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn scores(liveness: f64, deepfake: f64, face_match: f64) -> Scores {
        Scores {
            liveness,
            deepfake,
            face_match,
        }
    }

    #[test]
    fn test_clean_scores_pass() {
        let verdict = fuse(scores(1.0, 0.02, 0.1), &Thresholds::default(), None);
        assert!(verdict.is_pass());
        assert_eq!(verdict.failure_reason(), "NA");
    }

    #[test]
    fn test_boundaries_pass() {
        let verdict = fuse(scores(0.40, 0.50, 0.40), &Thresholds::default(), None);
        assert!(verdict.is_pass());
    }

    #[test]
    fn test_all_reasons_in_order() {
        let verdict = fuse(scores(0.12, 0.62, 0.55), &Thresholds::default(), None);
        assert!(!verdict.is_pass());
        assert_eq!(
            verdict.failure_reason(),
            "Liveness Low (0.12), Deepfake Detected (0.62), Face Mismatch (0.55)"
        );
    }

    #[test]
    fn test_reasons_not_short_circuited() {
        let verdict = fuse(scores(0.1, 0.0, 0.9), &Thresholds::default(), None);
        assert_eq!(
            verdict.reasons,
            vec![RejectReason::LivenessLow(0.1), RejectReason::FaceMismatch(0.9)]
        );
    }

    #[test]
    fn test_latched_peak_rejects() {
        let verdict = fuse(scores(1.0, 0.07, 0.1), &Thresholds::default(), Some(0.93));
        assert!(!verdict.is_pass());
        assert_eq!(verdict.failure_reason(), "Deepfake Detected (peak 0.93)");

        // Mean above threshold reports the mean only
        let verdict = fuse(scores(1.0, 0.7, 0.1), &Thresholds::default(), Some(0.93));
        assert_eq!(verdict.reasons, vec![RejectReason::DeepfakeDetected(0.7)]);
    }
}
