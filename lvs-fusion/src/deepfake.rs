//! Deepfake aggregator
//!
//! Every frame of a chunk goes through the fake-probability classifier.
//! Frames the classifier fails on are skipped. The chunk score is the 90th
//! percentile of the collected probabilities, which ignores a single aberrant
//! frame but still reacts to a short spoof burst inside a mostly-real chunk.

use crate::frame::Frame;
use crate::models::FakeClassifier;
use crate::pipeline::StageError;
use std::sync::Arc;
use tracing::{debug, warn};

const CHUNK_QUANTILE: f64 = 0.9;

/// Outcome of aggregating one chunk
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DeepfakeChunk {
    /// Raw 90th-percentile probability
    pub score: f64,
    pub is_deepfake: bool,
    /// Score after the sensitivity scale; the value the session sees
    pub scaled_score: f64,
    /// Number of frames the classifier succeeded on
    pub frames_scored: usize,
}

impl DeepfakeChunk {
    /// Not fake, score 0, nothing scored
    pub fn neutral() -> Self {
        Self {
            score: 0.0,
            is_deepfake: false,
            scaled_score: 0.0,
            frames_scored: 0,
        }
    }

    /// True when no frame could be classified
    pub fn is_empty(&self) -> bool {
        self.frames_scored == 0
    }
}

/// Order statistic at `q`, taking the higher neighbour between ranks
///
/// `sorted[ceil(q * (n - 1))]`; None for an empty slice.
pub fn quantile_higher(values: &[f64], q: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut sorted = values.to_vec();
    sorted.sort_by(f64::total_cmp);
    let rank = (q.clamp(0.0, 1.0) * (sorted.len() - 1) as f64).ceil() as usize;
    Some(sorted[rank.min(sorted.len() - 1)])
}

#[derive(Clone)]
pub struct DeepfakeAggregator {
    classifier: Option<Arc<dyn FakeClassifier>>,
    threshold: f64,
    sensitivity: f64,
}

impl DeepfakeAggregator {
    pub fn new(classifier: Option<Arc<dyn FakeClassifier>>, threshold: f64, sensitivity: f64) -> Self {
        if classifier.is_none() {
            warn!("Fake classifier unavailable, deepfake will report unavailable");
        }
        Self {
            classifier,
            threshold,
            sensitivity,
        }
    }

    pub fn is_available(&self) -> bool {
        self.classifier.is_some()
    }

    /// Classify every frame and reduce to one chunk score
    pub fn aggregate(&self, frames: &[Frame]) -> Result<DeepfakeChunk, StageError> {
        let classifier = self
            .classifier
            .as_ref()
            .ok_or(StageError::Unavailable("fake classifier"))?;

        let mut probabilities = Vec::with_capacity(frames.len());
        for (index, frame) in frames.iter().enumerate() {
            match classifier.classify_fake_probability(frame) {
                Ok(p) => probabilities.push(p),
                Err(e) => warn!("Deepfake skipped frame {}: {}", index, e),
            }
        }

        Ok(self.reduce(&probabilities))
    }

    /// Reduce already-collected probabilities
    pub fn reduce(&self, probabilities: &[f64]) -> DeepfakeChunk {
        let Some(score) = quantile_higher(probabilities, CHUNK_QUANTILE) else {
            debug!("Deepfake chunk empty, neutral result");
            return DeepfakeChunk::neutral();
        };

        let chunk = DeepfakeChunk {
            score,
            is_deepfake: score > self.threshold,
            scaled_score: score * self.sensitivity,
            frames_scored: probabilities.len(),
        };
        debug!(
            "Deepfake chunk: p90={:.3} scaled={:.3} frames={} fake={}",
            chunk.score, chunk.scaled_score, chunk.frames_scored, chunk.is_deepfake
        );
        chunk
    }
}
