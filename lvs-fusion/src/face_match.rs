//! Face-match evaluator
//!
//! One reference face per session, extracted once from the subject's newest
//! identity document. A failed extraction is final for the session. Each
//! chunk compares its last frame against the reference; any missing input
//! yields the fail-safe distance of 1.0.

use crate::frame::Frame;
use crate::models::{FaceComparator, FaceCrop, FaceExtractor};
use crate::pipeline::StageError;
use image::RgbImage;
use std::path::Path;
use std::sync::Arc;
use tracing::{debug, info, warn};

/// Worst-case distance reported whenever a comparison cannot be made
pub const FAIL_SAFE_DISTANCE: f64 = 1.0;

/// Session reference face, resolved once
#[derive(Debug, Clone)]
pub enum ReferenceFace {
    Ready(FaceCrop),
    Unavailable(String),
}

impl ReferenceFace {
    pub fn is_ready(&self) -> bool {
        matches!(self, ReferenceFace::Ready(_))
    }
}

/// Outcome of one chunk comparison
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct FaceMatchChunk {
    pub distance: f64,
    pub is_match: bool,
    /// False when the fail-safe distance was substituted
    pub compared: bool,
}

impl FaceMatchChunk {
    pub fn fail_safe() -> Self {
        Self {
            distance: FAIL_SAFE_DISTANCE,
            is_match: false,
            compared: false,
        }
    }
}

#[derive(Clone)]
pub struct FaceMatcher {
    extractor: Option<Arc<dyn FaceExtractor>>,
    comparator: Option<Arc<dyn FaceComparator>>,
    threshold: f64,
}

impl FaceMatcher {
    pub fn new(
        extractor: Option<Arc<dyn FaceExtractor>>,
        comparator: Option<Arc<dyn FaceComparator>>,
        threshold: f64,
    ) -> Self {
        if extractor.is_none() || comparator.is_none() {
            warn!("Face extractor or comparator unavailable, face match will report unavailable");
        }
        Self {
            extractor,
            comparator,
            threshold,
        }
    }

    pub fn is_available(&self) -> bool {
        self.extractor.is_some() && self.comparator.is_some()
    }

    pub fn is_match(&self, distance: f64) -> bool {
        distance <= self.threshold
    }

    /// Extract the reference face from a decoded document image
    pub fn extract_reference(&self, image: &RgbImage) -> ReferenceFace {
        let Some(extractor) = self.extractor.as_ref() else {
            return ReferenceFace::Unavailable("face extractor unavailable".to_string());
        };
        match extractor.extract_face(image) {
            Ok(Some(face)) => ReferenceFace::Ready(face),
            Ok(None) => ReferenceFace::Unavailable("no face in reference document".to_string()),
            Err(e) => ReferenceFace::Unavailable(format!("reference extraction failed: {}", e)),
        }
    }

    /// Read a document from disk and extract its face; blocking
    pub fn load_reference(&self, path: &Path) -> ReferenceFace {
        let reference = match image::open(path) {
            Ok(document) => self.extract_reference(&document.to_rgb8()),
            Err(e) => ReferenceFace::Unavailable(format!(
                "cannot read reference {}: {}",
                path.display(),
                e
            )),
        };
        match &reference {
            ReferenceFace::Ready(_) => info!("Reference face loaded from {}", path.display()),
            ReferenceFace::Unavailable(reason) => warn!("Reference face unavailable: {}", reason),
        }
        reference
    }

    /// Compare the chunk's last frame against the reference
    pub fn compare_chunk(
        &self,
        reference: &ReferenceFace,
        frames: &[Frame],
    ) -> Result<FaceMatchChunk, StageError> {
        let (Some(extractor), Some(comparator)) = (self.extractor.as_ref(), self.comparator.as_ref())
        else {
            return Err(StageError::Unavailable("face extractor/comparator"));
        };

        let ReferenceFace::Ready(reference) = reference else {
            return Ok(FaceMatchChunk::fail_safe());
        };
        let Some(snapshot) = frames.last() else {
            return Ok(FaceMatchChunk::fail_safe());
        };

        let live = match extractor.extract_face(snapshot.image()) {
            Ok(Some(face)) => face,
            Ok(None) => {
                debug!("No face in chunk snapshot, fail-safe distance");
                return Ok(FaceMatchChunk::fail_safe());
            }
            Err(e) => {
                warn!("Snapshot face extraction failed: {}", e);
                return Ok(FaceMatchChunk::fail_safe());
            }
        };

        match comparator.compare_faces(reference, &live) {
            Ok(comparison) => {
                let distance = comparison.distance.clamp(0.0, 1.0);
                Ok(FaceMatchChunk {
                    distance,
                    is_match: self.is_match(distance),
                    compared: true,
                })
            }
            Err(e) => {
                warn!("Face comparison failed: {}", e);
                Ok(FaceMatchChunk::fail_safe())
            }
        }
    }
}
