//! Model capability contracts
//!
//! The fusion engine orchestrates external models without knowing how they
//! work. Each capability is a synchronous trait object; implementations are
//! only ever invoked from the blocking pool, never from a session's async
//! loop.
//!
//! A capability that could not be loaded at process start is simply absent
//! from the [`ModelSet`]. Evaluators treat absence as a permanent
//! "unavailable" status rather than an error.

pub mod remote;

pub use remote::RemoteModels;

use crate::frame::Frame;
use image::RgbImage;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use thiserror::Error;

/// Number of points in the facial landmark layout
pub const LANDMARK_COUNT: usize = 68;

/// Per-call model failure
#[derive(Debug, Clone, Error)]
pub enum ModelError {
    #[error("inference failed: {0}")]
    Inference(String),

    #[error("invalid model output: {0}")]
    InvalidOutput(String),
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Point {
    pub x: f64,
    pub y: f64,
}

impl Point {
    pub fn new(x: f64, y: f64) -> Self {
        Self { x, y }
    }

    pub fn distance(&self, other: &Point) -> f64 {
        ((self.x - other.x).powi(2) + (self.y - other.y).powi(2)).sqrt()
    }
}

/// 68-point facial landmarks
///
/// Right eye occupies points 36..42, left eye 42..48, each listed
/// corner, top, top, corner, bottom, bottom.
#[derive(Debug, Clone, PartialEq)]
pub struct Landmarks {
    points: Vec<Point>,
}

impl Landmarks {
    pub fn new(points: Vec<Point>) -> Result<Self, ModelError> {
        if points.len() != LANDMARK_COUNT {
            return Err(ModelError::InvalidOutput(format!(
                "expected {} landmarks, got {}",
                LANDMARK_COUNT,
                points.len()
            )));
        }
        Ok(Self { points })
    }

    pub fn points(&self) -> &[Point] {
        &self.points
    }

    pub fn right_eye(&self) -> &[Point] {
        &self.points[36..42]
    }

    pub fn left_eye(&self) -> &[Point] {
        &self.points[42..48]
    }
}

/// Head orientation in degrees
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct HeadPose {
    pub pitch: f64,
    pub yaw: f64,
    pub roll: f64,
}

/// Cropped face image
#[derive(Debug, Clone)]
pub struct FaceCrop {
    pub image: Arc<RgbImage>,
}

impl FaceCrop {
    pub fn new(image: RgbImage) -> Self {
        Self {
            image: Arc::new(image),
        }
    }
}

/// Embedding comparator output
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct FaceComparison {
    pub distance: f64,
    /// Comparator's own judgment; the engine applies its own threshold instead
    pub verified: bool,
    pub threshold: f64,
}

pub trait LandmarkDetector: Send + Sync {
    /// Ok(None) when no face is present
    fn detect_landmarks(&self, frame: &Frame) -> Result<Option<Landmarks>, ModelError>;
}

pub trait HeadPoseEstimator: Send + Sync {
    fn estimate_head_pose(
        &self,
        landmarks: &Landmarks,
        width: u32,
        height: u32,
    ) -> Result<HeadPose, ModelError>;
}

pub trait FakeClassifier: Send + Sync {
    /// Probability in [0, 1] that the frame is synthetic
    fn classify_fake_probability(&self, frame: &Frame) -> Result<f64, ModelError>;
}

pub trait FaceExtractor: Send + Sync {
    /// Largest face in the image, Ok(None) when there is none
    fn extract_face(&self, image: &RgbImage) -> Result<Option<FaceCrop>, ModelError>;
}

pub trait FaceComparator: Send + Sync {
    fn compare_faces(&self, a: &FaceCrop, b: &FaceCrop) -> Result<FaceComparison, ModelError>;
}

/// Capabilities resolved at process start
#[derive(Clone, Default)]
pub struct ModelSet {
    pub landmarks: Option<Arc<dyn LandmarkDetector>>,
    pub head_pose: Option<Arc<dyn HeadPoseEstimator>>,
    pub fake_classifier: Option<Arc<dyn FakeClassifier>>,
    pub face_extractor: Option<Arc<dyn FaceExtractor>>,
    pub face_comparator: Option<Arc<dyn FaceComparator>>,
}

/// Which evaluators can produce evidence
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
pub struct Availability {
    pub liveness: bool,
    pub deepfake: bool,
    pub face_match: bool,
}

impl ModelSet {
    /// No capabilities at all; every evaluator reports unavailable
    pub fn unavailable() -> Self {
        Self::default()
    }

    /// Every capability served by the same implementation
    pub fn from_backend<B>(backend: Arc<B>) -> Self
    where
        B: LandmarkDetector
            + HeadPoseEstimator
            + FakeClassifier
            + FaceExtractor
            + FaceComparator
            + 'static,
    {
        Self {
            landmarks: Some(backend.clone() as Arc<dyn LandmarkDetector>),
            head_pose: Some(backend.clone() as Arc<dyn HeadPoseEstimator>),
            fake_classifier: Some(backend.clone() as Arc<dyn FakeClassifier>),
            face_extractor: Some(backend.clone() as Arc<dyn FaceExtractor>),
            face_comparator: Some(backend as Arc<dyn FaceComparator>),
        }
    }

    pub fn availability(&self) -> Availability {
        Availability {
            liveness: self.landmarks.is_some(),
            deepfake: self.fake_classifier.is_some(),
            face_match: self.face_extractor.is_some() && self.face_comparator.is_some(),
        }
    }
}

impl std::fmt::Debug for ModelSet {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ModelSet")
            .field("landmarks", &self.landmarks.is_some())
            .field("head_pose", &self.head_pose.is_some())
            .field("fake_classifier", &self.fake_classifier.is_some())
            .field("face_extractor", &self.face_extractor.is_some())
            .field("face_comparator", &self.face_comparator.is_some())
            .finish()
    }
}
