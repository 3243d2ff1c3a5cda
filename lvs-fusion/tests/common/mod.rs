//! Shared fixtures: deterministic models driven by frame pixel values
//!
//! Every frame is a uniform colour, so downsampling never changes it.
//! - red: EAR × 200 (0 = no face)
//! - green: fake probability × 100
//! - blue: face distance × 100 (255 = no face to extract)

#![allow(dead_code)]

use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, Rgb, RgbImage};
use lvs_common::db::init_database;
use lvs_common::Tunables;
use lvs_fusion::frame::Frame;
use lvs_fusion::geo::GeoLocator;
use lvs_fusion::models::{
    FaceComparator, FaceComparison, FaceCrop, FaceExtractor, FakeClassifier, HeadPose,
    HeadPoseEstimator, LandmarkDetector, Landmarks, ModelError, ModelSet, Point, LANDMARK_COUNT,
};
use lvs_fusion::FusionEngine;
use sqlx::SqlitePool;
use std::io::Cursor;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

pub const OPEN_EYES: f64 = 0.30;
pub const CLOSED_EYES: f64 = 0.10;

/// Colour of one frame
#[derive(Debug, Clone, Copy)]
pub struct Pixel {
    pub ear: f64,
    pub fake: f64,
    pub distance: f64,
}

impl Pixel {
    pub fn clean() -> Self {
        Self {
            ear: OPEN_EYES,
            fake: 0.1,
            distance: 0.1,
        }
    }

    pub fn rgb(&self) -> Rgb<u8> {
        Rgb([
            (self.ear * 200.0).round() as u8,
            (self.fake * 100.0).round() as u8,
            (self.distance * 100.0).round() as u8,
        ])
    }
}

pub fn image(pixel: Pixel) -> RgbImage {
    RgbImage::from_pixel(16, 12, pixel.rgb())
}

pub fn frame(pixel: Pixel) -> Frame {
    Frame::new(image(pixel))
}

/// Base64 PNG payload, optionally data-URL prefixed
pub fn payload(pixel: Pixel, data_url: bool) -> String {
    let mut bytes = Vec::new();
    image(pixel)
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .unwrap();
    let encoded = STANDARD.encode(bytes);
    if data_url {
        format!("data:image/png;base64,{}", encoded)
    } else {
        encoded
    }
}

pub fn frame_message(pixel: Pixel) -> String {
    serde_json::json!({ "type": "frame", "image": payload(pixel, true) }).to_string()
}

/// One chunk of frames with a clean blink in the middle
///
/// With stride 3 the closed-eye frames 30..42 sample as a run of four.
pub fn blink_chunk(chunk_size: usize, fake: f64, distance: f64) -> Vec<Pixel> {
    (0..chunk_size)
        .map(|i| Pixel {
            ear: if (30..42).contains(&i) { CLOSED_EYES } else { OPEN_EYES },
            fake,
            distance,
        })
        .collect()
}

/// Models reading their answers off the pixels, tracking heavy-pass overlap
#[derive(Default)]
pub struct PixelModels {
    in_flight: AtomicUsize,
    max_in_flight: AtomicUsize,
    classified: AtomicUsize,
    /// Per-classification delay, widens any overlap window
    pub delay: Option<Duration>,
}

impl PixelModels {
    pub fn slow(delay: Duration) -> Self {
        Self {
            delay: Some(delay),
            ..Self::default()
        }
    }

    pub fn max_in_flight(&self) -> usize {
        self.max_in_flight.load(Ordering::SeqCst)
    }

    pub fn classified(&self) -> usize {
        self.classified.load(Ordering::SeqCst)
    }
}

fn top_left(image: &RgbImage) -> Rgb<u8> {
    *image.get_pixel(0, 0)
}

impl LandmarkDetector for PixelModels {
    fn detect_landmarks(&self, frame: &Frame) -> Result<Option<Landmarks>, ModelError> {
        let red = top_left(frame.image())[0];
        if red == 0 {
            return Ok(None);
        }
        // EAR = h / 2 for this eye shape
        let h = 2.0 * (red as f64 / 200.0);
        let eye = [
            Point::new(0.0, 0.0),
            Point::new(1.0, -h),
            Point::new(3.0, -h),
            Point::new(4.0, 0.0),
            Point::new(3.0, h),
            Point::new(1.0, h),
        ];
        let mut points = vec![Point::new(0.0, 0.0); LANDMARK_COUNT];
        points[36..42].copy_from_slice(&eye);
        points[42..48].copy_from_slice(&eye);
        Landmarks::new(points).map(Some)
    }
}

impl HeadPoseEstimator for PixelModels {
    fn estimate_head_pose(
        &self,
        _landmarks: &Landmarks,
        _width: u32,
        _height: u32,
    ) -> Result<HeadPose, ModelError> {
        Ok(HeadPose {
            pitch: 0.0,
            yaw: 0.0,
            roll: 0.0,
        })
    }
}

impl FakeClassifier for PixelModels {
    fn classify_fake_probability(&self, frame: &Frame) -> Result<f64, ModelError> {
        let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.max_in_flight.fetch_max(now, Ordering::SeqCst);
        if let Some(delay) = self.delay {
            std::thread::sleep(delay);
        }
        self.classified.fetch_add(1, Ordering::SeqCst);
        self.in_flight.fetch_sub(1, Ordering::SeqCst);
        Ok(top_left(frame.image())[1] as f64 / 100.0)
    }
}

impl FaceExtractor for PixelModels {
    fn extract_face(&self, image: &RgbImage) -> Result<Option<FaceCrop>, ModelError> {
        if top_left(image)[2] == 255 {
            return Ok(None);
        }
        Ok(Some(FaceCrop::new(image.clone())))
    }
}

impl FaceComparator for PixelModels {
    fn compare_faces(&self, _a: &FaceCrop, b: &FaceCrop) -> Result<FaceComparison, ModelError> {
        Ok(FaceComparison {
            distance: top_left(&b.image)[2] as f64 / 100.0,
            verified: false,
            threshold: 0.4,
        })
    }
}

/// Scratch database and uploads folder
pub struct Harness {
    pub dir: TempDir,
    pub pool: SqlitePool,
    pub models: Arc<PixelModels>,
    pub engine: Arc<FusionEngine>,
}

impl Harness {
    pub async fn new(models: PixelModels) -> Self {
        Self::with_tunables(models, Tunables::default()).await
    }

    pub async fn with_tunables(models: PixelModels, tunables: Tunables) -> Self {
        Self::build(models, tunables, |set| set).await
    }

    /// Every capability except head pose
    pub async fn without_head_pose(models: PixelModels) -> Self {
        Self::build(models, Tunables::default(), |set| ModelSet {
            head_pose: None,
            ..set
        })
        .await
    }

    async fn build(
        models: PixelModels,
        tunables: Tunables,
        select: impl FnOnce(ModelSet) -> ModelSet,
    ) -> Self {
        let dir = TempDir::new().unwrap();
        let pool = init_database(&dir.path().join("lvs.db")).await.unwrap();
        let models = Arc::new(models);
        let engine = Arc::new(FusionEngine::new(
            &select(ModelSet::from_backend(models.clone())),
            tunables,
            pool.clone(),
            GeoLocator::disabled(),
            dir.path().join("uploads"),
        ));
        Self {
            dir,
            pool,
            models,
            engine,
        }
    }

    /// Store an identity document for a subject, recorded under its URL
    pub async fn add_document(&self, subject_id: i64, blue: u8) {
        let uploads = self.dir.path().join("uploads");
        std::fs::create_dir_all(&uploads).unwrap();
        RgbImage::from_pixel(16, 12, Rgb([60, 0, blue]))
            .save(uploads.join(format!("{}.png", subject_id)))
            .unwrap();

        self.add_document_row(subject_id, &format!("/uploads/{}.png", subject_id))
            .await;
    }

    pub async fn add_document_row(&self, subject_id: i64, file_path: &str) {
        sqlx::query("INSERT INTO identity_documents (subject_id, file_path, doc_type) VALUES (?, ?, 'passport')")
            .bind(subject_id)
            .bind(file_path)
            .execute(&self.pool)
            .await
            .unwrap();
    }

    pub async fn row_count(&self) -> i64 {
        sqlx::query_scalar("SELECT COUNT(*) FROM verification_results")
            .fetch_one(&self.pool)
            .await
            .unwrap()
    }
}
