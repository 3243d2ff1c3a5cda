//! HTTP inference sidecar adapter
//!
//! Serves every model capability by POSTing PNG-encoded images to an external
//! inference service. The service advertises what it can do on
//! `GET /health`; capabilities it does not list stay unavailable for the life
//! of the process.
//!
//! Capability calls block the calling thread on the async client. They must
//! only be made from the blocking pool (`spawn_blocking`), which is where the
//! heavy pipeline and the fast path run them.

use super::{
    FaceComparator, FaceComparison, FaceCrop, FaceExtractor, FakeClassifier, HeadPose,
    HeadPoseEstimator, LandmarkDetector, Landmarks, ModelError, ModelSet, Point,
};
use crate::frame::Frame;
use base64::{engine::general_purpose::STANDARD, Engine as _};
use image::{ImageFormat, RgbImage};
use lvs_common::config::InferenceConfig;
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::io::Cursor;
use std::sync::Arc;
use std::time::Duration;
use tokio::runtime::Handle;
use tracing::{info, warn};

#[derive(Debug, Deserialize)]
struct HealthResponse {
    #[serde(default)]
    capabilities: Vec<String>,
}

#[derive(Serialize)]
struct ImageRequest<'a> {
    image: &'a str,
}

#[derive(Deserialize)]
struct LandmarksResponse {
    landmarks: Option<Vec<[f64; 2]>>,
}

#[derive(Serialize)]
struct HeadPoseRequest {
    landmarks: Vec<[f64; 2]>,
    width: u32,
    height: u32,
}

#[derive(Deserialize)]
struct FakeProbabilityResponse {
    probability: f64,
}

#[derive(Deserialize)]
struct ExtractFaceResponse {
    face: Option<String>,
}

#[derive(Serialize)]
struct CompareRequest<'a> {
    face_a: &'a str,
    face_b: &'a str,
}

/// Client for the inference sidecar
pub struct RemoteModels {
    client: reqwest::Client,
    endpoint: String,
    runtime: Handle,
}

impl RemoteModels {
    /// Probe the sidecar and build the capability set it serves
    ///
    /// Never fails: an unconfigured or unreachable sidecar yields a set with
    /// every capability unavailable.
    pub async fn connect(config: &InferenceConfig) -> ModelSet {
        let Some(endpoint) = config.endpoint.as_deref() else {
            warn!("No inference endpoint configured, all evaluators unavailable");
            return ModelSet::unavailable();
        };

        let client = match reqwest::Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
        {
            Ok(client) => client,
            Err(e) => {
                warn!("Failed to build inference client: {}", e);
                return ModelSet::unavailable();
            }
        };

        let endpoint = endpoint.trim_end_matches('/').to_string();
        let health: HealthResponse = match client
            .get(format!("{}/health", endpoint))
            .send()
            .await
            .and_then(|r| r.error_for_status())
        {
            Ok(response) => match response.json().await {
                Ok(health) => health,
                Err(e) => {
                    warn!("Inference sidecar returned unreadable health: {}", e);
                    return ModelSet::unavailable();
                }
            },
            Err(e) => {
                warn!("Inference sidecar unreachable at {}: {}", endpoint, e);
                return ModelSet::unavailable();
            }
        };

        let remote = Arc::new(RemoteModels {
            client,
            endpoint,
            runtime: Handle::current(),
        });
        let serves = |name: &str| health.capabilities.iter().any(|c| c == name);

        let mut models = ModelSet::unavailable();
        if serves("landmarks") {
            models.landmarks = Some(remote.clone() as Arc<dyn LandmarkDetector>);
        }
        if serves("head_pose") {
            models.head_pose = Some(remote.clone() as Arc<dyn HeadPoseEstimator>);
        }
        if serves("fake_classifier") {
            models.fake_classifier = Some(remote.clone() as Arc<dyn FakeClassifier>);
        }
        if serves("face_extractor") {
            models.face_extractor = Some(remote.clone() as Arc<dyn FaceExtractor>);
        }
        if serves("face_comparator") {
            models.face_comparator = Some(remote as Arc<dyn FaceComparator>);
        }

        info!("Inference capabilities: {:?}", models);
        models
    }

    fn post<Req, Resp>(&self, path: &str, body: &Req) -> Result<Resp, ModelError>
    where
        Req: Serialize + ?Sized,
        Resp: DeserializeOwned,
    {
        let url = format!("{}/{}", self.endpoint, path);
        self.runtime.block_on(async {
            let response = self
                .client
                .post(&url)
                .json(body)
                .send()
                .await
                .and_then(|r| r.error_for_status())
                .map_err(|e| ModelError::Inference(format!("{}: {}", path, e)))?;
            response
                .json::<Resp>()
                .await
                .map_err(|e| ModelError::InvalidOutput(format!("{}: {}", path, e)))
        })
    }
}

fn encode_png(image: &RgbImage) -> Result<String, ModelError> {
    let mut bytes = Vec::new();
    image
        .write_to(&mut Cursor::new(&mut bytes), ImageFormat::Png)
        .map_err(|e| ModelError::Inference(format!("png encode: {}", e)))?;
    Ok(STANDARD.encode(bytes))
}

fn decode_png(encoded: &str) -> Result<RgbImage, ModelError> {
    let bytes = STANDARD
        .decode(encoded)
        .map_err(|e| ModelError::InvalidOutput(format!("face base64: {}", e)))?;
    let image = image::load_from_memory(&bytes)
        .map_err(|e| ModelError::InvalidOutput(format!("face image: {}", e)))?;
    Ok(image.to_rgb8())
}

impl LandmarkDetector for RemoteModels {
    fn detect_landmarks(&self, frame: &Frame) -> Result<Option<Landmarks>, ModelError> {
        let image = encode_png(frame.image())?;
        let response: LandmarksResponse = self.post("landmarks", &ImageRequest { image: &image })?;
        response
            .landmarks
            .map(|raw| Landmarks::new(raw.into_iter().map(|[x, y]| Point::new(x, y)).collect()))
            .transpose()
    }
}

impl HeadPoseEstimator for RemoteModels {
    fn estimate_head_pose(
        &self,
        landmarks: &Landmarks,
        width: u32,
        height: u32,
    ) -> Result<HeadPose, ModelError> {
        let request = HeadPoseRequest {
            landmarks: landmarks.points().iter().map(|p| [p.x, p.y]).collect(),
            width,
            height,
        };
        self.post("head_pose", &request)
    }
}

impl FakeClassifier for RemoteModels {
    fn classify_fake_probability(&self, frame: &Frame) -> Result<f64, ModelError> {
        let image = encode_png(frame.image())?;
        let response: FakeProbabilityResponse =
            self.post("fake_probability", &ImageRequest { image: &image })?;
        if !(0.0..=1.0).contains(&response.probability) {
            return Err(ModelError::InvalidOutput(format!(
                "fake probability out of range: {}",
                response.probability
            )));
        }
        Ok(response.probability)
    }
}

impl FaceExtractor for RemoteModels {
    fn extract_face(&self, image: &RgbImage) -> Result<Option<FaceCrop>, ModelError> {
        let encoded = encode_png(image)?;
        let response: ExtractFaceResponse =
            self.post("extract_face", &ImageRequest { image: &encoded })?;
        response
            .face
            .map(|face| decode_png(&face).map(FaceCrop::new))
            .transpose()
    }
}

impl FaceComparator for RemoteModels {
    fn compare_faces(&self, a: &FaceCrop, b: &FaceCrop) -> Result<FaceComparison, ModelError> {
        let face_a = encode_png(&a.image)?;
        let face_b = encode_png(&b.image)?;
        self.post(
            "compare_faces",
            &CompareRequest {
                face_a: &face_a,
                face_b: &face_b,
            },
        )
    }
}
