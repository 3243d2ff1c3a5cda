//! Database models

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Persisted verdict for one (meeting, subject) pair
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct VerificationRecord {
    pub id: i64,
    pub meeting_code: String,
    pub subject_id: i64,
    pub liveness_score: Option<f64>,
    pub deepfake_score: Option<f64>,
    pub face_match_score: Option<f64>,
    pub is_pass: bool,
    pub failure_reason: Option<String>,
    pub ip_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
    pub updated_at: DateTime<Utc>,
}

/// Uploaded identity artifact (passport scan, ID card photo, ...)
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize, sqlx::FromRow)]
pub struct IdentityDocument {
    pub id: i64,
    pub subject_id: i64,
    pub file_path: String,
    pub doc_type: String,
    pub uploaded_at: DateTime<Utc>,
}
