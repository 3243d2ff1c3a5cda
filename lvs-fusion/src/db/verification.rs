//! Persistence gateway for verification records
//!
//! One record per (meeting, subject). A session keeps its own gateway so the
//! row id found or created by the first write is reused by every later one.
//!
//! Upsert order: cached id, then composite key, then insert. Two sessions
//! finalizing the same key can both miss the lookup; the loser's insert hits
//! the unique index, is rolled back and retried exactly once as an update.

use crate::error::{Error, Result};
use chrono::Utc;
use lvs_common::db::VerificationRecord;
use sqlx::SqlitePool;
use tracing::{debug, warn};

/// Values written by one upsert
#[derive(Debug, Clone, PartialEq)]
pub struct VerificationWrite {
    pub meeting_code: String,
    pub subject_id: i64,
    pub liveness_score: f64,
    pub deepfake_score: f64,
    pub face_match_score: f64,
    pub is_pass: bool,
    pub failure_reason: String,
    /// Unset client details never overwrite stored ones
    pub ip_address: Option<String>,
    pub latitude: Option<f64>,
    pub longitude: Option<f64>,
}

/// Per-session handle on the verification table
#[derive(Debug, Clone)]
pub struct VerificationGateway {
    pool: SqlitePool,
    cached_id: Option<i64>,
}

impl VerificationGateway {
    pub fn new(pool: SqlitePool) -> Self {
        Self {
            pool,
            cached_id: None,
        }
    }

    pub fn cached_id(&self) -> Option<i64> {
        self.cached_id
    }

    /// Write the record for this key, creating it if needed; returns its id
    pub async fn upsert(&mut self, write: &VerificationWrite) -> Result<i64> {
        if let Some(id) = self.cached_id {
            if self.update_by_id(id, write).await? {
                return Ok(id);
            }
            debug!("Cached verification row {} is gone, looking up by key", id);
            self.cached_id = None;
        }

        if let Some(id) = find_id(&self.pool, &write.meeting_code, write.subject_id).await? {
            self.update_by_id(id, write).await?;
            self.cached_id = Some(id);
            return Ok(id);
        }

        self.insert_or_update(write).await
    }

    /// Insert path of the upsert, with the one-shot retry on a lost race
    pub async fn insert_or_update(&mut self, write: &VerificationWrite) -> Result<i64> {
        let mut tx = self.pool.begin().await?;

        let inserted = sqlx::query(
            r#"
            INSERT INTO verification_results (
                meeting_code, subject_id,
                liveness_score, deepfake_score, face_match_score,
                is_pass, failure_reason,
                ip_address, latitude, longitude, updated_at
            ) VALUES (?, ?, ?, ?, ?, ?, ?, ?, ?, ?, ?)
            "#,
        )
        .bind(&write.meeting_code)
        .bind(write.subject_id)
        .bind(write.liveness_score)
        .bind(write.deepfake_score)
        .bind(write.face_match_score)
        .bind(write.is_pass)
        .bind(&write.failure_reason)
        .bind(&write.ip_address)
        .bind(write.latitude)
        .bind(write.longitude)
        .bind(Utc::now())
        .execute(&mut *tx)
        .await;

        match inserted {
            Ok(result) => {
                tx.commit().await?;
                let id = result.last_insert_rowid();
                debug!(
                    "Inserted verification row {} for {}/{}",
                    id, write.meeting_code, write.subject_id
                );
                self.cached_id = Some(id);
                Ok(id)
            }
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                tx.rollback().await?;
                warn!(
                    "Concurrent insert for {}/{}, retrying as update",
                    write.meeting_code, write.subject_id
                );
                match self.update_by_key(write).await {
                    Ok(Some(id)) => {
                        self.cached_id = Some(id);
                        Ok(id)
                    }
                    Ok(None) => Err(Error::PersistenceConflict {
                        meeting_code: write.meeting_code.clone(),
                        subject_id: write.subject_id,
                        detail: "row vanished after unique violation".to_string(),
                    }),
                    Err(e) => Err(Error::PersistenceConflict {
                        meeting_code: write.meeting_code.clone(),
                        subject_id: write.subject_id,
                        detail: e.to_string(),
                    }),
                }
            }
            Err(e) => {
                tx.rollback().await?;
                Err(e.into())
            }
        }
    }

    async fn update_by_id(&self, id: i64, write: &VerificationWrite) -> Result<bool> {
        let result = sqlx::query(
            r#"
            UPDATE verification_results
            SET liveness_score = ?, deepfake_score = ?, face_match_score = ?,
                is_pass = ?, failure_reason = ?,
                ip_address = COALESCE(?, ip_address),
                latitude = COALESCE(?, latitude),
                longitude = COALESCE(?, longitude),
                updated_at = ?
            WHERE id = ?
            "#,
        )
        .bind(write.liveness_score)
        .bind(write.deepfake_score)
        .bind(write.face_match_score)
        .bind(write.is_pass)
        .bind(&write.failure_reason)
        .bind(&write.ip_address)
        .bind(write.latitude)
        .bind(write.longitude)
        .bind(Utc::now())
        .bind(id)
        .execute(&self.pool)
        .await?;

        Ok(result.rows_affected() > 0)
    }

    async fn update_by_key(&self, write: &VerificationWrite) -> Result<Option<i64>> {
        let Some(id) = find_id(&self.pool, &write.meeting_code, write.subject_id).await? else {
            return Ok(None);
        };
        if self.update_by_id(id, write).await? {
            Ok(Some(id))
        } else {
            Ok(None)
        }
    }
}

async fn find_id(pool: &SqlitePool, meeting_code: &str, subject_id: i64) -> Result<Option<i64>> {
    let id = sqlx::query_scalar::<_, i64>(
        "SELECT id FROM verification_results WHERE meeting_code = ? AND subject_id = ?",
    )
    .bind(meeting_code)
    .bind(subject_id)
    .fetch_optional(pool)
    .await?;
    Ok(id)
}

/// Stored record for a (meeting, subject) pair
pub async fn get_verification(
    pool: &SqlitePool,
    meeting_code: &str,
    subject_id: i64,
) -> Result<Option<VerificationRecord>> {
    let record = sqlx::query_as::<_, VerificationRecord>(
        r#"
        SELECT id, meeting_code, subject_id,
               liveness_score, deepfake_score, face_match_score,
               is_pass, failure_reason, ip_address, latitude, longitude, updated_at
        FROM verification_results
        WHERE meeting_code = ? AND subject_id = ?
        "#,
    )
    .bind(meeting_code)
    .bind(subject_id)
    .fetch_optional(pool)
    .await?;
    Ok(record)
}
