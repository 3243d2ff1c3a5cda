//! Error types for lvs-fusion
//!
//! Service-level errors use thiserror for clear propagation. Per-stage
//! failures inside the heavy pipeline have their own narrow types
//! ([`crate::frame::FrameDecodeError`], [`crate::models::ModelError`],
//! [`crate::pipeline::StageError`]) and are composed by the caller instead of
//! surfacing here.

use thiserror::Error;

/// Main error type for lvs-fusion
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration loading or validation errors
    #[error("Configuration error: {0}")]
    Config(String),

    /// Database connection or query errors
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    /// File I/O errors
    #[error("File I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// Upsert lost the insert race and the retry as update also failed
    #[error("Persistence conflict for meeting {meeting_code} subject {subject_id}: {detail}")]
    PersistenceConflict {
        meeting_code: String,
        subject_id: i64,
        detail: String,
    },
}

impl From<lvs_common::Error> for Error {
    fn from(err: lvs_common::Error) -> Self {
        match err {
            lvs_common::Error::Database(e) => Error::Database(e),
            lvs_common::Error::DatabaseDir { source, .. } => Error::Io(source),
            other => Error::Config(other.to_string()),
        }
    }
}

/// Convenience Result type using lvs-fusion Error
pub type Result<T> = std::result::Result<T, Error>;
