//! Errors raised while bootstrapping: configuration and database setup

use std::path::PathBuf;
use thiserror::Error;

pub type Result<T> = std::result::Result<T, Error>;

#[derive(Error, Debug)]
pub enum Error {
    /// Config file exists but could not be read
    #[error("Cannot read config {}: {source}", .path.display())]
    ConfigRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Invalid TOML: {0}")]
    ConfigParse(#[from] toml::de::Error),

    /// A tunable the engine cannot operate with
    #[error("Invalid tunable: {0}")]
    InvalidTunable(String),

    #[error("Cannot create database folder {}: {source}", .path.display())]
    DatabaseDir {
        path: PathBuf,
        source: std::io::Error,
    },

    #[cfg(feature = "sqlx")]
    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),
}
