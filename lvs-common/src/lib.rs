//! # LVS Common Library
//!
//! Shared code for the live verification service:
//! - Bootstrap configuration and named tunables
//! - Database schema and persisted row models
//! - Wire message types (inbound frames, outbound verification updates)
//! - Common error type

pub mod config;
#[cfg(feature = "sqlx")]
pub mod db;
pub mod error;
pub mod messages;

pub use config::Tunables;
pub use error::{Error, Result};
