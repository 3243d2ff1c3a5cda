//! Bootstrap configuration and named tunables
//!
//! Configuration sources, highest priority first:
//! 1. Command-line arguments (parsed by the binary)
//! 2. Environment variables (`LVS_*`)
//! 3. TOML configuration file
//! 4. Compiled defaults
//!
//! A missing TOML file is not an error: a warning is logged and compiled
//! defaults are used. A TOML file that exists but fails to parse or validate
//! is a configuration error.

use crate::{Error, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use tracing::{info, warn};

/// Environment variable naming the TOML config file
pub const CONFIG_ENV_VAR: &str = "LVS_CONFIG";

/// Bootstrap configuration loaded from TOML
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct TomlConfig {
    /// SQLite database file
    pub database_path: PathBuf,

    /// Folder holding uploaded identity artifacts
    pub uploads_dir: PathBuf,

    /// Address the HTTP/WebSocket server binds to
    pub bind_addr: String,

    /// HTTP/WebSocket port
    pub port: u16,

    pub logging: LoggingConfig,
    pub tunables: Tunables,
    pub inference: InferenceConfig,
    pub geolocation: GeolocationConfig,
}

impl Default for TomlConfig {
    fn default() -> Self {
        let root = default_root_folder();
        Self {
            database_path: root.join("lvs.db"),
            uploads_dir: root.join("uploads"),
            bind_addr: "0.0.0.0".to_string(),
            port: 8000,
            logging: LoggingConfig::default(),
            tunables: Tunables::default(),
            inference: InferenceConfig::default(),
            geolocation: GeolocationConfig::default(),
        }
    }
}

/// Logging configuration
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct LoggingConfig {
    /// Log level (trace, debug, info, warn, error)
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// External inference sidecar serving the model capabilities
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct InferenceConfig {
    /// Base URL, e.g. `http://127.0.0.1:8100`. None = all models unavailable.
    pub endpoint: Option<String>,
    pub timeout_ms: u64,
}

impl Default for InferenceConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            timeout_ms: 30_000,
        }
    }
}

/// IP geolocation lookup (ipwho.is compatible)
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct GeolocationConfig {
    pub enabled: bool,
    pub endpoint: String,
    pub timeout_ms: u64,
}

impl Default for GeolocationConfig {
    fn default() -> Self {
        Self {
            enabled: false,
            endpoint: "https://ipwho.is".to_string(),
            timeout_ms: 3_000,
        }
    }
}

/// Named tunables of the fusion engine
///
/// Defaults are the values observed in production.
#[derive(Debug, Clone, PartialEq, Deserialize)]
#[serde(default)]
pub struct Tunables {
    /// Frames per chunk (C)
    pub chunk_size: usize,
    /// Window is discarded once it exceeds `chunk_size * overflow_multiplier`
    pub overflow_multiplier: usize,

    pub liveness_threshold: f64,
    pub deepfake_threshold: f64,
    pub face_match_threshold: f64,

    /// Scale applied to the raw chunk deepfake score before it reaches the session
    pub deepfake_sensitivity: f64,
    /// Latch a session-level rejection when any chunk is flagged as deepfake
    pub deepfake_latch: bool,

    pub blink_ear_cutoff: f64,
    /// Degrees
    pub head_turn_yaw_cutoff: f64,
    /// Degrees mapped to intensity 1.0
    pub head_turn_full_scale: f64,
    pub blink_min_run: usize,
    pub turn_min_run: usize,
    pub min_chunk_intensity: f64,
    pub chunk_sample_stride: usize,

    /// Fast-path downsample width (pixels)
    pub liveness_target_width: u32,
    /// Heavy-path downsample width (pixels)
    pub heavy_target_width: u32,

    /// Per-meeting broadcast buffer
    pub broadcast_capacity: usize,
}

impl Default for Tunables {
    fn default() -> Self {
        Self {
            chunk_size: 60,
            overflow_multiplier: 2,
            liveness_threshold: 0.40,
            deepfake_threshold: 0.50,
            face_match_threshold: 0.40,
            deepfake_sensitivity: 0.20,
            deepfake_latch: true,
            blink_ear_cutoff: 0.25,
            head_turn_yaw_cutoff: 15.0,
            head_turn_full_scale: 45.0,
            blink_min_run: 2,
            turn_min_run: 3,
            min_chunk_intensity: 0.60,
            chunk_sample_stride: 3,
            liveness_target_width: 720,
            heavy_target_width: 480,
            broadcast_capacity: 64,
        }
    }
}

impl Tunables {
    /// Window length beyond which a waiting window is discarded
    pub fn overflow_limit(&self) -> usize {
        self.chunk_size * self.overflow_multiplier
    }

    /// Reject values the engine cannot operate with
    pub fn validate(&self) -> Result<()> {
        if self.chunk_size == 0 {
            return Err(Error::InvalidTunable("chunk_size must be > 0".to_string()));
        }
        if self.overflow_multiplier == 0 {
            return Err(Error::InvalidTunable("overflow_multiplier must be >= 1".to_string()));
        }
        if self.chunk_sample_stride == 0 {
            return Err(Error::InvalidTunable("chunk_sample_stride must be > 0".to_string()));
        }
        if self.blink_min_run == 0 || self.turn_min_run == 0 {
            return Err(Error::InvalidTunable("minimum run lengths must be > 0".to_string()));
        }
        if self.head_turn_full_scale <= 0.0 {
            return Err(Error::InvalidTunable("head_turn_full_scale must be > 0".to_string()));
        }
        if self.broadcast_capacity == 0 {
            return Err(Error::InvalidTunable("broadcast_capacity must be > 0".to_string()));
        }
        for (name, value) in [
            ("liveness_threshold", self.liveness_threshold),
            ("deepfake_threshold", self.deepfake_threshold),
            ("face_match_threshold", self.face_match_threshold),
            ("min_chunk_intensity", self.min_chunk_intensity),
            ("blink_ear_cutoff", self.blink_ear_cutoff),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(Error::InvalidTunable(format!(
                    "{} must be within [0.0, 1.0], got {}",
                    name, value
                )));
            }
        }
        if !(self.deepfake_sensitivity > 0.0 && self.deepfake_sensitivity <= 1.0) {
            return Err(Error::InvalidTunable(format!(
                "deepfake_sensitivity must be within (0.0, 1.0], got {}",
                self.deepfake_sensitivity
            )));
        }
        Ok(())
    }
}

impl TomlConfig {
    /// Parse and validate a TOML config file
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|source| Error::ConfigRead {
            path: path.to_path_buf(),
            source,
        })?;
        Self::from_toml_str(&content)
    }

    /// Parse and validate TOML text
    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: TomlConfig = toml::from_str(content)?;
        config.tunables.validate()?;
        Ok(config)
    }

    /// Load the config file if one resolves, otherwise fall back to defaults
    pub fn load_or_default(cli_arg: Option<&Path>) -> Result<Self> {
        match resolve_config_path(cli_arg) {
            Some(path) if path.exists() => {
                info!("Loading configuration from {}", path.display());
                Self::load(&path)
            }
            Some(path) => {
                warn!(
                    "Config file {} not found, using compiled defaults",
                    path.display()
                );
                Ok(Self::default())
            }
            None => {
                warn!("No config file found, using compiled defaults");
                Ok(Self::default())
            }
        }
    }
}

/// Resolve the TOML config path: CLI argument, then `LVS_CONFIG`, then the
/// platform config directory (`~/.config/lvs/config.toml` on Linux).
pub fn resolve_config_path(cli_arg: Option<&Path>) -> Option<PathBuf> {
    if let Some(path) = cli_arg {
        return Some(path.to_path_buf());
    }

    if let Ok(path) = std::env::var(CONFIG_ENV_VAR) {
        if !path.is_empty() {
            return Some(PathBuf::from(path));
        }
    }

    dirs::config_dir()
        .map(|d| d.join("lvs").join("config.toml"))
        .filter(|p| p.exists())
}

/// OS-dependent default data folder
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("lvs"))
        .unwrap_or_else(|| PathBuf::from("./lvs_data"))
}
