//! Tests for configuration resolution and graceful degradation
//!
//! Tests that manipulate LVS_CONFIG are marked with #[serial] so they do not
//! race each other on the process environment.

use lvs_common::config::{resolve_config_path, TomlConfig, CONFIG_ENV_VAR};
use serial_test::serial;
use std::env;
use std::path::PathBuf;
use tempfile::TempDir;

#[test]
#[serial]
fn test_cli_argument_wins_over_environment() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let resolved = resolve_config_path(Some(PathBuf::from("/tmp/from-cli.toml").as_path()));
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-cli.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_environment_used_without_cli_argument() {
    env::set_var(CONFIG_ENV_VAR, "/tmp/from-env.toml");

    let resolved = resolve_config_path(None);
    assert_eq!(resolved, Some(PathBuf::from("/tmp/from-env.toml")));

    env::remove_var(CONFIG_ENV_VAR);
}

#[test]
#[serial]
fn test_missing_file_falls_back_to_defaults() {
    let dir = TempDir::new().unwrap();
    let missing = dir.path().join("absent.toml");

    let config = TomlConfig::load_or_default(Some(missing.as_path())).unwrap();
    assert_eq!(config.port, 8000);
    assert_eq!(config.tunables.chunk_size, 60);
}

#[test]
#[serial]
fn test_file_values_loaded() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(
        &path,
        r#"
        database_path = "/var/lib/lvs/test.db"
        port = 9001

        [logging]
        level = "debug"

        [tunables]
        deepfake_sensitivity = 1.0
        deepfake_latch = false

        [inference]
        endpoint = "http://127.0.0.1:8100"
        "#,
    )
    .unwrap();

    let config = TomlConfig::load_or_default(Some(path.as_path())).unwrap();
    assert_eq!(config.database_path, PathBuf::from("/var/lib/lvs/test.db"));
    assert_eq!(config.port, 9001);
    assert_eq!(config.logging.level, "debug");
    assert_eq!(config.tunables.deepfake_sensitivity, 1.0);
    assert!(!config.tunables.deepfake_latch);
    assert_eq!(
        config.inference.endpoint.as_deref(),
        Some("http://127.0.0.1:8100")
    );
}

#[test]
fn test_invalid_file_is_an_error() {
    let dir = TempDir::new().unwrap();
    let path = dir.path().join("config.toml");
    std::fs::write(&path, "port = \"not a number\"").unwrap();

    assert!(TomlConfig::load(&path).is_err());
}
