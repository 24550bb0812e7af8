//! Tests for service configuration loading
//!
//! Covers:
//! - Missing TOML files yield defaults instead of failing startup
//! - ENV overrides beat TOML values
//! - Config path resolution priority (CLI → ENV → platform default)
//!
//! Note: Uses serial_test to prevent ENV variable race conditions.

use gpc_common::config::{
    database_path, load_toml_config, resolve_config_path, resolve_root_folder, write_toml_config,
    BlobStoreConfig, LoggingConfig, TomlConfig, DEFAULT_BIND_ADDRESS,
};
use serial_test::serial;
use std::collections::HashMap;
use std::env;
use std::path::{Path, PathBuf};
use tempfile::TempDir;

#[test]
fn test_missing_file_yields_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let config = load_toml_config(&temp_dir.path().join("absent.toml")).unwrap();

    assert_eq!(config, TomlConfig::default());
    assert_eq!(config.logging.level, "info");
    assert_eq!(config.workers.model_slots, 4);
    assert_eq!(config.bind_address(), DEFAULT_BIND_ADDRESS);
}

#[test]
fn test_write_then_load() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("nested").join("gpc-ml.toml");

    let config = TomlConfig {
        root_folder: Some(PathBuf::from("/srv/gpc")),
        bind_address: Some("0.0.0.0:9000".to_string()),
        logging: LoggingConfig {
            level: "gpc_ml=debug".to_string(),
        },
        blob_store: BlobStoreConfig {
            base_url: Some("http://blobs.local".to_string()),
            timeout_secs: 5,
        },
        ..Default::default()
    };

    write_toml_config(&config, &path).unwrap();
    let loaded = load_toml_config(&path).unwrap();

    assert_eq!(loaded, config);
    assert!(!path.with_extension("toml.tmp").exists());
}

#[test]
fn test_partial_file_fills_section_defaults() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gpc-ml.toml");
    std::fs::write(&path, "[scoring]\ndetector_url = \"http://det:8000\"\n").unwrap();

    let config = load_toml_config(&path).unwrap();

    assert_eq!(config.scoring.detector_url.as_deref(), Some("http://det:8000"));
    assert!(config.scoring.segmenter_url.is_none());
    assert_eq!(config.scoring.timeout_secs, 30);
    assert_eq!(config.blob_store.timeout_secs, 30);
}

#[test]
fn test_malformed_file_is_config_error() {
    let temp_dir = TempDir::new().unwrap();
    let path = temp_dir.path().join("gpc-ml.toml");
    std::fs::write(&path, "workers = [not toml").unwrap();

    let err = load_toml_config(&path).unwrap_err();
    assert!(matches!(err, gpc_common::Error::Config(_)));
}

#[test]
fn test_overrides_beat_toml() {
    let mut config = TomlConfig {
        root_folder: Some(PathBuf::from("/from/toml")),
        ..Default::default()
    };

    let vars: HashMap<&str, &str> = HashMap::from([
        ("GPC_ROOT_FOLDER", "/from/env"),
        ("GPC_BLOB_STORE_URL", "http://blob:9000"),
        ("GPC_SEGMENTER_URL", "   "),
    ]);
    config.apply_overrides(|name| vars.get(name).map(|v| v.to_string()));

    assert_eq!(config.root_folder, Some(PathBuf::from("/from/env")));
    assert_eq!(config.blob_store.base_url.as_deref(), Some("http://blob:9000"));
    // Blank values are ignored
    assert!(config.scoring.segmenter_url.is_none());
    assert_eq!(resolve_root_folder(&config), PathBuf::from("/from/env"));
    assert_eq!(database_path(Path::new("/from/env")), PathBuf::from("/from/env/gpc.db"));
}

#[test]
#[serial]
fn test_config_path_priority() {
    env::set_var("GPC_TEST_CONFIG", "/env/gpc-ml.toml");

    let cli = resolve_config_path(Some(Path::new("/cli/gpc-ml.toml")), "GPC_TEST_CONFIG", "gpc-ml");
    assert_eq!(cli, PathBuf::from("/cli/gpc-ml.toml"));

    let from_env = resolve_config_path(None, "GPC_TEST_CONFIG", "gpc-ml");
    assert_eq!(from_env, PathBuf::from("/env/gpc-ml.toml"));

    env::remove_var("GPC_TEST_CONFIG");
    let fallback = resolve_config_path(None, "GPC_TEST_CONFIG", "gpc-ml");
    assert!(fallback.to_string_lossy().ends_with("gpc-ml.toml"));
}
