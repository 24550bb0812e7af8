//! Service configuration resolution for gpc-ml
//!
//! The TOML file (already overlaid with environment variables) supplies
//! endpoints and the worker slot count. Pipeline tuning parameters are not
//! part of this: they live in the database settings table.

use gpc_common::config::{database_path, resolve_root_folder, TomlConfig};
use gpc_common::{Error, Result};
use std::net::SocketAddr;
use std::path::PathBuf;
use std::time::Duration;
use tracing::info;

/// Fully resolved service settings
#[derive(Debug, Clone, PartialEq)]
pub struct ServiceConfig {
    pub root_folder: PathBuf,
    pub database_path: PathBuf,
    pub bind_address: SocketAddr,
    pub blob_store_url: String,
    pub blob_timeout: Duration,
    pub segmenter_url: String,
    pub detector_url: String,
    pub scoring_timeout: Duration,
    pub model_slots: usize,
}

impl ServiceConfig {
    /// Validate and resolve; every endpoint must be set
    pub fn resolve(toml: &TomlConfig) -> Result<Self> {
        let root_folder = resolve_root_folder(toml);
        let bind_address: SocketAddr = toml
            .bind_address()
            .parse()
            .map_err(|e| {
                Error::Config(format!("Invalid bind address '{}': {}", toml.bind_address(), e))
            })?;

        let blob_store_url = required_url(
            toml.blob_store.base_url.as_deref(),
            "blob_store.base_url",
            "GPC_BLOB_STORE_URL",
        )?;
        let segmenter_url = required_url(
            toml.scoring.segmenter_url.as_deref(),
            "scoring.segmenter_url",
            "GPC_SEGMENTER_URL",
        )?;
        let detector_url = required_url(
            toml.scoring.detector_url.as_deref(),
            "scoring.detector_url",
            "GPC_DETECTOR_URL",
        )?;

        if toml.workers.model_slots == 0 {
            return Err(Error::Config("workers.model_slots must be at least 1".to_string()));
        }

        let config = Self {
            database_path: database_path(&root_folder),
            root_folder,
            bind_address,
            blob_store_url,
            blob_timeout: Duration::from_secs(toml.blob_store.timeout_secs.max(1)),
            segmenter_url,
            detector_url,
            scoring_timeout: Duration::from_secs(toml.scoring.timeout_secs.max(1)),
            model_slots: toml.workers.model_slots,
        };

        info!(
            root_folder = %config.root_folder.display(),
            bind_address = %config.bind_address,
            model_slots = config.model_slots,
            "Service configuration resolved"
        );
        Ok(config)
    }
}

fn required_url(value: Option<&str>, toml_key: &str, env_var: &str) -> Result<String> {
    let url = value.map(str::trim).filter(|v| !v.is_empty()).ok_or_else(|| {
        Error::Config(format!(
            "{} not configured. Set it in gpc-ml.toml or via {}",
            toml_key, env_var
        ))
    })?;

    if !(url.starts_with("http://") || url.starts_with("https://")) {
        return Err(Error::Config(format!("{} must be an http(s) URL, got '{}'", toml_key, url)));
    }
    Ok(url.trim_end_matches('/').to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn configured() -> TomlConfig {
        let mut toml = TomlConfig::default();
        toml.root_folder = Some(PathBuf::from("/tmp/gpc-test"));
        toml.blob_store.base_url = Some("http://blobs:9000/".to_string());
        toml.scoring.segmenter_url = Some("http://models:8001".to_string());
        toml.scoring.detector_url = Some("http://models:8002".to_string());
        toml
    }

    #[test]
    fn test_resolve_complete_config() {
        let config = ServiceConfig::resolve(&configured()).unwrap();
        assert_eq!(config.blob_store_url, "http://blobs:9000");
        assert_eq!(config.database_path, PathBuf::from("/tmp/gpc-test/gpc.db"));
        assert_eq!(config.bind_address.port(), 5740);
        assert_eq!(config.model_slots, 4);
    }

    #[test]
    fn test_missing_endpoint_is_config_error() {
        let mut toml = configured();
        toml.scoring.detector_url = None;
        let err = ServiceConfig::resolve(&toml).unwrap_err();
        assert!(err.to_string().contains("GPC_DETECTOR_URL"));
    }

    #[test]
    fn test_rejects_non_http_url_and_zero_slots() {
        let mut toml = configured();
        toml.blob_store.base_url = Some("ftp://blobs".to_string());
        assert!(ServiceConfig::resolve(&toml).is_err());

        let mut toml = configured();
        toml.workers.model_slots = 0;
        assert!(ServiceConfig::resolve(&toml).is_err());
    }

    #[test]
    fn test_env_override_fills_missing_url() {
        let mut toml = configured();
        toml.scoring.segmenter_url = None;
        toml.apply_overrides(|name| {
            (name == "GPC_SEGMENTER_URL").then(|| "https://seg".to_string())
        });
        let config = ServiceConfig::resolve(&toml).unwrap();
        assert_eq!(config.segmenter_url, "https://seg");
    }
}
