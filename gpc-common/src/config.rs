//! Configuration loading and root folder resolution
//!
//! Service configuration is read from a TOML file and then overlaid with
//! environment variables. Pipeline tuning parameters live in the database
//! (see `gpc-ml`), not here.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::{debug, info};

/// Default HTTP bind address for the processing service
pub const DEFAULT_BIND_ADDRESS: &str = "127.0.0.1:5740";

/// Top-level TOML configuration file contents
#[derive(Debug, Clone, Default, Serialize, Deserialize, PartialEq)]
pub struct TomlConfig {
    /// Root folder holding the database (None = OS default)
    #[serde(default)]
    pub root_folder: Option<PathBuf>,

    /// HTTP bind address for the status surface
    #[serde(default)]
    pub bind_address: Option<String>,

    /// Logging configuration
    #[serde(default)]
    pub logging: LoggingConfig,

    /// External blob store endpoint
    #[serde(default)]
    pub blob_store: BlobStoreConfig,

    /// Neural scoring backend endpoints
    #[serde(default)]
    pub scoring: ScoringConfig,

    /// Worker slot configuration
    #[serde(default)]
    pub workers: WorkerConfig,
}

/// Logging section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct LoggingConfig {
    /// Default filter directive when RUST_LOG is unset (e.g. "info", "gpc_ml=debug")
    #[serde(default = "default_log_level")]
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

/// Blob store section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct BlobStoreConfig {
    /// Base URL; objects live at `{base_url}/{key}`
    #[serde(default)]
    pub base_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for BlobStoreConfig {
    fn default() -> Self {
        Self {
            base_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Scoring backend section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct ScoringConfig {
    /// Container segmentation model endpoint
    #[serde(default)]
    pub segmenter_url: Option<String>,

    /// Plant detection model endpoint
    #[serde(default)]
    pub detector_url: Option<String>,

    /// Per-request timeout in seconds
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
}

impl Default for ScoringConfig {
    fn default() -> Self {
        Self {
            segmenter_url: None,
            detector_url: None,
            timeout_secs: default_timeout_secs(),
        }
    }
}

/// Worker section
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq)]
pub struct WorkerConfig {
    /// Number of initialized scoring backend instances (concurrent worker slots)
    #[serde(default = "default_model_slots")]
    pub model_slots: usize,
}

impl Default for WorkerConfig {
    fn default() -> Self {
        Self {
            model_slots: default_model_slots(),
        }
    }
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_timeout_secs() -> u64 {
    30
}

fn default_model_slots() -> usize {
    4
}

impl TomlConfig {
    /// Apply environment variable overrides (ENV beats TOML)
    pub fn apply_env_overrides(&mut self) {
        self.apply_overrides(|name| std::env::var(name).ok());
    }

    /// Apply overrides from an arbitrary lookup (used by tests)
    pub fn apply_overrides<F>(&mut self, lookup: F)
    where
        F: Fn(&str) -> Option<String>,
    {
        let non_empty = |name: &str| lookup(name).filter(|v| !v.trim().is_empty());

        if let Some(root) = non_empty("GPC_ROOT_FOLDER") {
            self.root_folder = Some(PathBuf::from(root));
        }
        if let Some(addr) = non_empty("GPC_BIND_ADDRESS") {
            self.bind_address = Some(addr);
        }
        if let Some(url) = non_empty("GPC_BLOB_STORE_URL") {
            self.blob_store.base_url = Some(url);
        }
        if let Some(url) = non_empty("GPC_SEGMENTER_URL") {
            self.scoring.segmenter_url = Some(url);
        }
        if let Some(url) = non_empty("GPC_DETECTOR_URL") {
            self.scoring.detector_url = Some(url);
        }
    }

    /// Bind address, falling back to the compiled default
    pub fn bind_address(&self) -> &str {
        self.bind_address.as_deref().unwrap_or(DEFAULT_BIND_ADDRESS)
    }
}

/// Load a TOML config file; a missing file yields defaults
pub fn load_toml_config(path: &Path) -> Result<TomlConfig> {
    if !path.exists() {
        debug!("Config file {} not found, using defaults", path.display());
        return Ok(TomlConfig::default());
    }

    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read TOML failed: {}", e)))?;
    let config: TomlConfig = toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse TOML failed: {}", e)))?;

    info!("Loaded configuration from {}", path.display());
    Ok(config)
}

/// Write a TOML config file atomically (temp file + rename)
pub fn write_toml_config(config: &TomlConfig, path: &Path) -> Result<()> {
    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize TOML failed: {}", e)))?;

    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let tmp_path = path.with_extension("toml.tmp");
    std::fs::write(&tmp_path, content)?;
    std::fs::rename(&tmp_path, path)?;
    Ok(())
}

/// Config file path resolution:
/// 1. Command-line argument (highest priority)
/// 2. Environment variable
/// 3. `<config_dir>/gpc/<module>.toml`
pub fn resolve_config_path(
    cli_arg: Option<&Path>,
    env_var_name: &str,
    module_name: &str,
) -> PathBuf {
    if let Some(path) = cli_arg {
        return path.to_path_buf();
    }

    if let Ok(path) = std::env::var(env_var_name) {
        if !path.trim().is_empty() {
            return PathBuf::from(path);
        }
    }

    dirs::config_dir()
        .map(|d| d.join("gpc").join(format!("{}.toml", module_name)))
        .unwrap_or_else(|| PathBuf::from(format!("./{}.toml", module_name)))
}

/// Root folder resolution priority:
/// 1. Value from config (already overlaid with ENV)
/// 2. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(config: &TomlConfig) -> PathBuf {
    config
        .root_folder
        .clone()
        .unwrap_or_else(get_default_root_folder)
}

/// Get OS-dependent default root folder path
fn get_default_root_folder() -> PathBuf {
    if cfg!(target_os = "linux") {
        // ~/.local/share/gpc (or /var/lib/gpc for system-wide)
        dirs::data_local_dir()
            .map(|d| d.join("gpc"))
            .unwrap_or_else(|| PathBuf::from("/var/lib/gpc"))
    } else if cfg!(target_os = "macos") {
        dirs::data_dir()
            .map(|d| d.join("gpc"))
            .unwrap_or_else(|| PathBuf::from("/Library/Application Support/gpc"))
    } else if cfg!(target_os = "windows") {
        dirs::data_local_dir()
            .map(|d| d.join("gpc"))
            .unwrap_or_else(|| PathBuf::from("C:\\ProgramData\\gpc"))
    } else {
        PathBuf::from("./gpc_data")
    }
}

/// Database file inside the root folder
pub fn database_path(root_folder: &Path) -> PathBuf {
    root_folder.join("gpc.db")
}
