//! Configuration loading and root folder resolution
//!
//! The pipeline service receives one explicit [`PipelineConfig`] at
//! construction; executors get resolved parameters from it and never
//! reach into ambient configuration themselves.

use crate::{Error, Result};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

/// Root folder resolution priority order:
/// 1. Explicit argument (highest priority)
/// 2. `SFA_ROOT_FOLDER` environment variable
/// 3. `root_folder` key in the TOML config file
/// 4. OS-dependent compiled default (fallback)
pub fn resolve_root_folder(explicit: Option<&str>) -> PathBuf {
    if let Some(path) = explicit {
        return PathBuf::from(path);
    }

    if let Ok(path) = std::env::var("SFA_ROOT_FOLDER") {
        if !path.is_empty() {
            return PathBuf::from(path);
        }
    }

    if let Ok(config_path) = default_config_file() {
        if let Ok(toml_content) = std::fs::read_to_string(&config_path) {
            if let Ok(value) = toml::from_str::<toml::Value>(&toml_content) {
                if let Some(root_folder) = value.get("root_folder").and_then(|v| v.as_str()) {
                    return PathBuf::from(root_folder);
                }
            }
        }
    }

    default_root_folder()
}

/// Default configuration file path for the platform
fn default_config_file() -> Result<PathBuf> {
    let user_config = dirs::config_dir().map(|d| d.join("sfa").join("config.toml"));
    if let Some(path) = user_config {
        if path.exists() {
            return Ok(path);
        }
    }
    let system_config = PathBuf::from("/etc/sfa/config.toml");
    if system_config.exists() {
        return Ok(system_config);
    }
    Err(Error::Config("No config file found".to_string()))
}

/// OS-dependent default root folder path
fn default_root_folder() -> PathBuf {
    dirs::data_local_dir()
        .map(|d| d.join("sfa"))
        .unwrap_or_else(|| PathBuf::from("./sfa_data"))
}

/// HTTP server settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    pub host: String,
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            host: "127.0.0.1".to_string(),
            port: 5740,
        }
    }
}

/// External helper tool locations
///
/// Each is an executable on PATH or an absolute path. The downloader and
/// analyzer speak line-delimited JSON on stdout; the separator reports
/// progress the same way.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ToolsConfig {
    pub downloader_bin: String,
    pub separator_bin: String,
    pub analyzer_bin: String,
}

impl Default for ToolsConfig {
    fn default() -> Self {
        Self {
            downloader_bin: "sfa-fetch".to_string(),
            separator_bin: "sfa-demucs".to_string(),
            analyzer_bin: "sfa-analyze".to_string(),
        }
    }
}

/// Cloud separation API settings
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CloudConfig {
    pub base_url: String,
    pub api_key: String,
    /// Delay between task status polls
    pub poll_interval_ms: u64,
    /// Overall deadline for the polling loop
    pub poll_timeout_secs: u64,
}

impl Default for CloudConfig {
    fn default() -> Self {
        Self {
            base_url: "https://api.audioshake.example".to_string(),
            api_key: String::new(),
            poll_interval_ms: 2_000,
            poll_timeout_secs: 900,
        }
    }
}

/// Durable work queue settings
///
/// The processing pool is capped low: each local separation worker holds
/// 2-4 GB of RAM while the model runs. Cloud workers are cheap locally
/// but share the same pool cap to respect remote rate/quota limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct QueueConfig {
    pub download_workers: usize,
    pub processing_workers: usize,
    pub analysis_workers: usize,
    /// Bounded delivery attempts per unit of work
    pub max_attempts: u32,
    /// Base for exponential retry backoff
    pub backoff_base_secs: u64,
    /// Lease considered abandoned after this long (crash recovery)
    pub lease_secs: u64,
    /// Idle poll interval for workers
    pub poll_interval_ms: u64,
}

impl Default for QueueConfig {
    fn default() -> Self {
        Self {
            download_workers: 4,
            processing_workers: 2,
            analysis_workers: 4,
            max_attempts: 3,
            backoff_base_secs: 5,
            lease_secs: 3_600,
            poll_interval_ms: 500,
        }
    }
}

/// Per-stage adapter timeouts, in seconds
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct TimeoutConfig {
    pub download_secs: u64,
    pub local_separation_secs: u64,
    pub analysis_secs: u64,
}

impl Default for TimeoutConfig {
    fn default() -> Self {
        Self {
            download_secs: 600,
            local_separation_secs: 1_800,
            analysis_secs: 300,
        }
    }
}

/// Defaults applied when a request omits stage options
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct DefaultsConfig {
    /// Default local separation model
    pub separation_model: String,
    /// Default download format
    pub download_format: String,
    /// Default download bitrate
    pub download_bitrate: String,
    /// Default analysis feature list
    pub analysis_features: Vec<String>,
    /// Batch fan-out concurrency ceiling
    pub batch_concurrency: usize,
}

impl Default for DefaultsConfig {
    fn default() -> Self {
        Self {
            separation_model: "htdemucs".to_string(),
            download_format: "mp3".to_string(),
            download_bitrate: "320k".to_string(),
            analysis_features: vec![
                "tempo".to_string(),
                "key".to_string(),
                "energy".to_string(),
            ],
            batch_concurrency: 2,
        }
    }
}

/// Full pipeline service configuration
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(default)]
pub struct PipelineConfig {
    pub server: ServerConfig,
    pub tools: ToolsConfig,
    pub cloud: CloudConfig,
    pub queue: QueueConfig,
    pub timeouts: TimeoutConfig,
    pub defaults: DefaultsConfig,
}

impl PipelineConfig {
    /// Load configuration from a TOML file; missing keys take defaults
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;
        toml::from_str(&content)
            .map_err(|e| Error::Config(format!("Failed to parse {}: {}", path.display(), e)))
    }

    /// Load `<root>/config.toml` when present, defaults otherwise
    pub fn load_or_default(root_folder: &Path) -> Self {
        let path = root_folder.join("config.toml");
        if path.exists() {
            match Self::load(&path) {
                Ok(config) => return config,
                Err(e) => {
                    tracing::warn!(error = %e, "Failed to load config file, using defaults");
                }
            }
        }
        Self::default()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_defaults() {
        let config = PipelineConfig::default();
        assert_eq!(config.queue.processing_workers, 2);
        assert_eq!(config.queue.max_attempts, 3);
        assert_eq!(config.defaults.separation_model, "htdemucs");
        assert_eq!(config.defaults.batch_concurrency, 2);
    }

    #[test]
    fn test_partial_toml_takes_defaults() {
        let toml_str = r#"
            [queue]
            processing_workers = 1

            [cloud]
            api_key = "secret"
        "#;
        let config: PipelineConfig = toml::from_str(toml_str).expect("parse");
        assert_eq!(config.queue.processing_workers, 1);
        assert_eq!(config.queue.download_workers, 4); // default
        assert_eq!(config.cloud.api_key, "secret");
        assert_eq!(config.timeouts.download_secs, 600); // default
    }

    #[test]
    fn test_load_missing_file_is_error() {
        let result = PipelineConfig::load(Path::new("/nonexistent/config.toml"));
        assert!(result.is_err());
    }

    #[test]
    fn test_load_or_default_without_file() {
        let dir = tempfile::tempdir().expect("tempdir");
        let config = PipelineConfig::load_or_default(dir.path());
        assert_eq!(config.server.port, 5740);
    }
}
