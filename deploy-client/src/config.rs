//! Configuration management for the deploy client.
//!
//! Loads configuration from a TOML file; command-line flags override it.

use crate::archive::ArchiveKind;
use crate::delta::DeltaSettings;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub server: ServerConfig,
    #[serde(default)]
    pub deploy: DeployConfig,
    #[serde(default)]
    pub log: LogConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ServerConfig {
    /// Hosting API endpoint
    #[serde(default = "default_server_url")]
    pub url: String,

    #[serde(default)]
    pub api_key: String,

    #[serde(default)]
    pub secret: String,

    /// Response format requested from the API
    #[serde(default = "default_format")]
    pub format: String,

    #[serde(default = "default_api_version")]
    pub api_version: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeployConfig {
    /// Upload only what the hosting service does not already have
    #[serde(default = "default_delta")]
    pub delta: bool,

    /// Archive kinds eligible for delta upload
    #[serde(default = "default_delta_kinds")]
    pub delta_kinds: Vec<ArchiveKind>,

    /// Directory for synthesized delta archives (default: next to the archive)
    #[serde(default)]
    pub work_dir: Option<PathBuf>,

    /// Create the application if it does not exist yet
    #[serde(default)]
    pub create: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct LogConfig {
    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub level: String,
}

// Default values
fn default_server_url() -> String {
    "https://api.cloudbees.com/api".to_string()
}

fn default_format() -> String {
    "json".to_string()
}

fn default_api_version() -> String {
    "1.0".to_string()
}

fn default_delta() -> bool {
    true
}

fn default_delta_kinds() -> Vec<ArchiveKind> {
    vec![ArchiveKind::War]
}

fn default_log_level() -> String {
    "info".to_string()
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            url: default_server_url(),
            api_key: String::new(),
            secret: String::new(),
            format: default_format(),
            api_version: default_api_version(),
        }
    }
}

impl Default for DeployConfig {
    fn default() -> Self {
        Self {
            delta: default_delta(),
            delta_kinds: default_delta_kinds(),
            work_dir: None,
            create: false,
        }
    }
}

impl Default for LogConfig {
    fn default() -> Self {
        Self {
            level: default_log_level(),
        }
    }
}

impl DeployConfig {
    pub fn delta_settings(&self) -> DeltaSettings {
        DeltaSettings {
            delta_kinds: self.delta_kinds.clone(),
            work_dir: self.work_dir.clone(),
        }
    }
}

impl Config {
    /// Load configuration from a TOML file
    pub fn from_file(path: &Path) -> anyhow::Result<Self> {
        let content = std::fs::read_to_string(path)?;
        let config: Config = toml::from_str(&content)?;
        Ok(config)
    }
}
