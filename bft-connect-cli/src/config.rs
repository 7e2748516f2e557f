//! Host Configuration
//!
//! Where the printer is, where uploads are stored, and where the transfer
//! settings live. Transfer settings are kept in their own TOML file and go
//! through [`TomlSettingsStore`].

use anyhow::{Context, Result};
use async_trait::async_trait;
use bft_connect_protocol::{
    EndpointParams, SettingsStore, TransferError, TransferSettings,
};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use tracing::{debug, info};

const CONFIG_FILE: &str = "config.toml";
const SETTINGS_FILE: &str = "settings.toml";

/// Host configuration
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Config {
    /// Printer connection
    pub device: DeviceConfig,

    /// Local storage standing in for the server's upload area
    pub storage: StorageConfig,

    /// Storage paths
    pub paths: PathConfig,
}

/// Printer connection
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DeviceConfig {
    /// Serial port
    #[serde(default = "default_port")]
    pub port: String,

    #[serde(default = "default_baudrate")]
    pub baudrate: u32,

    /// Whether the firmware reports binary file transfer support
    #[serde(default = "default_true")]
    pub reports_capability: bool,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StorageConfig {
    /// Root directory uploads are stored under
    pub root: PathBuf,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PathConfig {
    /// Directory holding this file
    pub config_dir: PathBuf,

    /// Transfer settings file
    pub settings_file: PathBuf,
}

fn default_port() -> String {
    "/dev/ttyACM0".to_string()
}

fn default_baudrate() -> u32 {
    250000
}

fn default_true() -> bool {
    true
}

impl Default for DeviceConfig {
    fn default() -> Self {
        Self {
            port: default_port(),
            baudrate: default_baudrate(),
            reports_capability: true,
        }
    }
}

impl Config {
    /// Default configuration rooted at `config_dir`
    pub fn with_config_dir(config_dir: PathBuf) -> Self {
        let data_dir = dirs::data_dir()
            .unwrap_or_else(|| PathBuf::from(".local/share"))
            .join("bft-connect");

        Self {
            device: DeviceConfig::default(),
            storage: StorageConfig {
                root: data_dir.join("uploads"),
            },
            paths: PathConfig {
                settings_file: config_dir.join(SETTINGS_FILE),
                config_dir,
            },
        }
    }

    pub fn default_dir() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from(".config"))
            .join("bft-connect")
    }

    /// Load from the user config directory, creating defaults if missing
    pub fn load() -> Result<Self> {
        Self::load_from(&Self::default_dir().join(CONFIG_FILE))
    }

    /// Load from `path`, creating a default file there if missing
    pub fn load_from(path: &Path) -> Result<Self> {
        if path.exists() {
            let contents = fs::read_to_string(path)
                .with_context(|| format!("Failed to read config file {}", path.display()))?;
            let config: Config =
                toml::from_str(&contents).context("Failed to parse config file")?;
            debug!("Loaded configuration from {}", path.display());
            Ok(config)
        } else {
            let config_dir = path
                .parent()
                .map(Path::to_path_buf)
                .unwrap_or_else(Self::default_dir);
            let config = Config::with_config_dir(config_dir);
            config.save_to(path)?;
            info!("Created default configuration at {}", path.display());
            Ok(config)
        }
    }

    /// Save configuration to `path`
    pub fn save_to(&self, path: &Path) -> Result<()> {
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent).context("Failed to create config directory")?;
        }
        let contents = toml::to_string_pretty(self).context("Failed to serialize config")?;
        fs::write(path, contents).context("Failed to write config file")?;
        Ok(())
    }

    /// Ensure all required directories exist
    pub fn ensure_directories(&self) -> Result<()> {
        fs::create_dir_all(&self.paths.config_dir).context("Failed to create config directory")?;
        fs::create_dir_all(&self.storage.root).context("Failed to create upload directory")?;
        Ok(())
    }

    pub fn endpoint(&self) -> EndpointParams {
        EndpointParams::new(self.device.port.clone(), self.device.baudrate)
    }
}

/// Transfer settings persisted as TOML
pub struct TomlSettingsStore {
    path: PathBuf,
}

impl TomlSettingsStore {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }
}

fn settings_error(action: &str, path: &Path, e: impl std::fmt::Display) -> TransferError {
    TransferError::Settings(format!("failed to {} {}: {}", action, path.display(), e))
}

#[async_trait]
impl SettingsStore for TomlSettingsStore {
    async fn load(&self) -> bft_connect_protocol::Result<TransferSettings> {
        match tokio::fs::read_to_string(&self.path).await {
            Ok(contents) => {
                toml::from_str(&contents).map_err(|e| settings_error("parse", &self.path, e))
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                debug!("No settings at {}, using defaults", self.path.display());
                Ok(TransferSettings::default())
            }
            Err(e) => Err(settings_error("read", &self.path, e)),
        }
    }

    async fn save(&self, settings: &TransferSettings) -> bft_connect_protocol::Result<()> {
        if let Some(parent) = self.path.parent() {
            tokio::fs::create_dir_all(parent)
                .await
                .map_err(|e| settings_error("create directory for", &self.path, e))?;
        }
        let contents = toml::to_string_pretty(settings)
            .map_err(|e| settings_error("serialize", &self.path, e))?;

        // Write aside and rename so a crash never leaves a torn file
        let staging = self.path.with_extension("toml.tmp");
        tokio::fs::write(&staging, contents)
            .await
            .map_err(|e| settings_error("write", &staging, e))?;
        tokio::fs::rename(&staging, &self.path)
            .await
            .map_err(|e| settings_error("replace", &self.path, e))?;
        Ok(())
    }
}
