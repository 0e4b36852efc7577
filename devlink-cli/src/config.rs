//! Configuration file support for devlink.
//!
//! Configuration is loaded from multiple sources with the following priority (highest first):
//! 1. Command-line arguments
//! 2. Environment variables (DEVLINK_*)
//! 3. Local config file (./devlink.toml)
//! 4. Global config file (~/.config/devlink/config.toml)
//!
//! ```toml
//! [connection]
//! port = "/dev/ttyACM0"
//! baud = 115200
//! timeout_secs = 30
//!
//! [transfer]
//! chunk_size = 16000
//! ```

use devlink::protocol::MAX_CHUNK_SIZE;
use directories::ProjectDirs;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};

use crate::CliError;

/// Name of the per-project configuration file.
pub const LOCAL_CONFIG_FILE: &str = "devlink.toml";

/// Connection configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ConnectionConfig {
    /// Preferred serial port (e.g., "/dev/ttyACM0" or "COM3").
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub port: Option<String>,
    /// Default baud rate.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub baud: Option<u32>,
    /// Per-request response timeout in seconds.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub timeout_secs: Option<u64>,
}

/// File transfer configuration.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct TransferConfig {
    /// Bytes per write-data request.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub chunk_size: Option<usize>,
}

/// Main configuration structure.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct Config {
    /// Connection settings.
    #[serde(default)]
    pub connection: ConnectionConfig,
    /// Transfer settings.
    #[serde(default)]
    pub transfer: TransferConfig,
}

impl Config {
    /// Load configuration from all available sources.
    pub fn load() -> Self {
        let mut config = Self::default();

        // Load global config
        if let Some(global_path) = Self::global_config_path() {
            if let Some(global_config) = Self::load_from_file(&global_path) {
                debug!("Loaded global config from {}", global_path.display());
                config.merge(global_config);
            }
        }

        // Load local config (overrides global)
        if let Some(local_config) = Self::load_from_file(Path::new(LOCAL_CONFIG_FILE)) {
            debug!("Loaded local config from {LOCAL_CONFIG_FILE}");
            config.merge(local_config);
        }

        config
    }

    /// Load configuration from a specific file path (--config flag).
    pub fn load_from_path(path: &Path) -> Self {
        if let Some(config) = Self::load_from_file(path) {
            debug!("Loaded config from {}", path.display());
            config
        } else {
            warn!(
                "Could not load config from {}, using defaults",
                path.display()
            );
            Self::default()
        }
    }

    /// Load configuration from a specific file.
    fn load_from_file(path: &Path) -> Option<Self> {
        if !path.exists() {
            return None;
        }

        match fs::read_to_string(path) {
            Ok(content) => match toml::from_str(&content) {
                Ok(config) => Some(config),
                Err(e) => {
                    warn!("Failed to parse TOML in {}: {}", path.display(), e);
                    None
                },
            },
            Err(e) => {
                warn!("Failed to read config file {}: {}", path.display(), e);
                None
            },
        }
    }

    /// Get the global configuration directory.
    pub fn global_config_dir() -> Option<PathBuf> {
        ProjectDirs::from("", "", "devlink").map(|dirs| dirs.config_dir().to_path_buf())
    }

    /// Get the global configuration file path.
    pub fn global_config_path() -> Option<PathBuf> {
        Self::global_config_dir().map(|dir| dir.join("config.toml"))
    }

    /// Merge another config into this one.
    fn merge(&mut self, other: Self) {
        if other.connection.port.is_some() {
            self.connection.port = other.connection.port;
        }
        if other.connection.baud.is_some() {
            self.connection.baud = other.connection.baud;
        }
        if other.connection.timeout_secs.is_some() {
            self.connection.timeout_secs = other.connection.timeout_secs;
        }
        if other.transfer.chunk_size.is_some() {
            self.transfer.chunk_size = other.transfer.chunk_size;
        }
    }

    /// Reject values no session could run with.
    pub fn validate(&self) -> Result<(), CliError> {
        if self.connection.baud == Some(0) {
            return Err(CliError::Config("baud must be greater than 0".into()));
        }
        if self.connection.timeout_secs == Some(0) {
            return Err(CliError::Config(
                "timeout_secs must be greater than 0".into(),
            ));
        }
        match self.transfer.chunk_size {
            Some(0) => {
                return Err(CliError::Config(
                    "chunk_size must be greater than 0".into(),
                ));
            },
            Some(size) if size > MAX_CHUNK_SIZE => {
                return Err(CliError::Config(format!(
                    "chunk_size must be at most {MAX_CHUNK_SIZE} bytes (got {size})"
                )));
            },
            _ => {},
        }
        Ok(())
    }

    /// Remember `port` as the default port.
    ///
    /// Writes to the local config file if one exists, otherwise to the global
    /// one. Only the target file is rewritten; settings inherited from the
    /// other file are not copied into it.
    pub fn remember_port(&mut self, port: &str) -> anyhow::Result<PathBuf> {
        let path = if Path::new(LOCAL_CONFIG_FILE).exists() {
            PathBuf::from(LOCAL_CONFIG_FILE)
        } else if let Some(global_path) = Self::global_config_path() {
            if let Some(dir) = global_path.parent() {
                fs::create_dir_all(dir)?;
            }
            global_path
        } else {
            PathBuf::from(LOCAL_CONFIG_FILE)
        };

        Self::save_port_to(&path, port)?;
        self.connection.port = Some(port.to_string());
        info!("Saved port {port} to {}", path.display());

        Ok(path)
    }

    /// Set `[connection] port` in the file at `path`, keeping its other settings.
    fn save_port_to(path: &Path, port: &str) -> anyhow::Result<()> {
        let mut file_config = if path.exists() {
            toml::from_str(&fs::read_to_string(path)?)?
        } else {
            Self::default()
        };
        file_config.connection.port = Some(port.to_string());

        let content = toml::to_string_pretty(&file_config)?;
        fs::write(path, content)?;
        Ok(())
    }
}
