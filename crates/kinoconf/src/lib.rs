//! Minimal configuration loading for Kinoscope.
//!
//! Two small sections:
//!
//! - **Server** (`[server]`): where the HTTP front end binds. A `bind`
//!   value starting with `/` is a Unix socket path and `port` is ignored.
//! - **Camera** (`[camera]`): which device to capture from and whether
//!   capture is on-demand (runs only while someone is watching) or
//!   always-on.
//!
//! # Config File Locations
//!
//! Files are loaded in order (later wins):
//! 1. `/etc/kinoscope/config.toml` (system)
//! 2. `~/.config/kinoscope/config.toml` (user)
//! 3. `./kinoscope.toml` (local override, or a CLI-provided path)
//! 4. Environment variables (`KINOSCOPE_*`)
//!
//! # Example Config
//!
//! ```toml
//! [server]
//! bind = "127.0.0.1"
//! port = 10101
//!
//! [camera]
//! device = "0"
//! on_demand = true
//! ```

pub mod loader;

pub use loader::{discover_config_files, discover_config_files_with_override, ConfigSources};

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use thiserror::Error;

/// Configuration loading errors.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("Failed to read config file {path}: {source}")]
    FileRead {
        path: PathBuf,
        source: std::io::Error,
    },

    #[error("Failed to parse config file {path}: {message}")]
    Parse { path: PathBuf, message: String },

    #[error("Invalid value {value:?} for {var}")]
    EnvParse { var: String, value: String },
}

/// Complete Kinoscope configuration.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct KinoConfig {
    pub server: ServerConfig,
    pub camera: CameraConfig,
}

impl Default for KinoConfig {
    fn default() -> Self {
        Self {
            server: ServerConfig::default(),
            camera: CameraConfig::default(),
        }
    }
}

/// Where the HTTP front end binds.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerConfig {
    /// Bind address, or a Unix socket path when it starts with `/`.
    pub bind: String,
    /// TCP port; unused for Unix socket binds.
    pub port: u16,
}

impl Default for ServerConfig {
    fn default() -> Self {
        Self {
            bind: "127.0.0.1".into(),
            port: 10101,
        }
    }
}

/// Which device to capture from, and when.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct CameraConfig {
    /// Device index, `/dev` path, or `"test"` for the synthetic source.
    pub device: String,
    /// Capture only while at least one consumer is attached.
    pub on_demand: bool,
}

impl Default for CameraConfig {
    fn default() -> Self {
        Self {
            device: "0".into(),
            on_demand: true,
        }
    }
}

impl KinoConfig {
    /// Load configuration from all sources.
    ///
    /// Load order (later wins):
    /// 1. Compiled defaults
    /// 2. `/etc/kinoscope/config.toml`
    /// 3. `~/.config/kinoscope/config.toml`
    /// 4. `./kinoscope.toml`
    /// 5. Environment variables
    pub fn load() -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(None)?;
        Ok(config)
    }

    /// Load configuration from a specific file path, then apply env
    /// overrides. The path takes precedence over the local
    /// `./kinoscope.toml` override; system and user configs still load
    /// first.
    pub fn load_from(config_path: Option<&std::path::Path>) -> Result<Self, ConfigError> {
        let (config, _sources) = Self::load_with_sources_from(config_path)?;
        Ok(config)
    }

    /// Load configuration and return information about sources.
    pub fn load_with_sources() -> Result<(Self, ConfigSources), ConfigError> {
        Self::load_with_sources_from(None)
    }

    /// Load configuration from an optional path and return information
    /// about sources.
    pub fn load_with_sources_from(
        config_path: Option<&std::path::Path>,
    ) -> Result<(Self, ConfigSources), ConfigError> {
        let mut sources = ConfigSources::default();
        let mut config = KinoConfig::default();

        for path in loader::discover_config_files_with_override(config_path) {
            let file_config = loader::load_from_file(&path)?;
            loader::apply_file(&mut config, file_config);
            sources.files.push(path);
        }

        loader::apply_env_overrides(&mut config, &mut sources)?;

        Ok((config, sources))
    }

    /// Serialize config to TOML string.
    pub fn to_toml(&self) -> String {
        // Build TOML manually for nicer formatting
        let mut output = String::new();

        output.push_str("# Kinoscope Configuration\n\n");

        output.push_str("[server]\n");
        output.push_str(&format!("bind = \"{}\"\n", self.server.bind));
        output.push_str(&format!("port = {}\n", self.server.port));

        output.push_str("\n[camera]\n");
        output.push_str(&format!("device = \"{}\"\n", self.camera.device));
        output.push_str(&format!("on_demand = {}\n", self.camera.on_demand));

        output
    }
}
