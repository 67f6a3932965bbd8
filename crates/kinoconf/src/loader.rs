//! Config file discovery, loading, and environment variable overlay.

use crate::{ConfigError, KinoConfig};
use serde::Deserialize;
use std::env;
use std::path::{Path, PathBuf};

/// Information about where config values came from.
#[derive(Debug, Clone, Default)]
pub struct ConfigSources {
    /// Config files that were loaded (in order)
    pub files: Vec<PathBuf>,
    /// Environment variables that overrode config values
    pub env_overrides: Vec<String>,
}

/// Discover config files in standard locations.
///
/// Returns paths in load order (system, user, local).
/// Only returns files that exist.
pub fn discover_config_files() -> Vec<PathBuf> {
    discover_config_files_with_override(None)
}

/// Discover config files, optionally with a CLI override path.
///
/// If `cli_path` is provided and exists, it replaces the local override.
/// Returns paths in load order (system, user, local/cli).
pub fn discover_config_files_with_override(cli_path: Option<&Path>) -> Vec<PathBuf> {
    let mut files = Vec::new();

    // System config
    let system = PathBuf::from("/etc/kinoscope/config.toml");
    if system.exists() {
        files.push(system);
    }

    // User config (XDG_CONFIG_HOME or ~/.config)
    if let Some(config_dir) = directories::BaseDirs::new().map(|d| d.config_dir().to_path_buf()) {
        let user = config_dir.join("kinoscope/config.toml");
        if user.exists() {
            files.push(user);
        }
    }

    // CLI override takes precedence over local
    if let Some(path) = cli_path {
        if path.exists() {
            files.push(path.to_path_buf());
            return files;
        }
    }

    // Local override (current directory)
    let local = PathBuf::from("kinoscope.toml");
    if local.exists() {
        files.push(local);
    }

    files
}

/// A partially-specified config file: only the keys it names override.
#[derive(Debug, Default, Deserialize)]
pub(crate) struct RawConfig {
    server: Option<RawServer>,
    camera: Option<RawCamera>,
}

#[derive(Debug, Default, Deserialize)]
struct RawServer {
    bind: Option<String>,
    port: Option<u16>,
}

#[derive(Debug, Default, Deserialize)]
struct RawCamera {
    device: Option<String>,
    on_demand: Option<bool>,
}

/// Load a config file without resolving defaults.
pub(crate) fn load_from_file(path: &Path) -> Result<RawConfig, ConfigError> {
    let contents = std::fs::read_to_string(path).map_err(|e| ConfigError::FileRead {
        path: path.to_path_buf(),
        source: e,
    })?;

    toml::from_str(&contents).map_err(|e| ConfigError::Parse {
        path: path.to_path_buf(),
        message: e.to_string(),
    })
}

/// Overlay one file's keys onto the accumulated config (later wins).
pub(crate) fn apply_file(config: &mut KinoConfig, raw: RawConfig) {
    if let Some(server) = raw.server {
        if let Some(bind) = server.bind {
            config.server.bind = bind;
        }
        if let Some(port) = server.port {
            config.server.port = port;
        }
    }
    if let Some(camera) = raw.camera {
        if let Some(device) = camera.device {
            config.camera.device = device;
        }
        if let Some(on_demand) = camera.on_demand {
            config.camera.on_demand = on_demand;
        }
    }
}

/// Apply `KINOSCOPE_*` environment variable overrides.
pub(crate) fn apply_env_overrides(
    config: &mut KinoConfig,
    sources: &mut ConfigSources,
) -> Result<(), ConfigError> {
    apply_env_from(config, sources, |name| env::var(name).ok())
}

/// Testable inner overlay: `lookup` stands in for the process environment.
pub(crate) fn apply_env_from(
    config: &mut KinoConfig,
    sources: &mut ConfigSources,
    lookup: impl Fn(&str) -> Option<String>,
) -> Result<(), ConfigError> {
    if let Some(bind) = lookup("KINOSCOPE_BIND") {
        config.server.bind = bind;
        sources.env_overrides.push("KINOSCOPE_BIND".into());
    }

    if let Some(port) = lookup("KINOSCOPE_PORT") {
        config.server.port = port.parse().map_err(|_| ConfigError::EnvParse {
            var: "KINOSCOPE_PORT".into(),
            value: port.clone(),
        })?;
        sources.env_overrides.push("KINOSCOPE_PORT".into());
    }

    if let Some(device) = lookup("KINOSCOPE_DEVICE") {
        config.camera.device = device;
        sources.env_overrides.push("KINOSCOPE_DEVICE".into());
    }

    if let Some(on_demand) = lookup("KINOSCOPE_ON_DEMAND") {
        config.camera.on_demand = parse_bool(&on_demand).ok_or(ConfigError::EnvParse {
            var: "KINOSCOPE_ON_DEMAND".into(),
            value: on_demand,
        })?;
        sources.env_overrides.push("KINOSCOPE_ON_DEMAND".into());
    }

    Ok(())
}

/// Accepts the usual config-file booleans: 1/0, true/false, yes/no, on/off.
fn parse_bool(value: &str) -> Option<bool> {
    match value.to_ascii_lowercase().as_str() {
        "1" | "true" | "yes" | "on" => Some(true),
        "0" | "false" | "no" | "off" => Some(false),
        _ => None,
    }
}
