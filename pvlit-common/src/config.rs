//! Configuration loading and config file resolution
//!
//! Services resolve their configuration in priority order:
//! 1. Environment variable overrides (highest priority)
//! 2. TOML config file
//! 3. Compiled defaults (fallback)

use crate::{Error, Result};
use serde::de::DeserializeOwned;
use serde::Serialize;
use std::path::{Path, PathBuf};

/// Logging configuration shared by all services
#[derive(Debug, Clone, Serialize, serde::Deserialize)]
pub struct LoggingConfig {
    /// Tracing filter directive, e.g. "info" or "pvlit_wf=debug,info"
    pub level: String,
}

impl Default for LoggingConfig {
    fn default() -> Self {
        Self {
            level: "info".to_string(),
        }
    }
}

/// Resolve the config file path for a service.
///
/// Priority order:
/// 1. `PVLIT_CONFIG` environment variable
/// 2. `~/.config/pvlit/<service>.toml`
/// 3. `/etc/pvlit/<service>.toml` (Linux)
///
/// Returns `None` when no config file exists; callers fall back to defaults.
pub fn resolve_config_path(service: &str) -> Option<PathBuf> {
    if let Ok(path) = std::env::var("PVLIT_CONFIG") {
        let path = PathBuf::from(path);
        if path.exists() {
            return Some(path);
        }
        tracing::warn!(
            path = %path.display(),
            "PVLIT_CONFIG points at a missing file, falling back"
        );
    }

    if let Some(user_config) = dirs::config_dir() {
        let path = user_config.join("pvlit").join(format!("{}.toml", service));
        if path.exists() {
            return Some(path);
        }
    }

    if cfg!(target_os = "linux") {
        let system = PathBuf::from("/etc/pvlit").join(format!("{}.toml", service));
        if system.exists() {
            return Some(system);
        }
    }

    None
}

/// Load and parse a TOML config file into a typed config struct
pub fn load_toml_config<T: DeserializeOwned>(path: &Path) -> Result<T> {
    let content = std::fs::read_to_string(path)
        .map_err(|e| Error::Config(format!("Read config failed ({}): {}", path.display(), e)))?;
    toml::from_str(&content)
        .map_err(|e| Error::Config(format!("Parse config failed ({}): {}", path.display(), e)))
}

/// Write a config struct to a TOML file, creating parent directories
///
/// Best-effort atomicity: writes to a sibling temp file then renames.
pub fn write_toml_config<T: Serialize>(config: &T, path: &Path) -> Result<()> {
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }

    let content = toml::to_string_pretty(config)
        .map_err(|e| Error::Config(format!("Serialize config failed: {}", e)))?;

    let tmp = path.with_extension("toml.tmp");
    std::fs::write(&tmp, content)?;
    std::fs::rename(&tmp, path)?;

    Ok(())
}

/// Read an environment variable override, parsed to the target type
///
/// Unset variables return `None`; unparseable values log a warning and are
/// treated as unset rather than failing startup.
pub fn env_override<T: std::str::FromStr>(name: &str) -> Option<T> {
    match std::env::var(name) {
        Ok(raw) => match raw.parse() {
            Ok(value) => Some(value),
            Err(_) => {
                tracing::warn!(var = name, value = %raw, "Ignoring unparseable environment override");
                None
            }
        },
        Err(_) => None,
    }
}
