//! Ambient runner settings
//!
//! Distinct from the per-run declarative configuration modeled in
//! [`crate::core::config_model`]: these are operator-level defaults (log
//! level, hash directory, temp root) read once at startup from an optional
//! settings file, then overridable by CLI flags and environment variables.
//! Grounded on `PyRo1121-omg`'s `config/settings.rs` (`directories` +
//! `toml` load/save pair), adapted to the `dirs` crate this crate already
//! depends on for [`crate::core::paths`].

use std::path::PathBuf;

use anyhow::Result;
use serde::{Deserialize, Serialize};

/// Operator-level defaults for the runner binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Settings {
    /// Default hash directory, overridable per-run by `[global]`.
    pub hash_directory: PathBuf,

    /// Root directory under which per-run temp directories are created.
    pub temp_root: PathBuf,

    /// Default log level for the `tracing` subscriber.
    pub log_level: String,

    /// Emit structured JSON logs instead of human-readable text.
    pub json_logs: bool,
}

impl Default for Settings {
    fn default() -> Self {
        Self {
            hash_directory: crate::core::paths::default_hash_dir(),
            temp_root: crate::core::paths::temp_dir_root(),
            log_level: "info".to_string(),
            json_logs: false,
        }
    }
}

impl Settings {
    /// Load settings from the operator config file, falling back to
    /// defaults if it does not exist.
    pub fn load() -> Result<Self> {
        let config_path = Self::config_path();
        if config_path.exists() {
            let content = std::fs::read_to_string(&config_path)?;
            Ok(toml::from_str(&content)?)
        } else {
            Ok(Self::default())
        }
    }

    /// Persist the current settings to the operator config file.
    pub fn save(&self) -> Result<()> {
        let config_path = Self::config_path();
        if let Some(parent) = config_path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        let content = toml::to_string_pretty(self)?;
        std::fs::write(&config_path, content)?;
        Ok(())
    }

    /// Location of the operator settings file: `$XDG_CONFIG_HOME/warden/settings.toml`
    /// or `~/.config/warden/settings.toml`.
    #[must_use]
    pub fn config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("warden")
            .join("settings.toml")
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn default_settings_are_well_formed() {
        let settings = Settings::default();
        assert!(settings.hash_directory.is_absolute());
        assert_eq!(settings.log_level, "info");
    }

    #[test]
    fn config_path_is_absolute() {
        assert!(Settings::config_path().is_absolute());
    }
}
