//! Configuration management for OpenQRun.
//!
//! Site- and user-level knobs (which executables to launch, the retry
//! policy, cleanup behavior) live in INI-format configuration files with
//! hierarchical precedence:
//!
//! 1. Local configuration (`./oqrun_config.cfg`)
//! 2. User configuration (`~/.config/oqrun/oqrun_config.cfg`)
//! 3. System configuration (`/etc/oqrun/oqrun_config.cfg`)
//! 4. Built-in defaults
//!
//! # Configuration File Format
//!
//! ```ini
//! [executables]
//! ph = ph.x
//! neb = neb.x
//!
//! [runner]
//! max_iterations = 5
//! max_wallclock_seconds = 1800
//! delta_factor_max_seconds = 0.95
//! alpha_mix = 0.70
//!
//! [cleanup]
//! enabled = false
//! keep_outputs = true
//! ```

use crate::config::Defaults;
use configparser::ini::Ini;
use log::{debug, info, warn};
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use thiserror::Error;

/// Errors that can occur during configuration loading and processing.
#[derive(Error, Debug)]
pub enum ConfigError {
    /// I/O error when reading configuration files
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    /// INI parsing error
    #[error("INI parsing error: {0}")]
    IniParse(String),
    /// Invalid configuration value
    #[error("Invalid configuration value: {0}")]
    InvalidValue(String),
}

/// All program settings.
#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct Settings {
    /// Executable commands for the QE codes
    pub executables: ExecutableSettings,
    /// Restart-loop policy
    pub runner: RunnerSettings,
    /// Post-run cleanup behavior
    pub cleanup: CleanupSettings,
}

/// Executable commands for the QE codes.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ExecutableSettings {
    /// Phonon executable (default: "ph.x")
    pub ph: String,
    /// NEB executable (default: "neb.x")
    pub neb: String,
}

impl Default for ExecutableSettings {
    fn default() -> Self {
        Self {
            ph: "ph.x".to_string(),
            neb: "neb.x".to_string(),
        }
    }
}

/// Restart-loop policy settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunnerSettings {
    /// Retry ceiling for the phonon workflow (default: 5)
    pub max_iterations: usize,
    /// Wall-clock budget per submission in seconds (default: 1800)
    pub max_wallclock_seconds: u64,
    /// Fraction of the wall budget handed to `max_seconds` (default: 0.95)
    pub delta_factor_max_seconds: f64,
    /// Assumed `alpha_mix(1)` when the input never set one (default: 0.70)
    pub alpha_mix: f64,
}

impl Default for RunnerSettings {
    fn default() -> Self {
        let defaults = Defaults::default();
        Self {
            max_iterations: 5,
            max_wallclock_seconds: 1800,
            delta_factor_max_seconds: defaults.delta_factor_max_seconds,
            alpha_mix: defaults.alpha_mix,
        }
    }
}

impl RunnerSettings {
    /// The handler fallback factors carried by these settings.
    pub fn defaults(&self) -> Defaults {
        Defaults {
            delta_factor_max_seconds: self.delta_factor_max_seconds,
            alpha_mix: self.alpha_mix,
        }
    }
}

/// Post-run cleanup settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CleanupSettings {
    /// Remove intermediate iteration files after convergence (default: false)
    pub enabled: bool,
    /// Keep intermediate outputs even when cleanup runs (default: true)
    pub keep_outputs: bool,
}

impl Default for CleanupSettings {
    fn default() -> Self {
        Self {
            enabled: false,
            keep_outputs: true,
        }
    }
}

/// Configuration manager that loads and serves program settings.
pub struct SettingsManager {
    settings: Settings,
    config_source: String,
}

impl SettingsManager {
    /// Loads configuration from the first available sources, most specific
    /// last so local files override user and system ones.
    pub fn load() -> Result<Self, ConfigError> {
        let (settings, source) = Self::load_from_files()?;
        info!("Configuration loaded from: {}", source);
        Ok(Self {
            settings,
            config_source: source,
        })
    }

    /// Builds a manager from explicit settings; used by tests and callers
    /// that assemble settings programmatically.
    pub fn from_settings(settings: Settings) -> Self {
        Self {
            settings,
            config_source: "explicit settings".to_string(),
        }
    }

    /// Where the active configuration came from.
    pub fn config_source(&self) -> &str {
        &self.config_source
    }

    /// The loaded settings.
    pub fn settings(&self) -> &Settings {
        &self.settings
    }

    /// Executable settings section.
    pub fn executables(&self) -> &ExecutableSettings {
        &self.settings.executables
    }

    /// Runner policy section.
    pub fn runner(&self) -> &RunnerSettings {
        &self.settings.runner
    }

    /// Cleanup section.
    pub fn cleanup(&self) -> &CleanupSettings {
        &self.settings.cleanup
    }

    fn load_from_files() -> Result<(Settings, String), ConfigError> {
        let mut settings = Settings::default();
        let mut config_source = "built-in defaults".to_string();

        if let Some(system_path) = Self::system_config_path() {
            if system_path.exists() {
                match Self::load_config(&system_path) {
                    Ok(loaded) => {
                        settings = loaded;
                        config_source = format!("system config ({})", system_path.display());
                        debug!("Loaded system configuration from: {}", system_path.display());
                    }
                    Err(e) => {
                        warn!(
                            "Failed to load system config from {}: {}",
                            system_path.display(),
                            e
                        );
                    }
                }
            }
        }

        if let Some(user_path) = Self::user_config_path() {
            if user_path.exists() {
                match Self::load_config_into(&user_path, settings.clone()) {
                    Ok(loaded) => {
                        settings = loaded;
                        config_source = format!("user config ({})", user_path.display());
                        debug!("Loaded user configuration from: {}", user_path.display());
                    }
                    Err(e) => {
                        warn!(
                            "Failed to load user config from {}: {}",
                            user_path.display(),
                            e
                        );
                    }
                }
            }
        }

        let local_path = PathBuf::from("oqrun_config.cfg");
        if local_path.exists() {
            match Self::load_config_into(&local_path, settings.clone()) {
                Ok(loaded) => {
                    settings = loaded;
                    config_source = format!("local config ({})", local_path.display());
                    debug!("Loaded local configuration from: {}", local_path.display());
                }
                Err(e) => {
                    warn!(
                        "Failed to load local config from {}: {}",
                        local_path.display(),
                        e
                    );
                }
            }
        }

        Ok((settings, config_source))
    }

    /// Loads one INI file on top of built-in defaults.
    fn load_config(path: &Path) -> Result<Settings, ConfigError> {
        Self::load_config_into(path, Settings::default())
    }

    /// Loads one INI file on top of an existing settings value, so later
    /// layers only override the keys they name.
    fn load_config_into(path: &Path, mut settings: Settings) -> Result<Settings, ConfigError> {
        let content = fs::read_to_string(path)?;
        let mut ini = Ini::new();
        ini.read(content)
            .map_err(|e| ConfigError::IniParse(format!("Failed to parse INI: {}", e)))?;

        if let Some(section) = ini.get_map_ref().get("executables") {
            if let Some(Some(ph)) = section.get("ph") {
                settings.executables.ph = ph.clone();
            }
            if let Some(Some(neb)) = section.get("neb") {
                settings.executables.neb = neb.clone();
            }
        }

        if let Some(section) = ini.get_map_ref().get("runner") {
            if let Some(Some(v)) = section.get("max_iterations") {
                settings.runner.max_iterations = v.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("Invalid max_iterations: {}", v))
                })?;
            }
            if let Some(Some(v)) = section.get("max_wallclock_seconds") {
                settings.runner.max_wallclock_seconds = v.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("Invalid max_wallclock_seconds: {}", v))
                })?;
            }
            if let Some(Some(v)) = section.get("delta_factor_max_seconds") {
                settings.runner.delta_factor_max_seconds = v.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("Invalid delta_factor_max_seconds: {}", v))
                })?;
            }
            if let Some(Some(v)) = section.get("alpha_mix") {
                settings.runner.alpha_mix = v.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("Invalid alpha_mix: {}", v))
                })?;
            }
        }

        if let Some(section) = ini.get_map_ref().get("cleanup") {
            if let Some(Some(v)) = section.get("enabled") {
                settings.cleanup.enabled = v.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("Invalid enabled value: {}", v))
                })?;
            }
            if let Some(Some(v)) = section.get("keep_outputs") {
                settings.cleanup.keep_outputs = v.parse().map_err(|_| {
                    ConfigError::InvalidValue(format!("Invalid keep_outputs value: {}", v))
                })?;
            }
        }

        Ok(settings)
    }

    fn user_config_path() -> Option<PathBuf> {
        std::env::var("HOME").ok().map(|home| {
            PathBuf::from(home)
                .join(".config")
                .join("oqrun")
                .join("oqrun_config.cfg")
        })
    }

    fn system_config_path() -> Option<PathBuf> {
        #[cfg(unix)]
        {
            Some(PathBuf::from("/etc/oqrun/oqrun_config.cfg"))
        }
        #[cfg(not(unix))]
        {
            None
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn defaults_are_sane() {
        let settings = Settings::default();
        assert_eq!(settings.executables.ph, "ph.x");
        assert_eq!(settings.runner.max_iterations, 5);
        assert!(!settings.cleanup.enabled);
        assert!(settings.cleanup.keep_outputs);
    }

    #[test]
    fn ini_overrides_only_named_keys() {
        let dir = std::env::temp_dir().join("oqrun_settings_test");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("oqrun_config.cfg");
        fs::write(
            &path,
            "[executables]\nph = /opt/qe/bin/ph.x\n\n[runner]\nmax_iterations = 8\n",
        )
        .unwrap();

        let settings = SettingsManager::load_config(&path).unwrap();
        assert_eq!(settings.executables.ph, "/opt/qe/bin/ph.x");
        assert_eq!(settings.executables.neb, "neb.x");
        assert_eq!(settings.runner.max_iterations, 8);
        assert_eq!(settings.runner.max_wallclock_seconds, 1800);

        fs::remove_file(&path).unwrap();
    }

    #[test]
    fn invalid_numeric_value_is_an_error() {
        let dir = std::env::temp_dir().join("oqrun_settings_test_bad");
        fs::create_dir_all(&dir).unwrap();
        let path = dir.join("oqrun_config.cfg");
        fs::write(&path, "[runner]\nmax_iterations = soon\n").unwrap();

        let err = SettingsManager::load_config(&path).unwrap_err();
        assert!(err.to_string().contains("max_iterations"));

        fs::remove_file(&path).unwrap();
    }
}
