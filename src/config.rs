//! Configuration for the preferences host and process.
//!
//! Read from `~/.config/par-term/settings-bridge.yaml`. A missing file means
//! defaults; a file that fails to parse is reported and defaults are used.

use std::fs;
use std::path::{Path, PathBuf};

use par_term_settings_bridge::BridgeConfig;
use serde::{Deserialize, Serialize};

/// File name of the configuration inside the config directory.
pub const CONFIG_FILE_NAME: &str = "settings-bridge.yaml";

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PrefsConfig {
    /// Keyfile holding the canonical settings store.
    #[serde(default = "crate::defaults::keyfile_path")]
    pub keyfile_path: PathBuf,

    /// Extra directory searched for installed schemas.
    #[serde(default)]
    pub schema_dir: Option<PathBuf>,

    /// Directory holding trusted reference schemas; the copy compiled into
    /// the binary is used when unset.
    #[serde(default)]
    pub reference_schema_dir: Option<PathBuf>,

    /// Preferences executable; defaults to `par-term-preferences` next to the
    /// running binary.
    #[serde(default)]
    pub preferences_executable: Option<PathBuf>,

    #[serde(default)]
    pub bridge: BridgeConfig,
}

impl Default for PrefsConfig {
    fn default() -> Self {
        Self {
            keyfile_path: crate::defaults::keyfile_path(),
            schema_dir: None,
            reference_schema_dir: None,
            preferences_executable: None,
            bridge: BridgeConfig::default(),
        }
    }
}

impl PrefsConfig {
    /// Get the configuration directory path (using XDG convention)
    pub fn config_dir() -> PathBuf {
        #[cfg(target_os = "windows")]
        {
            if let Some(config_dir) = dirs::config_dir() {
                config_dir.join("par-term")
            } else {
                PathBuf::from(".")
            }
        }
        #[cfg(not(target_os = "windows"))]
        {
            if let Some(home_dir) = dirs::home_dir() {
                home_dir.join(".config").join("par-term")
            } else {
                PathBuf::from(".")
            }
        }
    }

    pub fn config_path() -> PathBuf {
        Self::config_dir().join(CONFIG_FILE_NAME)
    }

    /// Load from the default location.
    pub fn load() -> Self {
        Self::load_from(&Self::config_path())
    }

    /// Load from `path`, falling back to defaults.
    pub fn load_from(path: &Path) -> Self {
        if !path.exists() {
            log::info!("No bridge config at {:?}; using defaults", path);
            return Self::default();
        }
        let text = match fs::read_to_string(path) {
            Ok(text) => text,
            Err(e) => {
                log::error!("Failed to read {:?}: {e}; using defaults", path);
                return Self::default();
            }
        };
        if text.trim().is_empty() {
            return Self::default();
        }
        match serde_yaml_ng::from_str(&text) {
            Ok(config) => {
                log::info!("Loaded bridge config from {:?}", path);
                config
            }
            Err(e) => {
                log::error!("Failed to parse {:?}: {e}; using defaults", path);
                Self::default()
            }
        }
    }

    /// The preferences executable to launch.
    pub fn preferences_executable(&self) -> PathBuf {
        if let Some(path) = &self.preferences_executable {
            return path.clone();
        }
        let name = crate::defaults::preferences_executable_name();
        std::env::current_exe()
            .ok()
            .and_then(|exe| exe.parent().map(|dir| dir.join(name)))
            .unwrap_or_else(|| PathBuf::from(name))
    }
}
