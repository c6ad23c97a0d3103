//! Default value functions for [`crate::config::PrefsConfig`] fields, used as
//! `#[serde(default = "crate::defaults::...")]` attributes.

use std::path::PathBuf;

// ── Paths ──────────────────────────────────────────────────────────────────

/// `~/.config/par-term/settings.yaml`, following the XDG layout par-term
/// uses on every platform.
pub fn keyfile_path() -> PathBuf {
    crate::config::PrefsConfig::config_dir().join("settings.yaml")
}

/// Executable name of the preferences process, looked up next to the host.
pub fn preferences_executable_name() -> &'static str {
    "par-term-preferences"
}
