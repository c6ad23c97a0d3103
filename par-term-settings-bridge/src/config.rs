//! Bridge timeouts and channel settings.

use std::time::Duration;

use serde::{Deserialize, Serialize};

/// Setting this environment variable to `1` disables the request timeout so
/// the main process can be held in a debugger without the preferences
/// process giving up.
pub const DEBUG_ENV: &str = "PAR_TERM_BRIDGE_DEBUG";

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct BridgeConfig {
    /// Per-call timeout on the preferences side.
    #[serde(default = "crate::defaults::request_timeout_ms")]
    pub request_timeout_ms: u64,

    /// Time allowed from spawn to a completed hello exchange.
    #[serde(default = "crate::defaults::startup_timeout_ms")]
    pub startup_timeout_ms: u64,

    /// Time the preferences process gets to exit after the channel closes.
    #[serde(default = "crate::defaults::shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default = "crate::defaults::bool_false")]
    pub disable_timeout: bool,

    #[serde(default = "crate::defaults::bus_fd")]
    pub bus_fd: i32,
}

impl Default for BridgeConfig {
    fn default() -> Self {
        Self {
            request_timeout_ms: crate::defaults::request_timeout_ms(),
            startup_timeout_ms: crate::defaults::startup_timeout_ms(),
            shutdown_timeout_ms: crate::defaults::shutdown_timeout_ms(),
            disable_timeout: crate::defaults::bool_false(),
            bus_fd: crate::defaults::bus_fd(),
        }
    }
}

impl BridgeConfig {
    /// The per-call timeout, `None` when disabled by config or by
    /// [`DEBUG_ENV`].
    pub fn request_timeout(&self) -> Option<Duration> {
        let debug = std::env::var(DEBUG_ENV).is_ok_and(|v| v == "1");
        if self.disable_timeout || debug {
            None
        } else {
            Some(Duration::from_millis(self.request_timeout_ms))
        }
    }

    pub fn startup_timeout(&self) -> Duration {
        Duration::from_millis(self.startup_timeout_ms)
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_missing_fields_use_defaults() {
        let config: BridgeConfig = serde_json::from_str(r#"{"request_timeout_ms": 250}"#).unwrap();
        assert_eq!(config.request_timeout_ms, 250);
        assert_eq!(config.startup_timeout_ms, 5000);
        assert_eq!(config.bus_fd, 3);
        assert!(!config.disable_timeout);
    }

    #[test]
    fn test_disable_timeout() {
        let config = BridgeConfig {
            disable_timeout: true,
            ..Default::default()
        };
        assert_eq!(config.request_timeout(), None);
        assert_eq!(config.shutdown_timeout(), Duration::from_secs(2));
    }
}
