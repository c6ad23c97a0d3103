//! Default values for [`crate::config::BridgeConfig`] fields.

// ── Timeouts ───────────────────────────────────────────────────────────────

pub fn request_timeout_ms() -> u64 {
    5000
}

pub fn startup_timeout_ms() -> u64 {
    5000
}

pub fn shutdown_timeout_ms() -> u64 {
    2000
}

// ── Channel ────────────────────────────────────────────────────────────────

/// Descriptor number the preferences process finds its channel end at.
pub fn bus_fd() -> i32 {
    3
}

pub fn bool_false() -> bool {
    false
}
