// Library exports for the preferences host and process binaries, and for
// integration tests.
//
// The settings machinery itself lives in the `par-term-settings` (values,
// schemas, store) and `par-term-settings-bridge` (channel, server, client)
// crates; this crate only wires them into two executables.

/// Application version (root crate version).
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

pub mod cli;
pub mod config;
pub mod debug;
pub mod defaults;
pub mod host;
pub mod preferences;
pub mod setup;
