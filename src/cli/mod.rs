//! Command-line interface for the preferences host and process.
//!
//! `par-term-prefs` is the host: it owns the settings store and launches the
//! preferences process over the bridge. `par-term-preferences` is the
//! preferences process; it runs one settings command, either against the
//! bridge (`--bus-fd`) or against the store directly.

use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Log level argument for CLI
#[derive(Debug, Clone, Copy, PartialEq, Eq, clap::ValueEnum)]
pub enum LogLevelArg {
    Off,
    Error,
    Warn,
    Info,
    Debug,
    Trace,
}

impl LogLevelArg {
    /// Convert to `log::LevelFilter`
    pub fn to_level_filter(self) -> log::LevelFilter {
        match self {
            LogLevelArg::Off => log::LevelFilter::Off,
            LogLevelArg::Error => log::LevelFilter::Error,
            LogLevelArg::Warn => log::LevelFilter::Warn,
            LogLevelArg::Info => log::LevelFilter::Info,
            LogLevelArg::Debug => log::LevelFilter::Debug,
            LogLevelArg::Trace => log::LevelFilter::Trace,
        }
    }
}

/// par-term-prefs - run the par-term preferences process against the
/// canonical settings store
#[derive(Parser, Debug)]
#[command(name = "par-term-prefs")]
#[command(author, version, about, long_about = None)]
pub struct HostCli {
    /// Set debug log level (overrides RUST_LOG)
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Bridge configuration file (default: ~/.config/par-term/settings-bridge.yaml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Launch the preferences process without the bridge; it opens the
    /// store itself
    #[arg(long)]
    pub standalone: bool,

    /// Arguments passed through to the preferences process
    #[arg(last = true, value_name = "ARGS")]
    pub args: Vec<String>,
}

/// par-term-preferences - read and change par-term settings
#[derive(Parser, Debug)]
#[command(name = "par-term-preferences")]
#[command(author, version, about, long_about = None)]
pub struct PreferencesCli {
    /// Descriptor of the settings bridge inherited from the host
    #[arg(long, value_name = "FD")]
    pub bus_fd: Option<i32>,

    /// Set debug log level (overrides RUST_LOG)
    #[arg(long, value_enum, value_name = "LEVEL")]
    pub log_level: Option<LogLevelArg>,

    /// Bridge configuration file (default: ~/.config/par-term/settings-bridge.yaml)
    #[arg(long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    #[command(subcommand)]
    pub command: PrefsCommand,
}

#[derive(Subcommand, Debug, Clone, PartialEq)]
pub enum PrefsCommand {
    /// Print the effective value of a key
    Get {
        /// Full key path, e.g. /org/par-term/theme
        key: String,
    },

    /// Set a key; the value is written in YAML syntax
    Set {
        key: String,
        /// New value, e.g. `dark`, `1.25`, `[80, 24]`
        value: String,
    },

    /// Reset a key to its default
    Reset { key: String },

    /// List every key of the schema at a directory
    List {
        #[arg(default_value = "/org/par-term/")]
        dir: String,
    },

    /// Erase every setting below a directory
    Erase { dir: String },

    /// Report whether a key is writable
    Writable { key: String },
}

impl PrefsCommand {
    /// Whether the command changes the store.
    pub fn is_mutating(&self) -> bool {
        matches!(
            self,
            PrefsCommand::Set { .. } | PrefsCommand::Reset { .. } | PrefsCommand::Erase { .. }
        )
    }
}
