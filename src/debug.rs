//! Logging for the par-term-prefs binaries.
//!
//! Every `log::info!()` etc. from this crate and the settings crates is
//! written to `/tmp/par_term_prefs_debug.log` on Unix (`%TEMP%` on Windows),
//! keeping stdout free for command output. When `RUST_LOG` is set, records
//! are mirrored to stderr as well.
//!
//! Level precedence: `--log-level`, then `RUST_LOG`, then `Warn`.

use std::fs::{File, OpenOptions};
use std::io::Write;
use std::path::PathBuf;
use std::sync::OnceLock;
use std::time::{SystemTime, UNIX_EPOCH};

use log::{LevelFilter, Log, Metadata, Record};
use parking_lot::Mutex;

/// Log file shared by both binaries; each process tags its lines.
pub fn log_path() -> PathBuf {
    #[cfg(unix)]
    {
        PathBuf::from("/tmp/par_term_prefs_debug.log")
    }
    #[cfg(not(unix))]
    {
        std::env::temp_dir().join("par_term_prefs_debug.log")
    }
}

struct PrefsLogger {
    level: LevelFilter,
    file: Option<Mutex<File>>,
    mirror_stderr: bool,
    process: &'static str,
}

impl Log for PrefsLogger {
    fn enabled(&self, metadata: &Metadata<'_>) -> bool {
        metadata.level() <= self.level
    }

    fn log(&self, record: &Record<'_>) {
        if !self.enabled(record.metadata()) {
            return;
        }
        let line = format!(
            "[{}] [{}] [{:<5}] [{}] {}\n",
            timestamp(),
            self.process,
            record.level(),
            record.target(),
            record.args()
        );
        if let Some(file) = &self.file {
            let mut file = file.lock();
            let _ = file.write_all(line.as_bytes());
        }
        if self.mirror_stderr {
            eprint!("{line}");
        }
    }

    fn flush(&self) {
        if let Some(file) = &self.file {
            let _ = file.lock().flush();
        }
    }
}

static LOGGER: OnceLock<PrefsLogger> = OnceLock::new();

fn timestamp() -> String {
    let now = SystemTime::now()
        .duration_since(UNIX_EPOCH)
        .unwrap_or_default();
    format!("{}.{:06}", now.as_secs(), now.subsec_micros())
}

/// Parse a `RUST_LOG`-style value; only a bare level is understood.
fn level_from_env(value: &str) -> Option<LevelFilter> {
    value.trim().parse::<LevelFilter>().ok()
}

/// Resolve the effective level from the CLI flag and `RUST_LOG`.
pub fn effective_level(cli_level: Option<LevelFilter>, rust_log: Option<&str>) -> LevelFilter {
    cli_level
        .or_else(|| rust_log.and_then(level_from_env))
        .unwrap_or(LevelFilter::Warn)
}

/// Install the logger for this process. Later calls are ignored.
///
/// `process` names the binary in each line, since host and preferences
/// process share one file.
pub fn init_log_bridge(process: &'static str, cli_level: Option<LevelFilter>) {
    let rust_log = std::env::var("RUST_LOG").ok();
    let level = effective_level(cli_level, rust_log.as_deref());

    let logger = LOGGER.get_or_init(|| {
        // Append: host and preferences process write concurrently.
        let file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(log_path())
            .ok()
            .map(Mutex::new);
        PrefsLogger {
            level,
            file,
            mirror_stderr: rust_log.is_some(),
            process,
        }
    });

    if log::set_logger(logger).is_ok() {
        log::set_max_level(level);
        log::info!("{process} {} logging at {level}", env!("CARGO_PKG_VERSION"));
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_cli_level_wins() {
        assert_eq!(
            effective_level(Some(LevelFilter::Trace), Some("error")),
            LevelFilter::Trace
        );
    }

    #[test]
    fn test_rust_log_level() {
        assert_eq!(effective_level(None, Some("debug")), LevelFilter::Debug);
        assert_eq!(effective_level(None, Some(" INFO ")), LevelFilter::Info);
    }

    #[test]
    fn test_fallback_level() {
        assert_eq!(effective_level(None, None), LevelFilter::Warn);
        assert_eq!(effective_level(None, Some("par_term=debug")), LevelFilter::Warn);
    }
}
