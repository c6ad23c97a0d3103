//! The host side: own the store, launch the preferences process over the
//! bridge, and keep serving it until it exits.

use std::path::Path;
use std::process::ExitStatus;
use std::sync::Arc;

use anyhow::{Context, Result};
use log::LevelFilter;
use par_term_settings_bridge::BridgeHost;

use crate::config::PrefsConfig;
use crate::setup::{load_schemas, open_store};

/// Exit code reported when the preferences process could not be run.
pub const EXIT_UNAVAILABLE: i32 = 69;

/// Arguments for the preferences process, ahead of the caller's own.
pub fn preferences_args(config_path: Option<&Path>, log_level: Option<LevelFilter>, args: &[String]) -> Vec<String> {
    let mut out = Vec::with_capacity(args.len() + 4);
    if let Some(path) = config_path {
        out.push("--config".to_string());
        out.push(path.display().to_string());
    }
    if let Some(level) = log_level {
        out.push("--log-level".to_string());
        out.push(level.to_string().to_lowercase());
    }
    out.extend(args.iter().cloned());
    out
}

fn exit_code(status: Option<ExitStatus>) -> i32 {
    match status {
        Some(status) => status.code().unwrap_or_else(|| {
            log::warn!("Preferences process ended by signal ({status})");
            1
        }),
        None => 1,
    }
}

/// Run the preferences process with `args` and return its exit code.
///
/// With `standalone` the process is started without a channel and opens the
/// store itself; otherwise it is launched over the settings bridge.
pub async fn run(
    config: &PrefsConfig,
    config_path: Option<&Path>,
    log_level: Option<LevelFilter>,
    standalone: bool,
    args: &[String],
) -> Result<i32> {
    let program = config.preferences_executable();
    let child_args = preferences_args(config_path, log_level, args);

    if standalone {
        log::info!("Running {:?} standalone", program);
        let status = tokio::process::Command::new(&program)
            .args(&child_args)
            .status()
            .await
            .with_context(|| format!("Failed to run {:?}", program))?;
        return Ok(exit_code(Some(status)));
    }

    let selected = load_schemas(config)?;
    let store = open_store(config)?;
    let mut host = BridgeHost::new(Arc::new(store), Arc::new(selected.source), config.bridge.clone());

    if let Err(e) = host.launch(&program, &child_args).await {
        eprintln!("par-term-prefs: preferences unavailable: {e}");
        return Ok(EXIT_UNAVAILABLE);
    }

    let outcome = tokio::select! {
        status = host.wait() => Some(status),
        _ = tokio::signal::ctrl_c() => None,
    };
    let status = match outcome {
        Some(status) => status?,
        None => {
            log::info!("Interrupted; closing the settings bridge");
            host.shutdown().await?
        }
    };
    Ok(exit_code(status))
}
