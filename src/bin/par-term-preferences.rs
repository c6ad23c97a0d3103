//! The preferences process.
//!
//! Launched by `par-term-prefs` with `--bus-fd=N`, it reaches the settings
//! store only through the bridge on that descriptor. Run by hand without the
//! flag, it opens the store itself.

use std::sync::Arc;

use anyhow::{Context, Result};
use clap::Parser;
use par_term_prefs::cli::PreferencesCli;
use par_term_prefs::config::PrefsConfig;
use par_term_prefs::preferences;
use par_term_prefs::setup::{load_schemas, open_store};
use par_term_settings_bridge::{BridgeEvent, SettingsBackend, connect_inherited};
use tokio::runtime::Runtime;

async fn run(cli: PreferencesCli, config: PrefsConfig) -> Result<i32> {
    let selected = load_schemas(&config)?;
    let schemas = Arc::new(selected.source);

    let backend = match cli.bus_fd {
        Some(fd) => {
            let (client, mut events) = connect_inherited(fd, &config.bridge)
                .await
                .context("Settings bridge unavailable")?;
            tokio::spawn(async move {
                while let Some(event) = events.recv().await {
                    match event {
                        BridgeEvent::Unavailable => log::warn!("Settings bridge no longer available"),
                        other => log::debug!("Bridge event: {:?}", other),
                    }
                }
            });
            SettingsBackend::Bridged(Arc::new(client))
        }
        None => {
            log::info!("No bridge descriptor; opening {:?} directly", config.keyfile_path);
            SettingsBackend::direct(Arc::new(open_store(&config)?), Arc::clone(&schemas))
        }
    };

    let mut stdout = std::io::stdout().lock();
    let code = preferences::run(&backend, &schemas, cli.command, &mut stdout).await;

    if let SettingsBackend::Bridged(client) = &backend {
        client.close().await;
    }
    code
}

fn main() -> Result<()> {
    let cli = PreferencesCli::parse();
    par_term_prefs::debug::init_log_bridge(
        "par-term-preferences",
        cli.log_level.map(|l| l.to_level_filter()),
    );
    let config = match &cli.config {
        Some(path) => PrefsConfig::load_from(path),
        None => PrefsConfig::load(),
    };

    let runtime = Runtime::new()?;
    match runtime.block_on(run(cli, config)) {
        Ok(code) => {
            log::logger().flush();
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("par-term-preferences: error: {e:#}");
            log::error!("{e:#}");
            log::logger().flush();
            std::process::exit(1);
        }
    }
}
