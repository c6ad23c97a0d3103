use anyhow::Result;
use clap::Parser;
use par_term_prefs::cli::HostCli;
use par_term_prefs::config::PrefsConfig;
use tokio::runtime::Runtime;

fn main() -> Result<()> {
    let cli = HostCli::parse();
    let log_level = cli.log_level.map(|l| l.to_level_filter());
    // Routes log::info!() etc. to /tmp/par_term_prefs_debug.log; stdout stays
    // with the preferences process.
    par_term_prefs::debug::init_log_bridge("par-term-prefs", log_level);

    let config = match &cli.config {
        Some(path) => PrefsConfig::load_from(path),
        None => PrefsConfig::load(),
    };
    log::info!("Starting par-term-prefs {}", par_term_prefs::VERSION);

    let runtime = Runtime::new()?;
    let result = runtime.block_on(par_term_prefs::host::run(
        &config,
        cli.config.as_deref(),
        log_level,
        cli.standalone,
        &cli.args,
    ));
    // Don't let a wedged task keep the process alive.
    runtime.shutdown_timeout(std::time::Duration::from_secs(2));

    match result {
        Ok(code) => {
            log::info!("Preferences process finished with code {code}");
            log::logger().flush();
            std::process::exit(code);
        }
        Err(e) => {
            eprintln!("par-term-prefs: error: {e:#}");
            log::error!("{e:#}");
            Err(e)
        }
    }
}
