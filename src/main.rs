//! edgeway server binary.
//!
//! Loads a TOML config, selects the execution engine and runs the configured
//! accelerators (gateway, cache, stream) until SIGINT/SIGTERM.

use std::path::PathBuf;
use std::process::ExitCode;
use std::time::Duration;

use clap::Parser;

use edgeway::config::{load_config, EdgewayConfig};
use edgeway::lifecycle::{signals, start_accelerators, Shutdown};
use edgeway::observability::{logging, metrics};
use edgeway::{EngineKind, EnginePreference, StartupError};

#[derive(Debug, Parser)]
#[command(name = "edgeway", version, about = "Edge accelerators in front of an HTTP backend")]
struct Cli {
    /// Path to the TOML configuration file
    #[arg(short, long, default_value = "edgeway.toml")]
    config: PathBuf,

    /// Engine preference, overrides the config file and EDGEWAY_ENGINE
    #[arg(long, value_parser = parse_engine)]
    engine: Option<EnginePreference>,

    /// Validate the configuration and exit
    #[arg(long)]
    check: bool,
}

fn parse_engine(value: &str) -> Result<EnginePreference, String> {
    value.parse().map_err(|err: StartupError| err.to_string())
}

fn main() -> ExitCode {
    let cli = Cli::parse();

    let config = match load_config(&cli.config) {
        Ok(config) => config,
        Err(err) => {
            eprintln!("edgeway: {err}");
            return ExitCode::FAILURE;
        }
    };

    if cli.check {
        println!("{}: configuration is valid", cli.config.display());
        return ExitCode::SUCCESS;
    }

    logging::init(&config.observability);
    tracing::info!(version = env!("CARGO_PKG_VERSION"), config = %cli.config.display(), "edgeway starting");

    match run(config, cli.engine) {
        Ok(()) => {
            tracing::info!("Shutdown complete");
            ExitCode::SUCCESS
        }
        Err(err) => {
            tracing::error!(error = %err, "Startup failed");
            ExitCode::FAILURE
        }
    }
}

fn run(config: EdgewayConfig, engine: Option<EnginePreference>) -> Result<(), StartupError> {
    let preference = EnginePreference::effective(engine, config.engine.preference)?;
    let kind = EngineKind::resolve(preference)?;
    tracing::info!(engine = %kind, preference = ?preference, "Execution engine selected");

    let runtime = kind.runtime()?;
    runtime.block_on(async move {
        if config.observability.metrics_enabled {
            let addr = config
                .observability
                .metrics_address
                .parse()
                .map_err(|_| StartupError::InvalidAddress(config.observability.metrics_address.clone()))?;
            metrics::init_metrics(addr)?;
        }

        let shutdown = Shutdown::new();
        let accelerators = start_accelerators(&config, &shutdown).await?;
        if accelerators.is_empty() {
            tracing::warn!("No accelerators configured; nothing to serve");
            return Ok(());
        }

        let signal = signals::wait().await;
        tracing::info!(signal, "Shutdown requested");
        shutdown.trigger();
        accelerators
            .join(Duration::from_secs(config.timeouts.shutdown_grace_secs))
            .await;
        Ok(())
    })
}
