use std::path::PathBuf;
use std::process::ExitCode;
use std::sync::atomic::AtomicBool;
use std::sync::Arc;

use clap::Parser;
use ecm_relay::config::{self, LogLevel};
use ecm_relay::reactor::Relay;

/// TCP relay and protocol demultiplexer for the ECM1240 power meter.
#[derive(Parser)]
#[command(version, about)]
struct Args {
    /// Path to the INI-style configuration file.
    config_path: PathBuf,
}

fn init_logging(level: LogLevel) {
    tracing_subscriber::fmt().with_max_level(level.to_tracing_level()).init();
}

/// Logs the parsed configuration once at startup, replacing the source's
/// unconditional `print_config` stdout dump with a structured INFO event.
fn log_config(config: &config::RelayConfig) {
    tracing::info!(
        host = %config.input.host,
        port = config.input.port,
        connector = config.input.connector,
        "input connection configured"
    );
    for peer in &config.peers {
        tracing::info!(
            name = %peer.name,
            host = %peer.host,
            port = peer.port,
            connector = peer.connector,
            controller = peer.controller,
            connect_delay_s = peer.connect_delay.as_secs(),
            "peer connection configured"
        );
    }
}

fn install_signal_handlers(shutdown: &Arc<AtomicBool>) -> Result<(), std::io::Error> {
    signal_hook::flag::register(signal_hook::consts::SIGINT, Arc::clone(shutdown))?;
    signal_hook::flag::register(signal_hook::consts::SIGTERM, Arc::clone(shutdown))?;
    Ok(())
}

fn main() -> ExitCode {
    let args = Args::parse();

    let config = match config::load_from_path(&args.config_path) {
        Ok(config) => config,
        Err(e) => {
            println!("{e}");
            return ExitCode::FAILURE;
        }
    };

    init_logging(config.log_level);
    log_config(&config);

    let shutdown = Arc::new(AtomicBool::new(false));
    if let Err(e) = install_signal_handlers(&shutdown) {
        tracing::warn!(error = %e, "failed to install signal handlers");
    }

    let mut relay = match Relay::new(config) {
        Ok(relay) => relay,
        Err(e) => {
            tracing::error!(error = %e, "failed to initialize reactor");
            return ExitCode::FAILURE;
        }
    };
    relay.bootstrap();

    match relay.run(&shutdown) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %e, "reactor loop exited with error");
            ExitCode::FAILURE
        }
    }
}
