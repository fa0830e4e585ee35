use std::process::ExitCode;

use clap::Parser;
use tracing::{debug, error, info};

use playout_lib::config::{AppConfig, Args};
use playout_lib::logging::init_logging;

fn main() -> ExitCode {
    let config = match AppConfig::load(Args::parse()) {
        Ok(config) => config,
        Err(e) => {
            eprintln!("playout: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    let _guard = match init_logging(&config.log_file) {
        Ok(guard) => guard,
        Err(e) => {
            eprintln!("playout: {e:#}");
            return ExitCode::FAILURE;
        }
    };

    info!(version = env!("CARGO_PKG_VERSION"), "Playout starting");
    debug!(?config, "Resolved configuration");

    match playout_lib::run(config) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            error!("{e:#}");
            ExitCode::FAILURE
        }
    }
}
