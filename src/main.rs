//! pssh CLI entry point

use clap::Parser;
use pssh::cli::Cli;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse();

    // Initialize logger
    let level = if cli.verbose { "debug" } else { "warn" };
    env_logger::Builder::from_env(env_logger::Env::default().default_filter_or(level)).init();

    log::info!("pssh v{}", env!("CARGO_PKG_VERSION"));

    match pssh::app::run(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("pssh: {:#}", e);
            ExitCode::from(1)
        }
    }
}
