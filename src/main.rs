//! Majordomo - Agent messaging substrate and orchestration core.
//!
//! This is the main entry point for the CLI.

use clap::Parser;
use std::process::ExitCode;

mod cli;
mod config;
mod director;
mod error;
mod logging;
mod protocol;
mod runtime;
mod synthesis;
mod transport;

use cli::Commands;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging; the guard flushes the file appender on exit.
    let _guard = match logging::init() {
        Ok((guard, _)) => guard,
        Err(e) => {
            eprintln!("Failed to initialize logging: {}", e);
            return ExitCode::FAILURE;
        }
    };

    // Parse command line arguments
    let args = Commands::parse();

    // Run the command
    match args.run().await {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!("{}", e);
            eprintln!("Error: {}", e);
            ExitCode::FAILURE
        }
    }
}
