//! FXPulse - trading account monitor with rate-limited Telegram alerts.
//!
//! This is the main entry point.

use clap::Parser;
use std::process::ExitCode;

mod cli;
mod config;
mod error;
mod logging;
mod notify;
mod store;
mod telegram;
mod watch;
mod web;

use cli::Commands;

#[tokio::main]
async fn main() -> ExitCode {
    // Initialize logging. The guard flushes the file appender on drop,
    // so it has to live for the whole run.
    let _logging_guard = match logging::init() {
        Ok((guard, _log_dir)) => guard,
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
