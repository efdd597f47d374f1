//! Lockscope: empirical probe for row-to-table lock escalation and
//! cross-session lock visibility.
//!
//! This is the main entry point for the `lockscope` CLI. It parses arguments,
//! installs logging, resolves the configuration, dispatches to the selected
//! mode, and maps errors to exit codes.

mod cli;
mod commands;
pub mod config;
pub mod db;
pub mod error;
pub mod exit_codes;
pub mod harness;
mod logging;
pub mod observer;
pub mod pool;
pub mod provision;
pub mod sync;
pub mod threshold;
pub mod transcript;
pub mod txwait;

#[cfg(test)]
mod test_support;

use cli::Cli;
use config::Config;
use logging::Verbosity;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = Cli::parse_args();
    logging::init(Verbosity::from_flags(cli.verbose, cli.quiet), cli.no_color);

    let outcome = Config::resolve(cli.config.as_deref())
        .and_then(|config| commands::dispatch(cli.command, &config));

    match outcome {
        Ok(()) => ExitCode::from(exit_codes::SUCCESS as u8),
        Err(err) => {
            tracing::debug!(error = ?err, "command failed");
            // Print user-actionable error message to stderr
            eprintln!("Error: {}", err);

            // Return appropriate exit code
            ExitCode::from(err.exit_code() as u8)
        }
    }
}
