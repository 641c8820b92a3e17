//! # Renewal command-line entry point
//!
//! ```bash
//! renewal train policies.xlsx --family tree
//! renewal score march.csv --output march_scored.csv
//! renewal predict --field age=42 --field plan=gold
//! renewal rules --top 5
//! ```
//!
//! Set `RUST_LOG=debug` to see detailed logs on stderr. A failed command
//! exits with status 2 when its input was rejected and 1 otherwise.

#![warn(clippy::all, rust_2018_idioms)]
#![expect(clippy::print_stdout)] // Allow println! in main binary
#![expect(clippy::print_stderr)]

mod cli;

use clap::Parser as _;
use std::process::ExitCode;

fn main() -> ExitCode {
    if let Err(e) = renewal::logging::init() {
        eprintln!("Error: {e:#}");
        return ExitCode::FAILURE;
    }

    let cli = cli::Cli::parse();
    match cli::run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            tracing::error!(error = %format!("{e:#}"), "Command failed");
            eprintln!("Error: {e:#}");
            cli::exit_code(&e)
        }
    }
}
