//! # clinqc command-line entry point
//!
//! ```text
//! main()
//!   │
//!   ├─> Parse CLI arguments (clap)
//!   ├─> Load configuration (--config, or the layout under --root)
//!   ├─> Initialize logging (stderr + daily log file)
//!   └─> Execute the subcommand
//! ```
//!
//! Any error is printed with its context chain and the process exits non-zero.

#![warn(clippy::all, rust_2018_idioms)]
#![expect(clippy::print_stdout, clippy::print_stderr)] // Allow println!/eprintln! in main binary

mod cli;

use clap::Parser as _;
use std::process::ExitCode;

fn main() -> ExitCode {
    let cli = cli::Cli::parse();

    match run(cli) {
        Ok(()) => ExitCode::SUCCESS,
        Err(e) => {
            eprintln!("Error: {e:#}");
            ExitCode::FAILURE
        }
    }
}

fn run(cli: cli::Cli) -> anyhow::Result<()> {
    let config = cli.load_config()?;

    // A broken log directory should not stop the pipeline
    if let Err(e) = clinqc::logging::init(&config.log_dir, cli.verbose) {
        eprintln!("Warning: logging disabled: {e:#}");
    } else {
        tracing::debug!(
            "Writing logs to {}",
            clinqc::logging::current_log_path(&config.log_dir).display()
        );
    }

    cli::run_command(cli.command, config, &cli.root)
}
