//! Skiff container runtime CLI
//!
//! `skiff run` starts a container and exits with its command's exit code.
//! Failures before the command ran use the reserved codes in
//! [`skiff_core::exit`].

use clap::Parser;
use clap::error::ErrorKind as ClapErrorKind;
use std::process;
use tracing_subscriber::EnvFilter;

mod cli;
mod commands;

use cli::Cli;
use skiff_core::exit;

fn main() {
    let cli = match Cli::try_parse() {
        Ok(cli) => cli,
        Err(e) => {
            let code = match e.kind() {
                ClapErrorKind::DisplayHelp | ClapErrorKind::DisplayVersion => 0,
                _ => exit::INVALID_CONFIG,
            };
            let _ = e.print();
            process::exit(code);
        }
    };

    init_logging(cli.verbose);

    let code = match commands::dispatch(cli) {
        Ok(code) => code,
        Err(e) => {
            eprintln!("skiff: {e:#}");
            exit_code_for(&e)
        }
    };

    process::exit(code);
}

/// Logs go to stderr so the container's stdout stays its own
fn init_logging(verbose: bool) {
    let default = if verbose { "debug" } else { "warn" };
    let filter = EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new(default));

    tracing_subscriber::fmt()
        .with_env_filter(filter)
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();
}

fn exit_code_for(err: &anyhow::Error) -> i32 {
    err.downcast_ref::<skiff_core::Error>()
        .map_or(exit::RUNTIME_FAILURE, skiff_core::Error::exit_code)
}
