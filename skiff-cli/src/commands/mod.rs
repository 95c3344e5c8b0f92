use anyhow::Result;

use crate::cli::{Cli, Commands};

pub mod child;
pub mod run;

/// Dispatch command to appropriate handler, returning the process exit code
pub fn dispatch(cli: Cli) -> Result<i32> {
    match cli.command {
        Commands::Run(args) => run::execute(args, cli.verbose),
        Commands::Child(args) => child::execute(args, cli.verbose),
    }
}
