mod cli;
mod commands;
mod signal_handler;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use fixturegen::logging;

fn main() -> Result<()> {
    // Parse CLI arguments
    let cli = Cli::parse();

    // Initialize structured logging
    logging::init(cli.verbose);

    let config = cli.config.as_deref();

    // Dispatch to appropriate command handler
    match &cli.command {
        Commands::Run(args) => commands::run::run(args, config),
        Commands::All(args) => commands::all::run(args, config),
        Commands::List(args) => commands::list::run(args, config),
        Commands::Plan(args) => commands::plan::run(args, config),
        Commands::Init(args) => commands::init::run(args),
    }
}
