//! kse CLI entry point

use anyhow::{Context, Result};
use clap::Parser;
use kse::cli::{commands, Cli, Commands};
use kse::infrastructure::config::ConfigLoader;
use kse::infrastructure::logging;

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config = ConfigLoader::load(&cli.workspace).context("Failed to load configuration")?;
    logging::init(&config.logging).context("Failed to initialize logging")?;

    match cli.command {
        Commands::Run {
            specs,
            max_parallel,
            deps,
        } => {
            commands::handle_run(&cli.workspace, config, specs, max_parallel, deps, cli.json)
                .await
        }
        Commands::Status => commands::handle_status(&cli.workspace, cli.json),
        Commands::Prompt { spec } => commands::handle_prompt(&cli.workspace, &config, &spec),
    }
}
