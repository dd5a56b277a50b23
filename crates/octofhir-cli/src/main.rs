mod cli;
mod commands;
mod logging;
mod output;

use anyhow::Result;
use clap::Parser;

use cli::{Cli, Commands};
use octofhir_search::config::loader::load_config;
use output::print_error;

#[tokio::main]
async fn main() {
    if let Err(e) = run().await {
        print_error(&format!("{e:#}"));
        std::process::exit(1);
    }
}

async fn run() -> Result<()> {
    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref()).map_err(anyhow::Error::msg)?;
    logging::init_tracing(cli.log_level.as_deref().unwrap_or(&config.logging.level));
    let format = cli.format.unwrap_or_default();

    match &cli.command {
        Commands::Extract(args) => {
            commands::extract::extract(&args.resource_type, &args.file, format)?;
        }
        Commands::Index(args) => {
            commands::index::index(&config, &args.db, &args.files).await?;
        }
        Commands::Search(args) => {
            commands::search::search(&config, args, format).await?;
        }
        Commands::Explain(args) => {
            commands::search::explain(&config, args)?;
        }
        Commands::Config => {
            print!("{}", config.to_toml()?);
        }
    }

    Ok(())
}
