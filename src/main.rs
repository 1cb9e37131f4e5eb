//! Warden CLI entry point.

use anyhow::Result;
use clap::Parser;

use warden::cli::{commands, handle_error, Cli, Commands};
use warden::infrastructure::config::ConfigLoader;
use warden::infrastructure::logging::{LogConfig, LoggerImpl};

#[tokio::main]
async fn main() {
    let cli = Cli::parse();
    let json_mode = cli.json;

    if let Err(err) = run(cli).await {
        handle_error(err, json_mode);
    }
}

async fn run(cli: Cli) -> Result<()> {
    let config = match cli.config {
        Some(ref path) => ConfigLoader::load_from_file(path)?,
        None => ConfigLoader::load()?,
    };
    let _logger = LoggerImpl::init(&LogConfig::from(&config.logging))?;

    match cli.command {
        Commands::Rules(args) => commands::rules::execute(args, &config, cli.json).await,
        Commands::Evaluate(args) => commands::evaluate::execute(args, &config, cli.json).await,
        Commands::Config(args) => commands::config::execute(args, &config, cli.json),
    }
}
