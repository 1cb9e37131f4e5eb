//! Command-line interface.

pub mod commands;
pub mod display;

use clap::{Parser, Subcommand};

use commands::config::ConfigArgs;
use commands::evaluate::EvaluateArgs;
use commands::rules::RulesArgs;

#[derive(Parser, Debug)]
#[command(name = "warden")]
#[command(about = "Rule-based override and recovery decision engine", long_about = None)]
#[command(version)]
pub struct Cli {
    #[command(subcommand)]
    pub command: Commands,

    /// Output in JSON format
    #[arg(short, long, global = true)]
    pub json: bool,

    /// Configuration file, instead of .warden/config.yaml
    #[arg(short, long, global = true, env = "WARDEN_CONFIG")]
    pub config: Option<std::path::PathBuf>,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Inspect and validate rule files
    Rules(RulesArgs),

    /// Run events through the engine and show the decisions
    Evaluate(EvaluateArgs),

    /// Show the effective configuration
    Config(ConfigArgs),
}

/// Print an error and exit with a non-zero status.
pub fn handle_error(err: anyhow::Error, json_mode: bool) -> ! {
    if json_mode {
        let body = serde_json::json!({
            "success": false,
            "error": format!("{err:#}"),
        });
        println!(
            "{}",
            serde_json::to_string_pretty(&body).unwrap_or_default()
        );
    } else {
        eprintln!("{}", display::action_failure(&format!("{err:#}")));
    }
    std::process::exit(1);
}
