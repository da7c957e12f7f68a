//! Aegis CLI: offline diagnostics for the agent execution engine.
//!
//! Commands:
//! - `budget`  : Show how a context window is split into section quotas
//! - `classify`: Decide whether a prompt would be planned first
//! - `compress`: Compress a tool output the way the context manager does
//! - `config`  : Show, validate or initialize configuration

use std::path::PathBuf;

use clap::{Parser, Subcommand};

mod commands;

#[derive(Parser)]
#[command(
    name = "aegis",
    about = "Aegis: agent execution engine diagnostics",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Use this config file instead of ~/.aegis/config.toml
    #[arg(short, long, global = true, env = "AEGIS_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Split a context window into section budgets
    Budget {
        /// Total window in tokens (defaults to the configured window for the model)
        total: Option<usize>,

        /// Resolve the window size for this model
        #[arg(short, long)]
        model: Option<String>,
    },

    /// Score a prompt and report whether it needs planning
    Classify {
        /// The prompt to classify
        #[arg(required = true, num_args = 1..)]
        prompt: Vec<String>,

        /// Print the full breakdown as JSON
        #[arg(long)]
        json: bool,
    },

    /// Compress a tool output read from a file or stdin
    Compress {
        /// Read the tool output from this file instead of stdin
        #[arg(short, long)]
        file: Option<PathBuf>,

        /// Name of the tool that produced the output
        #[arg(short, long)]
        tool: Option<String>,
    },

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration
    Show,
    /// Check the configuration and report problems
    Validate,
    /// Print the config file path
    Path,
    /// Write a default config file
    Init {
        /// Overwrite an existing file
        #[arg(long)]
        force: bool,
    },
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();

    // Initialize tracing
    let filter = if cli.verbose { "debug" } else { "info" };
    tracing_subscriber::fmt()
        .with_env_filter(
            tracing_subscriber::EnvFilter::try_from_default_env()
                .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter)),
        )
        .with_target(false)
        .with_writer(std::io::stderr)
        .init();

    let config_path = cli.config.as_deref();
    match cli.command {
        Commands::Budget { total, model } => {
            commands::budget::run(config_path, total, model.as_deref()).await?
        }
        Commands::Classify { prompt, json } => commands::classify::run(&prompt.join(" "), json).await?,
        Commands::Compress { file, tool } => {
            commands::compress::run(file.as_deref(), tool.as_deref()).await?
        }
        Commands::Config { action } => match action {
            ConfigAction::Show => commands::config_cmd::show(config_path).await?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path).await?,
            ConfigAction::Path => commands::config_cmd::path(config_path).await?,
            ConfigAction::Init { force } => commands::config_cmd::init(config_path, force).await?,
        },
    }

    Ok(())
}
