//! patchvol CLI: the main entry point.
//!
//! Commands:
//! - `simulate`: Tile synthetic volumes, stream the patches through the
//!   assembly pipeline and verify the reassembled subjects
//! - `status`: Show the effective configuration
//! - `config`: Show, validate or locate the configuration file

use clap::{Parser, Subcommand};
use patchvol_config::{AppConfig, LoggingConfig};
use std::path::PathBuf;

mod commands;

#[derive(Parser)]
#[command(
    name = "patchvol",
    about = "patchvol: subject assembly for patch-based volumetric inference",
    version,
    author
)]
struct Cli {
    #[command(subcommand)]
    command: Commands,

    /// Enable verbose logging
    #[arg(short, long, global = true)]
    verbose: bool,

    /// Read this config file instead of ~/.patchvol/config.toml
    #[arg(short, long, global = true, env = "PATCHVOL_CONFIG")]
    config: Option<PathBuf>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run a synthetic tiling workload through the assembler
    Simulate(commands::simulate::SimulateArgs),

    /// Show the effective configuration
    Status,

    /// Configuration management
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Print the effective configuration as TOML
    Show {
        /// Print built-in defaults instead
        #[arg(long)]
        defaults: bool,
    },
    /// Load and validate the configuration
    Validate,
    /// Print the config file path
    Path,
}

fn init_tracing(logging: &LoggingConfig, verbose: bool) {
    let filter = if verbose { "debug" } else { logging.level.as_str() };
    let env_filter = tracing_subscriber::EnvFilter::try_from_default_env()
        .unwrap_or_else(|_| tracing_subscriber::EnvFilter::new(filter));

    if logging.json {
        tracing_subscriber::fmt()
            .json()
            .with_env_filter(env_filter)
            .init();
    } else {
        tracing_subscriber::fmt()
            .with_env_filter(env_filter)
            .with_target(false)
            .init();
    }
}

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    let cli = Cli::parse();
    let config_path = cli.config.as_deref();

    // `config validate` reports load failures itself
    if let Commands::Config {
        action: ConfigAction::Validate,
    } = &cli.command
    {
        init_tracing(&LoggingConfig::default(), cli.verbose);
        return commands::config_cmd::validate(config_path).await;
    }

    let config =
        AppConfig::load_at(config_path).map_err(|e| format!("Failed to load config: {e}"))?;
    init_tracing(&config.logging, cli.verbose);

    match cli.command {
        Commands::Simulate(args) => commands::simulate::run(config, args).await?,
        Commands::Status => commands::status::run(&config, config_path).await?,
        Commands::Config { action } => match action {
            ConfigAction::Show { defaults } => commands::config_cmd::show(&config, defaults).await?,
            ConfigAction::Validate => commands::config_cmd::validate(config_path).await?,
            ConfigAction::Path => commands::config_cmd::path(config_path).await?,
        },
    }

    Ok(())
}
