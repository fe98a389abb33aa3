//! Command parsing and dispatch. `main.rs` calls [`run`].

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use aiox::config::Config;
use aiox::utils::logging::init_logging;

#[derive(Parser)]
#[command(name = "aiox")]
#[command(about = "Multi-tenant XMPP gateway for conversational AI agents", long_about = None)]
struct Cli {
    /// Path to the JSON configuration file (environment overrides apply
    /// either way)
    #[arg(short, long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand)]
enum Commands {
    /// Run the platform
    Serve,
    /// Configuration helpers
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
enum ConfigAction {
    /// Validate the effective configuration and exit
    Check,
}

fn load(path: &Option<PathBuf>) -> Result<Config> {
    Ok(match path {
        Some(path) => Config::load_from_path(path)?,
        None => Config::from_env(),
    })
}

pub async fn run() -> Result<()> {
    let cli = Cli::parse();
    match cli.command {
        Commands::Serve => {
            let cfg = load(&cli.config)?;
            init_logging(&cfg.logging);
            cfg.validate()?;
            aiox::app::run(cfg, None).await?;
            Ok(())
        }
        Commands::Config {
            action: ConfigAction::Check,
        } => {
            let cfg = load(&cli.config)?;
            cfg.validate()?;
            println!("configuration OK");
            Ok(())
        }
        Commands::Version => {
            println!("aiox {}", env!("CARGO_PKG_VERSION"));
            Ok(())
        }
    }
}
