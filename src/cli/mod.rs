//! CLI module: command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod ask;
pub mod common;
pub mod config;
pub mod plugins;

use std::path::PathBuf;

use anyhow::Result;
use clap::{CommandFactory, Parser, Subcommand};

#[derive(Parser)]
#[command(name = "nexus-agent")]
#[command(version)]
#[command(about = "Modular agent runtime: event bus, plugins and LLM orchestration", long_about = None)]
struct Cli {
    /// Config file (defaults to ~/.nexus-agent/config.json)
    #[arg(long, global = true, value_name = "PATH")]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Run one instruction through the orchestrator
    Ask {
        /// Natural-language instruction
        instruction: String,
        /// Conversation channel (e.g. "telegram:12345")
        #[arg(short, long, default_value = "cli")]
        channel: String,
        /// Print the full task result as JSON
        #[arg(long)]
        json: bool,
    },
    /// Discover plugins and list what got registered
    Plugins {
        /// Plugin directory (overrides plugins.dir)
        #[arg(short, long)]
        dir: Option<PathBuf>,
        /// Recreate this plugin from its factory after discovery
        #[arg(long, value_name = "NAME")]
        reload: Option<String>,
    },
    /// Inspect configuration
    Config {
        #[command(subcommand)]
        action: ConfigAction,
    },
    /// Show version information
    Version,
}

#[derive(Subcommand)]
pub enum ConfigAction {
    /// Validate the config file
    Check,
    /// Print the effective configuration (file + environment)
    Show,
}

/// Entry point for the CLI, called from main().
pub async fn run() -> Result<()> {
    // .env first so NEXUS_* overrides apply to the config below
    let _ = dotenvy::dotenv();

    let cli = Cli::parse();
    let config_path = cli
        .config
        .clone()
        .unwrap_or_else(nexus_agent::config::Config::path);

    // Logging settings come from the config; fall back to defaults when it
    // is missing or unreadable.
    let logging_cfg = nexus_agent::config::Config::load_from_path(&config_path)
        .map(|c| c.logging)
        .unwrap_or_default();
    if let Err(e) = nexus_agent::utils::logging::init_logging(&logging_cfg) {
        eprintln!("Warning: {}", e);
    }

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Version) => {
            cmd_version();
        }
        Some(Commands::Ask {
            instruction,
            channel,
            json,
        }) => {
            ask::cmd_ask(&config_path, instruction, channel, json).await?;
        }
        Some(Commands::Plugins { dir, reload }) => {
            plugins::cmd_plugins(&config_path, dir, reload).await?;
        }
        Some(Commands::Config { action }) => {
            config::cmd_config(&config_path, action).await?;
        }
    }

    Ok(())
}

/// Display version information
fn cmd_version() {
    println!("nexus-agent {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Modular agent runtime: event bus, plugins and LLM orchestration");
}
