//! CLI module - command parsing and dispatch
//!
//! All CLI logic lives here. `main.rs` calls `cli::run()`.

pub mod config;
pub mod demo;

use std::path::PathBuf;

use anyhow::{Context, Result};
use clap::{CommandFactory, Parser, Subcommand};

use robobus::config::Config;

#[derive(Parser)]
#[command(name = "robobus")]
#[command(version)]
#[command(about = "Message bus, agents and scheduler for robot control units", long_about = None)]
struct Cli {
    /// Config file to use instead of ~/.robobus/config.json
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Option<Commands>,
}

#[derive(Subcommand)]
enum Commands {
    /// Drive a simulated distance sensor into a motor agent
    Demo {
        /// Number of sensor readings to take
        #[arg(long, default_value_t = 8)]
        ticks: u32,
        /// Milliseconds between readings
        #[arg(long, default_value_t = 50)]
        period_ms: u64,
    },
    /// Print the effective configuration
    Config,
    /// Show version information
    Version,
}

/// Entry point for the CLI - called from main().
pub fn run() -> Result<()> {
    let cli = Cli::parse();

    // Load config first so logging respects its settings.
    let config = match &cli.config {
        Some(path) => Config::load_from_path(path),
        None => Config::load(),
    }
    .with_context(|| "Failed to load configuration")?;
    robobus::utils::logging::init_logging(&config.logging)
        .with_context(|| "Failed to initialize logging")?;

    match cli.command {
        None => {
            let mut cmd = Cli::command();
            cmd.print_help()?;
            println!();
        }
        Some(Commands::Demo { ticks, period_ms }) => {
            demo::cmd_demo(&config, ticks, period_ms)?;
        }
        Some(Commands::Config) => {
            config::cmd_config(&config, cli.config.as_deref())?;
        }
        Some(Commands::Version) => {
            cmd_version();
        }
    }

    Ok(())
}

fn cmd_version() {
    println!("robobus {}", env!("CARGO_PKG_VERSION"));
    println!();
    println!("Message bus, agents and scheduler for robot control units");
}
