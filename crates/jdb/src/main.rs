//! JDB - JVM Debugger
//!
//! A step-by-step debugger that attaches to a running JVM.

use std::path::PathBuf;

use clap::{Parser, Subcommand, ValueEnum};
use eyre::Result;
use jdb_common::Config;

mod cmd;
mod notifier;

/// Command-line interface for JDB
#[derive(Debug, Parser)]
#[command(name = "jdb")]
#[command(about = "JVM Debugger - A step-by-step debugger for running JVM processes")]
#[command(version)]
pub struct Cli {
    /// Configuration file (default: ~/.jdb/config.toml)
    #[arg(long, global = true)]
    pub config: Option<PathBuf>,

    /// How stops are reported on stdout
    #[arg(long, value_enum, default_value = "text", global = true)]
    pub output: OutputFormat,

    /// Only log to the console, not to $TMP/jdb-logs
    #[arg(long, global = true)]
    pub no_log_file: bool,

    /// Command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available output formats
#[derive(Debug, Clone, Copy, PartialEq, Eq, ValueEnum)]
pub enum OutputFormat {
    /// Human-readable source listings
    Text,
    /// One JSON object per line
    Json,
}

/// Available commands
#[derive(Debug, Subcommand)]
pub enum Commands {
    /// Attach to a running JVM started with a JDWP agent
    Attach(cmd::AttachArgs),
}

#[tokio::main]
async fn main() -> Result<()> {
    // Load environment variables
    dotenv::dotenv().ok();

    // Parse CLI arguments
    let cli = Cli::parse();

    jdb_common::logging::init_logging("jdb", !cli.no_log_file)?;

    let config = match &cli.config {
        Some(path) => Config::load_from(path)?,
        None => Config::load()?,
    };

    match &cli.command {
        Commands::Attach(args) => cmd::attach(args, config, cli.output).await,
    }
}
