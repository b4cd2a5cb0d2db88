//! CLI module for segcut
//!
//! This module handles command-line argument parsing and command execution.

use std::path::PathBuf;

use anyhow::Result;
use clap::{Parser, Subcommand};

use crate::utils::logging::{LogFormat, LogLevel};

pub mod args;
pub mod commands;

/// segcut - lossless segment export
///
/// Cuts media files into segments with stream copy, optionally re-encoding
/// only the lead-in of each segment for frame-accurate starts.
#[derive(Parser, Debug)]
#[command(name = "segcut")]
#[command(about = "segcut - Lossless segment export for media files")]
#[command(version)]
#[command(long_about = None)]
pub struct Cli {
    /// Logging level (RUST_LOG takes precedence)
    #[arg(long, value_enum, default_value = "warn", global = true)]
    pub log_level: LogLevel,

    /// Log output format
    #[arg(long, value_enum, default_value = "compact", global = true)]
    pub log_format: LogFormat,

    /// Configuration file (default: ./segcut.toml, then the user config dir)
    #[arg(long, global = true, env = "SEGCUT_CONFIG")]
    pub config: Option<PathBuf>,

    /// The command to execute
    #[command(subcommand)]
    pub command: Commands,
}

/// Available commands
#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Export segments of a media file
    Export(args::ExportArgs),
    /// Inspect media file information
    Inspect(args::InspectArgs),
    /// Look up keyframes near the given times
    Keyframe(args::KeyframeArgs),
    /// Check an edit decision list without touching any media
    ValidateEdl(args::ValidateEdlArgs),
    /// Convert files or whole directories one by one
    Batch(args::BatchArgs),
}

impl Cli {
    /// Whether progress sinks should print the extra detail lines
    pub fn verbose(&self) -> bool {
        matches!(
            self.log_level,
            LogLevel::Info | LogLevel::Debug | LogLevel::Trace
        )
    }
}

/// Execute the parsed command line
pub async fn run(cli: Cli) -> Result<()> {
    let verbose = cli.verbose();
    let config = cli.config.as_deref();
    match cli.command {
        Commands::Export(args) => commands::export(args, config, verbose).await,
        Commands::Inspect(args) => commands::inspect(args, config).await,
        Commands::Keyframe(args) => commands::keyframe(args, config).await,
        Commands::ValidateEdl(args) => commands::validate_edl(args).await,
        Commands::Batch(args) => commands::batch(args, config, verbose).await,
    }
}
