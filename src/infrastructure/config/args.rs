use super::app_config::LogLevel;
use clap::{Parser, Subcommand};
use std::path::PathBuf;

/// Command-line arguments.
#[derive(Debug, Parser)]
#[command(
    name = "thumbvault",
    version,
    about = "Two-tier thumbnail cache for on-device photo libraries",
    long_about = None
)]
pub struct CliArgs {
    /// Configuration file path.
    #[arg(short, long, value_name = "PATH")]
    pub config: Option<PathBuf>,

    /// Disk cache directory.
    #[arg(long, value_name = "PATH")]
    pub cache_dir: Option<PathBuf>,

    /// Log file path.
    #[arg(long, value_name = "PATH")]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[arg(long, value_enum)]
    pub log_level: Option<LogLevel>,

    /// Maximum tracked keys in the memory tier.
    #[arg(long)]
    pub memory_max_entries: Option<usize>,

    /// Disk cache size cap in bytes.
    #[arg(long)]
    pub disk_max_size: Option<u64>,

    /// Run with the memory tier only.
    #[arg(long)]
    pub no_disk: bool,

    #[command(subcommand)]
    pub command: Command,
}

/// Subcommands.
#[derive(Debug, Clone, Subcommand)]
pub enum Command {
    /// Resolve an image file through the pipeline and report each tier hit.
    Warm {
        /// Encoded image file.
        #[arg(value_name = "FILE")]
        file: PathBuf,

        /// Logical id of the image. Defaults to a hash of the file contents.
        #[arg(long)]
        id: Option<String>,

        /// Target width in points.
        #[arg(long)]
        width: f32,

        /// Target height in points.
        #[arg(long)]
        height: f32,

        /// Display scale factor.
        #[arg(long, default_value_t = 1.0)]
        scale: f32,
    },

    /// Print disk cache statistics.
    Stats {
        /// Emit JSON instead of text.
        #[arg(long)]
        json: bool,
    },

    /// Remove every disk cache entry.
    Clear,
}
