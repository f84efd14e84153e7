//! Application configuration.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

use super::args::CliArgs;
use crate::infrastructure::image::ImagePipelineConfig;
use crate::infrastructure::image::disk_cache::{DEFAULT_MAX_CACHE_SIZE, default_cache_dir};
use crate::infrastructure::image::downsampler::{DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DECODE_ALLOC};
use crate::infrastructure::image::memory_cache::{DEFAULT_MAX_COST_BYTES, DEFAULT_MAX_ENTRIES};

pub(crate) const APP_NAME: &str = "thumbvault";
pub(crate) const APP_QUALIFIER: &str = "com";
pub(crate) const APP_ORGANIZATION: &str = "thumbvault";

/// Log level configuration.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize, clap::ValueEnum)]
#[serde(rename_all = "lowercase")]
pub enum LogLevel {
    /// Trace level.
    Trace,
    /// Debug level.
    Debug,
    /// Info level.
    #[default]
    Info,
    /// Warning level.
    Warn,
    /// Error level.
    Error,
}

impl std::fmt::Display for LogLevel {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Trace => write!(f, "trace"),
            Self::Debug => write!(f, "debug"),
            Self::Info => write!(f, "info"),
            Self::Warn => write!(f, "warn"),
            Self::Error => write!(f, "error"),
        }
    }
}

/// Cache configuration, read from TOML and overridden by CLI flags.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AppConfig {
    /// Configuration file path.
    #[serde(skip)]
    pub config: Option<PathBuf>,

    /// Log file path. Logs go to stderr when unset.
    #[serde(skip)]
    pub log_path: Option<PathBuf>,

    /// Log verbosity level.
    #[serde(default)]
    pub log_level: LogLevel,

    /// Disk cache directory override.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cache_dir: Option<PathBuf>,

    /// Memory tier limits.
    #[serde(default)]
    pub memory: MemoryConfig,

    /// Disk tier settings.
    #[serde(default)]
    pub disk: DiskConfig,

    /// Decoder limits.
    #[serde(default)]
    pub decode: DecodeConfig,
}

/// Memory tier limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct MemoryConfig {
    /// Maximum number of tracked keys.
    #[serde(default = "default_max_entries")]
    pub max_entries: usize,

    /// Maximum total decoded bytes.
    #[serde(default = "default_max_cost_bytes")]
    pub max_cost_bytes: u64,
}

impl Default for MemoryConfig {
    fn default() -> Self {
        Self {
            max_entries: DEFAULT_MAX_ENTRIES,
            max_cost_bytes: DEFAULT_MAX_COST_BYTES,
        }
    }
}

/// Disk tier settings.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DiskConfig {
    /// Persist downsampled images across launches.
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Size cap in bytes before the oldest entries are pruned.
    #[serde(default = "default_disk_max_size")]
    pub max_size: u64,

    /// JPEG quality (1-100) for stored entries.
    #[serde(default = "default_jpeg_quality")]
    pub jpeg_quality: u8,
}

impl Default for DiskConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_size: DEFAULT_MAX_CACHE_SIZE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
        }
    }
}

/// Decoder limits.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecodeConfig {
    /// Allocation ceiling for a single decode.
    #[serde(default = "default_max_alloc_bytes")]
    pub max_alloc_bytes: u64,
}

impl Default for DecodeConfig {
    fn default() -> Self {
        Self {
            max_alloc_bytes: DEFAULT_MAX_DECODE_ALLOC,
        }
    }
}

fn default_true() -> bool {
    true
}

fn default_max_entries() -> usize {
    DEFAULT_MAX_ENTRIES
}

fn default_max_cost_bytes() -> u64 {
    DEFAULT_MAX_COST_BYTES
}

fn default_disk_max_size() -> u64 {
    DEFAULT_MAX_CACHE_SIZE
}

fn default_jpeg_quality() -> u8 {
    DEFAULT_JPEG_QUALITY
}

fn default_max_alloc_bytes() -> u64 {
    DEFAULT_MAX_DECODE_ALLOC
}

impl AppConfig {
    /// Merges CLI arguments into the configuration.
    pub fn merge_with_args(&mut self, args: &CliArgs) {
        if let Some(config_path) = &args.config {
            self.config = Some(config_path.clone());
        }
        if let Some(log_path) = &args.log_path {
            self.log_path = Some(log_path.clone());
        }
        if let Some(log_level) = args.log_level {
            self.log_level = log_level;
        }
        if let Some(cache_dir) = &args.cache_dir {
            self.cache_dir = Some(cache_dir.clone());
        }
        if let Some(max_entries) = args.memory_max_entries {
            self.memory.max_entries = max_entries;
        }
        if let Some(max_size) = args.disk_max_size {
            self.disk.max_size = max_size;
        }
        if args.no_disk {
            self.disk.enabled = false;
        }
    }

    /// Returns effective disk cache directory.
    #[must_use]
    pub fn effective_cache_dir(&self) -> PathBuf {
        self.cache_dir.clone().unwrap_or_else(default_cache_dir)
    }

    /// Builds the pipeline configuration from these settings.
    #[must_use]
    pub fn pipeline_config(&self) -> ImagePipelineConfig {
        ImagePipelineConfig {
            memory_max_entries: self.memory.max_entries,
            memory_max_cost_bytes: self.memory.max_cost_bytes,
            disk_cache_size: self.disk.max_size,
            jpeg_quality: self.disk.jpeg_quality,
            max_decode_alloc: self.decode.max_alloc_bytes,
        }
    }
}

impl Default for AppConfig {
    fn default() -> Self {
        Self {
            config: None,
            log_path: None,
            log_level: LogLevel::Info,
            cache_dir: None,
            memory: MemoryConfig::default(),
            disk: DiskConfig::default(),
            decode: DecodeConfig::default(),
        }
    }
}
