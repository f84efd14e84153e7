//! Infrastructure layer with cache adapters and configuration.

/// Application configuration.
pub mod config;
/// Image handling (decoding, caching, resolution).
pub mod image;

pub use config::{AppConfig, CliArgs, Command, ConfigError, LogLevel, StorageManager};
pub use self::image::{
    CacheStats, DiskImageCache, Downsampler, EvictionLog, ImagePipeline, ImagePipelineConfig,
    MemoryImageCache,
};
