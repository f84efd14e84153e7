//! Image caching infrastructure.
//!
//! This module provides:
//! - Bounded decoding and downsampling
//! - Memory caching with LRU eviction over a cost-bounded store
//! - Disk caching for persistence across launches
//! - The get-or-produce resolution pipeline

pub mod disk_cache;
pub mod downsampler;
pub mod eviction_log;
pub mod memory_cache;
pub mod pipeline;

pub use disk_cache::DiskImageCache;
pub use downsampler::{Downsampler, downsample, encode_jpeg};
pub use eviction_log::{EvictionLog, EvictionRecord};
pub use memory_cache::{CacheStats, MemoryImageCache, image_cost};
pub use pipeline::{ImagePipeline, ImagePipelineConfig};
