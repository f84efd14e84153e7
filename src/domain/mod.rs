//! Domain layer with core cache types and port definitions.

/// Entity definitions.
pub mod entities;
/// Memory-pressure signal.
pub mod memory_pressure;
/// Port definitions.
pub mod ports;
/// Pure domain services.
pub mod services;

pub use entities::{CacheKey, ImageSource, LoadedImage, TargetSize};
pub use memory_pressure::MemoryPressure;
pub use ports::{CacheError, CacheResult, ImageCachePort, ImageResolverPort};
pub use services::content_hasher;
