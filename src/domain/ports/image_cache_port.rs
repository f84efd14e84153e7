//! Port definitions for image caching.

use std::sync::Arc;

use bytes::Bytes;

use crate::domain::entities::{CacheKey, LoadedImage, TargetSize};

/// Result type for cache construction and internal tier operations.
pub type CacheResult<T> = std::result::Result<T, CacheError>;

/// Errors raised inside the cache tiers.
///
/// Only construction surfaces these to callers; at runtime every variant is
/// logged and treated as a miss.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CacheError {
    /// Failed to decode or encode an image.
    #[error("Decode error: {0}")]
    DecodeError(String),
    /// I/O error during a cache operation.
    #[error("IO error: {0}")]
    IoError(String),
    /// A blocking worker was cancelled or panicked.
    #[error("Task error: {0}")]
    TaskError(String),
}

/// Port for the in-memory image tier.
/// Implementations must be thread-safe.
pub trait ImageCachePort: Send + Sync {
    /// Returns the cached image and marks it most recently used.
    fn get(&self, key: &CacheKey) -> Option<Arc<image::DynamicImage>>;

    /// Stores an image, marking it most recently used.
    fn set(&self, key: CacheKey, image: Arc<image::DynamicImage>);

    /// Removes a single key.
    fn remove(&self, key: &CacheKey);

    /// Removes every key starting with `prefix`.
    fn remove_all_with_prefix(&self, prefix: &str);

    /// Removes everything.
    fn remove_all(&self);

    /// Returns the current number of resident images.
    fn len(&self) -> usize;

    /// Returns true if the cache is empty.
    fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

/// Consumer-facing port: get-or-produce an image for display.
///
/// `None` means the caller should show a placeholder.
#[async_trait::async_trait]
pub trait ImageResolverPort: Send + Sync {
    /// Resolves `key` through memory, disk, then a fresh downsample of
    /// `source`.
    async fn resolve(
        &self,
        source: Bytes,
        key: &CacheKey,
        target: TargetSize,
        scale: f32,
    ) -> Option<LoadedImage>;

    /// Drops every cached variant sharing `prefix`.
    fn invalidate(&self, prefix: &str);
}
