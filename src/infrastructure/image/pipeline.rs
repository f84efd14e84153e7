//! Get-or-produce image resolution.
//!
//! Implements a three-tier lookup: Memory -> Disk -> Downsample.

use std::collections::HashMap;
use std::path::PathBuf;
use std::sync::Arc;

use bytes::Bytes;
use image::DynamicImage;
use parking_lot::Mutex;
use tokio::sync::mpsc;
use tokio::task::JoinHandle;
use tokio_util::sync::CancellationToken;
use tokio_util::task::TaskTracker;
use tracing::{debug, error, info, trace, warn};

use crate::domain::entities::{CacheKey, ImageSource, LoadedImage, TargetSize};
use crate::domain::memory_pressure::MemoryPressure;
use crate::domain::ports::{CacheResult, ImageCachePort, ImageResolverPort};

use super::disk_cache::{DEFAULT_MAX_CACHE_SIZE, DiskImageCache};
use super::downsampler::{
    DEFAULT_JPEG_QUALITY, DEFAULT_MAX_DECODE_ALLOC, Downsampler, encode_jpeg,
};
use super::memory_cache::{
    CacheStats, DEFAULT_MAX_COST_BYTES, DEFAULT_MAX_ENTRIES, MemoryImageCache,
};

/// Configuration for the image pipeline.
#[derive(Debug, Clone)]
pub struct ImagePipelineConfig {
    /// Maximum tracked keys in the memory cache.
    pub memory_max_entries: usize,
    /// Maximum total byte cost in the memory cache.
    pub memory_max_cost_bytes: u64,
    /// Maximum disk cache size in bytes.
    pub disk_cache_size: u64,
    /// JPEG quality for disk entries.
    pub jpeg_quality: u8,
    /// Decoder allocation ceiling.
    pub max_decode_alloc: u64,
}

impl Default for ImagePipelineConfig {
    fn default() -> Self {
        Self {
            memory_max_entries: DEFAULT_MAX_ENTRIES,
            memory_max_cost_bytes: DEFAULT_MAX_COST_BYTES,
            disk_cache_size: DEFAULT_MAX_CACHE_SIZE,
            jpeg_quality: DEFAULT_JPEG_QUALITY,
            max_decode_alloc: DEFAULT_MAX_DECODE_ALLOC,
        }
    }
}

/// Resolves images from memory, disk, or a fresh downsample.
///
/// Construct once at startup and share by `Arc`. Never surfaces errors:
/// every failure ends in `None` and a placeholder on screen.
pub struct ImagePipeline {
    memory_cache: Arc<MemoryImageCache>,
    disk_cache: Option<Arc<DiskImageCache>>,
    downsampler: Downsampler,
    /// In-flight jobs per key.
    pending: Arc<Mutex<HashMap<CacheKey, usize>>>,
    tasks: TaskTracker,
    config: ImagePipelineConfig,
}

impl std::fmt::Debug for ImagePipeline {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ImagePipeline")
            .field("config", &self.config)
            .field("disk", &self.disk_cache.is_some())
            .finish_non_exhaustive()
    }
}

impl ImagePipeline {
    /// Creates a pipeline. Without a disk cache only memory is used.
    #[must_use]
    pub fn new(config: ImagePipelineConfig, disk_cache: Option<Arc<DiskImageCache>>) -> Self {
        let memory_cache = Arc::new(MemoryImageCache::new(
            config.memory_max_entries,
            config.memory_max_cost_bytes,
        ));

        Self {
            memory_cache,
            disk_cache,
            downsampler: Downsampler::new(config.max_decode_alloc),
            pending: Arc::new(Mutex::new(HashMap::new())),
            tasks: TaskTracker::new(),
            config,
        }
    }

    /// Creates a pipeline whose disk tier lives in `dir`, capped at
    /// `config.disk_cache_size`.
    ///
    /// # Errors
    /// Returns error if the disk cache directory cannot be created.
    pub async fn with_disk_dir(config: ImagePipelineConfig, dir: PathBuf) -> CacheResult<Self> {
        let disk_cache = Arc::new(DiskImageCache::new(dir, config.disk_cache_size).await?);
        Ok(Self::new(config, Some(disk_cache)))
    }

    /// Resolves `key`, producing it from `source` on a full miss.
    ///
    /// Order: memory, then disk (promoting into memory), then a downsample of
    /// `source` stored into both tiers. The downsample runs in its own task
    /// which populates the caches even if this future is dropped.
    pub async fn resolve(
        &self,
        source: Bytes,
        key: &CacheKey,
        target: TargetSize,
        scale: f32,
    ) -> Option<LoadedImage> {
        if let Some(image) = self.memory_cache.get(key) {
            return Some(LoadedImage {
                key: key.clone(),
                image,
                source: ImageSource::Memory,
            });
        }

        if let Some(image) = self.load_from_disk(key).await {
            self.memory_cache.set(key.clone(), image.clone());
            return Some(LoadedImage {
                key: key.clone(),
                image,
                source: ImageSource::Disk,
            });
        }

        let job = ProduceJob {
            memory_cache: self.memory_cache.clone(),
            disk_cache: self.disk_cache.clone(),
            downsampler: self.downsampler,
            jpeg_quality: self.config.jpeg_quality,
            tasks: self.tasks.clone(),
            _pending: PendingGuard::new(self.pending.clone(), key.clone()),
        };
        let key = key.clone();
        let handle = self
            .tasks
            .spawn(async move { job.run(source, key, target, scale).await });

        match handle.await {
            Ok(result) => result,
            Err(e) => {
                error!(error = %e, "Downsample task failed");
                None
            }
        }
    }

    /// Like [`resolve`](Self::resolve), but gives up with `None` once
    /// `cancel` fires. An in-flight downsample still completes and is cached.
    pub async fn resolve_with_cancel(
        &self,
        source: Bytes,
        key: &CacheKey,
        target: TargetSize,
        scale: f32,
        cancel: &CancellationToken,
    ) -> Option<LoadedImage> {
        tokio::select! {
            biased;
            () = cancel.cancelled() => {
                debug!(key = %key, "Image resolve cancelled");
                None
            }
            result = self.resolve(source, key, target, scale) => result,
        }
    }

    async fn load_from_disk(&self, key: &CacheKey) -> Option<Arc<DynamicImage>> {
        let disk_cache = self.disk_cache.as_ref()?;
        let bytes = disk_cache.read(key).await?;

        let downsampler = self.downsampler;
        let result = tokio::task::spawn_blocking(move || downsampler.decode(&bytes)).await;

        match result {
            Ok(Ok(image)) => {
                debug!(key = %key, "Decoded image from disk cache");
                Some(Arc::new(image))
            }
            Ok(Err(e)) => {
                warn!(key = %key, error = %e, "Dropping undecodable disk cache entry");
                disk_cache.remove(key).await;
                None
            }
            Err(e) => {
                error!(key = %key, error = %e, "Decode task panicked");
                None
            }
        }
    }

    /// Drops every memory variant whose key starts with `prefix`, e.g. when
    /// the owning photo is deleted.
    pub fn invalidate(&self, prefix: &str) {
        self.memory_cache.remove_all_with_prefix(prefix);
    }

    /// Removes `key` from both tiers.
    pub async fn remove(&self, key: &CacheKey) {
        self.memory_cache.remove(key);
        if let Some(disk_cache) = &self.disk_cache {
            disk_cache.remove(key).await;
        }
    }

    /// Clears all caches.
    pub async fn clear_all(&self) {
        self.memory_cache.remove_all();
        if let Some(disk_cache) = &self.disk_cache {
            disk_cache.remove_all().await;
        }
        info!("Cleared all image caches");
    }

    /// Responds to a low-memory signal by emptying the memory tier.
    pub fn handle_memory_pressure(&self, level: MemoryPressure) {
        handle_memory_pressure(&self.memory_cache, level);
    }

    /// Clears the memory tier on every event from `events` until the sender
    /// side closes.
    pub fn spawn_memory_pressure_listener(
        &self,
        mut events: mpsc::UnboundedReceiver<MemoryPressure>,
    ) -> JoinHandle<()> {
        let memory_cache = self.memory_cache.clone();
        tokio::spawn(async move {
            while let Some(level) = events.recv().await {
                handle_memory_pressure(&memory_cache, level);
            }
            trace!("Memory pressure listener stopped");
        })
    }

    /// Returns true if `key` is being downsampled.
    #[must_use]
    pub fn is_loading(&self, key: &CacheKey) -> bool {
        self.pending.lock().contains_key(key)
    }

    /// Returns the number of distinct keys being downsampled.
    #[must_use]
    pub fn pending_count(&self) -> usize {
        self.pending.lock().len()
    }

    /// Waits for in-flight downsamples and disk writes to finish.
    pub async fn wait_idle(&self) {
        self.tasks.close();
        self.tasks.wait().await;
        self.tasks.reopen();
    }

    /// Returns memory cache statistics.
    #[must_use]
    pub fn memory_cache_stats(&self) -> CacheStats {
        self.memory_cache.stats()
    }

    /// The memory tier.
    #[must_use]
    pub fn memory_cache(&self) -> &Arc<MemoryImageCache> {
        &self.memory_cache
    }

    /// The disk tier, if enabled.
    #[must_use]
    pub fn disk_cache(&self) -> Option<&Arc<DiskImageCache>> {
        self.disk_cache.as_ref()
    }
}

#[async_trait::async_trait]
impl ImageResolverPort for ImagePipeline {
    async fn resolve(
        &self,
        source: Bytes,
        key: &CacheKey,
        target: TargetSize,
        scale: f32,
    ) -> Option<LoadedImage> {
        Self::resolve(self, source, key, target, scale).await
    }

    fn invalidate(&self, prefix: &str) {
        Self::invalidate(self, prefix);
    }
}

fn handle_memory_pressure(memory_cache: &MemoryImageCache, level: MemoryPressure) {
    let resident = memory_cache.len();
    memory_cache.remove_all();
    info!(level = %level, dropped = resident, "Memory pressure, cleared image cache");
}

/// Work for one full miss, detached from the caller.
struct ProduceJob {
    memory_cache: Arc<MemoryImageCache>,
    disk_cache: Option<Arc<DiskImageCache>>,
    downsampler: Downsampler,
    jpeg_quality: u8,
    tasks: TaskTracker,
    _pending: PendingGuard,
}

impl ProduceJob {
    async fn run(
        self,
        source: Bytes,
        key: CacheKey,
        target: TargetSize,
        scale: f32,
    ) -> Option<LoadedImage> {
        let downsampler = self.downsampler;
        let decoded = tokio::task::spawn_blocking(move || {
            downsampler.downsample(&source, target, scale)
        })
        .await;

        let image = match decoded {
            Ok(Some(image)) => Arc::new(image),
            Ok(None) => {
                debug!(key = %key, "No image produced");
                return None;
            }
            Err(e) => {
                error!(key = %key, error = %e, "Downsample task panicked");
                return None;
            }
        };

        self.memory_cache.set(key.clone(), image.clone());

        if let Some(disk_cache) = self.disk_cache {
            let image = image.clone();
            let key = key.clone();
            let quality = self.jpeg_quality;
            self.tasks.spawn(async move {
                let encoded =
                    tokio::task::spawn_blocking(move || encode_jpeg(&image, quality)).await;
                match encoded {
                    Ok(Ok(bytes)) => disk_cache.write(&key, &bytes).await,
                    Ok(Err(e)) => warn!(key = %key, error = %e, "Failed to encode for disk cache"),
                    Err(e) => error!(key = %key, error = %e, "Encode task panicked"),
                }
            });
        }

        debug!(key = %key, source = "decoded", "Image produced");

        Some(LoadedImage {
            key,
            image,
            source: ImageSource::Decoded,
        })
    }
}

/// Counts one in-flight job for a key until the job finishes or is dropped.
///
/// Jobs for the same key may overlap; the key stays pending until the last
/// one ends.
struct PendingGuard {
    pending: Arc<Mutex<HashMap<CacheKey, usize>>>,
    key: CacheKey,
}

impl PendingGuard {
    fn new(pending: Arc<Mutex<HashMap<CacheKey, usize>>>, key: CacheKey) -> Self {
        *pending.lock().entry(key.clone()).or_insert(0) += 1;
        Self { pending, key }
    }
}

impl Drop for PendingGuard {
    fn drop(&mut self) {
        let mut pending = self.pending.lock();
        if let Some(count) = pending.get_mut(&self.key) {
            *count -= 1;
            if *count == 0 {
                pending.remove(&self.key);
            }
        }
    }
}
