//! Disk-based image cache for persistence across sessions.
//!
//! Best-effort throughout: a failed read is a miss and a failed write is
//! logged and dropped. Only construction can fail.

use std::io::Write;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicU64, AtomicUsize, Ordering};

use tokio::fs;
use tracing::{debug, trace, warn};

use crate::domain::content_hasher;
use crate::domain::entities::CacheKey;
use crate::domain::ports::{CacheError, CacheResult};

/// Maximum disk cache size in bytes (200 MB default).
pub const DEFAULT_MAX_CACHE_SIZE: u64 = 200 * 1024 * 1024;

/// Extension of cache entry files.
pub const ENTRY_EXTENSION: &str = "jpg";

const CACHEDIR_TAG_NAME: &str = "CACHEDIR.TAG";
const CACHEDIR_TAG: &str = "Signature: 8a477f597d28d172789f06886806bc55\n\
# This file is a cache directory tag created by thumbvault.\n\
# For information about cache directory tags see https://bford.info/cachedir/\n";

/// Disk-based cache of encoded image bytes.
#[derive(Debug)]
pub struct DiskImageCache {
    cache_dir: PathBuf,
    max_size: u64,
    current_size: AtomicU64,
    item_count: AtomicUsize,
}

impl DiskImageCache {
    /// Creates a new disk cache in the specified directory.
    ///
    /// The directory is tagged so backup tools skip it and, on unix,
    /// restricted to the current user. Leftover temp files from interrupted
    /// writes are removed.
    ///
    /// # Errors
    /// Returns error if the cache directory cannot be created or read.
    pub async fn new(cache_dir: PathBuf, max_size: u64) -> CacheResult<Self> {
        fs::create_dir_all(&cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to create cache dir: {e}")))?;
        restrict_permissions(&cache_dir).await;
        tag_cache_dir(&cache_dir).await;

        let mut total_size = 0u64;
        let mut count = 0usize;

        let mut entries = fs::read_dir(&cache_dir)
            .await
            .map_err(|e| CacheError::IoError(format!("Failed to read cache dir: {e}")))?;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if is_entry(&path) {
                if let Ok(meta) = entry.metadata().await {
                    total_size += meta.len();
                    count += 1;
                }
            } else if is_stale_temp(&path) {
                let _ = fs::remove_file(&path).await;
            }
        }

        let cache = Self {
            cache_dir,
            max_size,
            current_size: AtomicU64::new(total_size),
            item_count: AtomicUsize::new(count),
        };

        debug!(
            dir = %cache.cache_dir.display(),
            files = count,
            bytes = total_size,
            "Opened disk image cache"
        );

        cache.cleanup_if_needed().await;

        Ok(cache)
    }

    /// Directory holding the cache files.
    #[must_use]
    pub fn dir(&self) -> &Path {
        &self.cache_dir
    }

    /// Returns the path for a cached entry.
    fn cache_path(&self, key: &CacheKey) -> PathBuf {
        self.cache_dir
            .join(content_hasher::file_name(key, ENTRY_EXTENSION))
    }

    /// Reads stored bytes. Any I/O error counts as a miss.
    pub async fn read(&self, key: &CacheKey) -> Option<Vec<u8>> {
        let path = self.cache_path(key);
        match fs::read(&path).await {
            Ok(bytes) => {
                trace!(key = %key, path = %path.display(), "Disk cache hit");
                Some(bytes)
            }
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => {
                trace!(key = %key, "Disk cache miss");
                None
            }
            Err(e) => {
                debug!(key = %key, error = %e, "Disk cache read failed, treating as miss");
                None
            }
        }
    }

    /// Stores bytes atomically. Failures are logged and ignored.
    pub async fn write(&self, key: &CacheKey, bytes: &[u8]) {
        if let Err(e) = self.try_write(key, bytes).await {
            warn!(key = %key, error = %e, "Failed to write disk cache entry");
        }
    }

    async fn try_write(&self, key: &CacheKey, bytes: &[u8]) -> CacheResult<()> {
        let path = self.cache_path(key);
        let old_size = fs::metadata(&path).await.map(|m| m.len()).ok();

        let dir = self.cache_dir.clone();
        let target = path.clone();
        let data = bytes.to_vec();
        tokio::task::spawn_blocking(move || -> std::io::Result<()> {
            // Readers see either the old file or the complete new one.
            let mut temp_file = tempfile::NamedTempFile::new_in(&dir)?;
            temp_file.write_all(&data)?;
            temp_file.flush()?;
            temp_file.persist(&target).map_err(|e| e.error)?;
            Ok(())
        })
        .await
        .map_err(|e| CacheError::TaskError(format!("Write task failed: {e}")))?
        .map_err(|e| CacheError::IoError(format!("Failed to persist cache file: {e}")))?;

        let new_size = bytes.len() as u64;
        if let Some(old) = old_size {
            if new_size > old {
                self.current_size
                    .fetch_add(new_size - old, Ordering::Relaxed);
            } else {
                self.release(old - new_size, 0);
            }
        } else {
            self.current_size.fetch_add(new_size, Ordering::Relaxed);
            self.item_count.fetch_add(1, Ordering::Relaxed);
        }

        debug!(key = %key, path = %path.display(), size = bytes.len(), "Stored image in disk cache");

        self.cleanup_if_needed().await;

        Ok(())
    }

    /// Removes an entry. A missing entry is not an error.
    pub async fn remove(&self, key: &CacheKey) {
        let path = self.cache_path(key);
        let size = fs::metadata(&path).await.map(|m| m.len()).ok();
        if let Err(e) = fs::remove_file(&path).await {
            if e.kind() != std::io::ErrorKind::NotFound {
                warn!(key = %key, error = %e, "Failed to remove disk cache entry");
            }
        } else if let Some(s) = size {
            self.release(s, 1);
            debug!(key = %key, "Removed from disk cache");
        }
    }

    /// Removes every entry. Failures on individual files are logged.
    pub async fn remove_all(&self) {
        let mut entries = match fs::read_dir(&self.cache_dir).await {
            Ok(entries) => entries,
            Err(e) => {
                warn!(error = %e, "Failed to read cache dir for clearing");
                return;
            }
        };

        let mut removed = 0usize;
        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !is_entry(&path) {
                continue;
            }
            match fs::remove_file(&path).await {
                Ok(()) => removed += 1,
                Err(e) if e.kind() == std::io::ErrorKind::NotFound => {}
                Err(e) => warn!(path = %path.display(), error = %e, "Failed to remove cache file"),
            }
        }
        self.current_size.store(0, Ordering::Relaxed);
        self.item_count.store(0, Ordering::Relaxed);
        debug!(removed, "Cleared disk cache");
    }

    /// Returns the current cache size in bytes.
    #[must_use]
    pub fn current_size(&self) -> u64 {
        self.current_size.load(Ordering::Relaxed)
    }

    /// Returns the size cap in bytes.
    #[must_use]
    pub const fn max_size(&self) -> u64 {
        self.max_size
    }

    /// Returns the number of cached files.
    #[must_use]
    pub fn len(&self) -> usize {
        self.item_count.load(Ordering::Relaxed)
    }

    /// Returns true if the cache is empty.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Checks if an entry exists.
    pub async fn contains(&self, key: &CacheKey) -> bool {
        let path = self.cache_path(key);
        fs::try_exists(&path).await.unwrap_or(false)
    }

    /// Prunes least recently accessed files once over the size cap, down to
    /// 90% of it.
    async fn cleanup_if_needed(&self) {
        let current_size = self.current_size();
        if current_size <= self.max_size {
            return;
        }

        debug!(
            current_size = current_size,
            max_size = self.max_size,
            "Disk cache over limit, cleaning up"
        );

        let Ok(mut entries) = fs::read_dir(&self.cache_dir).await else {
            return;
        };

        let mut files: Vec<(PathBuf, std::time::SystemTime, u64)> = Vec::new();
        let mut scanned_size = 0u64;

        while let Ok(Some(entry)) = entries.next_entry().await {
            let path = entry.path();
            if !is_entry(&path) {
                continue;
            }

            if let Ok(meta) = entry.metadata().await {
                let accessed = meta
                    .accessed()
                    .or_else(|_| meta.modified())
                    .unwrap_or(std::time::SystemTime::UNIX_EPOCH);
                scanned_size += meta.len();
                files.push((path, accessed, meta.len()));
            }
        }

        files.sort_by_key(|(_, time, _)| *time);

        let mut freed_size = 0u64;
        let mut freed_count = 0usize;
        let scanned_count = files.len();
        let target = scanned_size.saturating_sub(self.max_size) + (self.max_size / 10);

        for (path, _, size) in files {
            if freed_size >= target {
                break;
            }

            if let Err(e) = fs::remove_file(&path).await {
                warn!(path = %path.display(), error = %e, "Failed to remove old cache file");
            } else {
                trace!(path = %path.display(), "Removed old cache file");
                freed_size += size;
                freed_count += 1;
            }
        }
        // The scan is the ground truth; resync whatever drift concurrent
        // writes and clears left behind.
        self.current_size
            .store(scanned_size - freed_size, Ordering::Relaxed);
        self.item_count
            .store(scanned_count - freed_count, Ordering::Relaxed);

        debug!(
            freed_size = freed_size,
            freed_count = freed_count,
            "Disk cache cleanup complete"
        );
    }
}

impl DiskImageCache {
    /// Subtracts from the counters, stopping at zero. A `remove_all` racing
    /// with a write or remove may already have reset them.
    fn release(&self, bytes: u64, count: usize) {
        let _ = self
            .current_size
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(bytes))
            });
        let _ = self
            .item_count
            .fetch_update(Ordering::Relaxed, Ordering::Relaxed, |v| {
                Some(v.saturating_sub(count))
            });
    }
}

/// Returns the default cache directory path.
#[must_use]
pub fn default_cache_dir() -> PathBuf {
    directories::ProjectDirs::from("com", "thumbvault", "thumbvault").map_or_else(
        || {
            std::env::temp_dir()
                .join("thumbvault")
                .join("cache")
                .join("images")
        },
        |dirs| dirs.cache_dir().join("images"),
    )
}

fn is_entry(path: &Path) -> bool {
    path.extension().is_some_and(|ext| ext == ENTRY_EXTENSION)
}

fn is_stale_temp(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| name.starts_with(".tmp"))
}

async fn tag_cache_dir(dir: &Path) {
    let tag = dir.join(CACHEDIR_TAG_NAME);
    if fs::try_exists(&tag).await.unwrap_or(false) {
        return;
    }
    if let Err(e) = fs::write(&tag, CACHEDIR_TAG).await {
        debug!(error = %e, "Failed to write cache directory tag");
    }
}

#[cfg(unix)]
async fn restrict_permissions(dir: &Path) {
    use std::os::unix::fs::PermissionsExt;

    if let Err(e) = fs::set_permissions(dir, std::fs::Permissions::from_mode(0o700)).await {
        debug!(error = %e, "Failed to restrict cache dir permissions");
    }
}

#[cfg(not(unix))]
#[allow(clippy::unused_async)]
async fn restrict_permissions(_dir: &Path) {}
