//! Command handlers for the `thumbvault` binary.

use std::fmt::Write as _;
use std::path::{Path, PathBuf};

use bytes::Bytes;
use color_eyre::eyre::{Result, WrapErr, eyre};
use serde::Serialize;
use tracing::info;

use crate::domain::entities::{LoadedImage, TargetSize};
use crate::domain::services::content_hasher;
use crate::infrastructure::config::{AppConfig, Command};
use crate::infrastructure::image::{DiskImageCache, ImagePipeline};

/// Disk cache summary printed by `stats`.
#[derive(Debug, Serialize)]
pub struct DiskReport {
    /// Cache directory.
    pub dir: PathBuf,
    /// Stored entries.
    pub entries: usize,
    /// Bytes on disk.
    pub size_bytes: u64,
    /// Size cap.
    pub max_size_bytes: u64,
}

impl DiskReport {
    fn from_cache(cache: &DiskImageCache) -> Self {
        Self {
            dir: cache.dir().to_path_buf(),
            entries: cache.len(),
            size_bytes: cache.current_size(),
            max_size_bytes: cache.max_size(),
        }
    }
}

/// Runs `command` and returns what should be printed to stdout.
///
/// # Errors
/// Returns error if the source file cannot be read or the disk cache cannot
/// be opened.
pub async fn run(command: Command, config: &AppConfig) -> Result<String> {
    match command {
        Command::Warm {
            file,
            id,
            width,
            height,
            scale,
        } => warm(config, &file, id, TargetSize::new(width, height), scale).await,
        Command::Stats { json } => {
            let report = DiskReport::from_cache(&open_disk_cache(config).await?);
            if json {
                Ok(serde_json::to_string_pretty(&report)?)
            } else {
                Ok(format!(
                    "dir: {}\nentries: {}\nsize: {} / {} bytes",
                    report.dir.display(),
                    report.entries,
                    report.size_bytes,
                    report.max_size_bytes
                ))
            }
        }
        Command::Clear => {
            let cache = open_disk_cache(config).await?;
            let entries = cache.len();
            cache.remove_all().await;
            info!(entries, dir = %cache.dir().display(), "Disk cache cleared");
            Ok(format!("removed {entries} entries from {}", cache.dir().display()))
        }
    }
}

/// Builds a pipeline from configuration.
///
/// # Errors
/// Returns error if the disk cache directory cannot be created.
pub async fn build_pipeline(config: &AppConfig) -> Result<ImagePipeline> {
    if !config.disk.enabled {
        return Ok(ImagePipeline::new(config.pipeline_config(), None));
    }
    let dir = config.effective_cache_dir();
    ImagePipeline::with_disk_dir(config.pipeline_config(), dir.clone())
        .await
        .wrap_err_with(|| format!("opening disk cache at {}", dir.display()))
}

async fn open_disk_cache(config: &AppConfig) -> Result<DiskImageCache> {
    let dir = config.effective_cache_dir();
    DiskImageCache::new(dir.clone(), config.disk.max_size)
        .await
        .wrap_err_with(|| format!("opening disk cache at {}", dir.display()))
}

async fn warm(
    config: &AppConfig,
    file: &Path,
    id: Option<String>,
    target: TargetSize,
    scale: f32,
) -> Result<String> {
    let source = Bytes::from(
        tokio::fs::read(file)
            .await
            .wrap_err_with(|| format!("reading {}", file.display()))?,
    );
    let id = id.unwrap_or_else(|| content_hasher::hash(&source).to_string());
    let key = content_hasher::derive_key_for_target(&id, target, scale);
    let pipeline = build_pipeline(config).await?;

    let mut out = String::new();
    for pass in 1..=2 {
        let loaded = pipeline
            .resolve(source.clone(), &key, target, scale)
            .await
            .ok_or_else(|| eyre!("{} could not be decoded", file.display()))?;
        writeln!(out, "pass {pass}: {}", describe(&loaded))?;
    }
    pipeline.wait_idle().await;

    write!(out, "memory: {}", pipeline.memory_cache_stats())?;
    Ok(out)
}

fn describe(loaded: &LoadedImage) -> String {
    format!(
        "{} {}x{} from {}",
        loaded.key,
        loaded.width(),
        loaded.height(),
        loaded.source
    )
}

#[cfg(test)]
mod tests {
    use image::{DynamicImage, ImageFormat};
    use tempfile::TempDir;

    use super::*;

    fn config_in(dir: &TempDir) -> AppConfig {
        AppConfig {
            cache_dir: Some(dir.path().join("cache")),
            ..AppConfig::default()
        }
    }

    fn write_png(dir: &TempDir, width: u32, height: u32) -> PathBuf {
        let path = dir.path().join("source.png");
        DynamicImage::new_rgb8(width, height)
            .save_with_format(&path, ImageFormat::Png)
            .unwrap();
        path
    }

    #[tokio::test]
    async fn test_warm_reports_decode_then_memory() {
        let dir = TempDir::new().unwrap();
        let file = write_png(&dir, 300, 150);
        let config = config_in(&dir);

        let out = run(
            Command::Warm {
                file,
                id: Some("photo".into()),
                width: 60.0,
                height: 60.0,
                scale: 1.0,
            },
            &config,
        )
        .await
        .unwrap();

        assert!(out.contains("pass 1: photo_60x60 60x30 from decoded"));
        assert!(out.contains("pass 2: photo_60x60 60x30 from memory"));
    }

    #[tokio::test]
    async fn test_warm_persists_then_stats_and_clear() {
        let dir = TempDir::new().unwrap();
        let file = write_png(&dir, 40, 40);
        let config = config_in(&dir);

        run(
            Command::Warm {
                file,
                id: None,
                width: 20.0,
                height: 20.0,
                scale: 2.0,
            },
            &config,
        )
        .await
        .unwrap();

        let json = run(Command::Stats { json: true }, &config).await.unwrap();
        let report: serde_json::Value = serde_json::from_str(&json).unwrap();
        assert_eq!(report["entries"], 1);

        let out = run(Command::Clear, &config).await.unwrap();
        assert!(out.starts_with("removed 1 entries"));

        let text = run(Command::Stats { json: false }, &config).await.unwrap();
        assert!(text.contains("entries: 0"));
    }

    #[tokio::test]
    async fn test_warm_rejects_non_image() {
        let dir = TempDir::new().unwrap();
        let file = dir.path().join("notes.txt");
        std::fs::write(&file, "hello").unwrap();

        let result = run(
            Command::Warm {
                file,
                id: None,
                width: 10.0,
                height: 10.0,
                scale: 1.0,
            },
            &config_in(&dir),
        )
        .await;

        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_build_pipeline_without_disk() {
        let dir = TempDir::new().unwrap();
        let mut config = config_in(&dir);
        config.disk.enabled = false;

        let pipeline = build_pipeline(&config).await.unwrap();

        assert!(pipeline.disk_cache().is_none());
        assert!(!dir.path().join("cache").exists());
    }
}
