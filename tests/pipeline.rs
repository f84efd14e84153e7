use std::io::Cursor;
use std::sync::Arc;

use bytes::Bytes;
use image::{DynamicImage, ImageFormat};
use tempfile::TempDir;
use tokio::sync::mpsc;

use thumbvault::domain::{
    CacheKey, ImageCachePort, ImageSource, MemoryPressure, TargetSize, content_hasher,
};
use thumbvault::infrastructure::{ImagePipeline, ImagePipelineConfig};

fn jpeg(width: u32, height: u32) -> Bytes {
    let mut buf = Cursor::new(Vec::new());
    DynamicImage::new_rgb8(width, height)
        .write_to(&mut buf, ImageFormat::Jpeg)
        .unwrap();
    Bytes::from(buf.into_inner())
}

async fn open(dir: &TempDir) -> ImagePipeline {
    ImagePipeline::with_disk_dir(ImagePipelineConfig::default(), dir.path().to_path_buf())
        .await
        .unwrap()
}

#[tokio::test]
async fn relaunch_serves_from_disk() {
    let dir = TempDir::new().unwrap();
    let target = TargetSize::new(120.0, 80.0);
    let key = content_hasher::derive_key_for_target("photo42", target, 2.0);
    let source = jpeg(1200, 900);

    let first = open(&dir).await;
    let produced = first.resolve(source, &key, target, 2.0).await.unwrap();
    assert_eq!(produced.source, ImageSource::Decoded);
    assert!(produced.width().max(produced.height()) <= 240);
    first.wait_idle().await;
    drop(first);

    let second = open(&dir).await;
    let loaded = second
        .resolve(Bytes::new(), &key, target, 2.0)
        .await
        .unwrap();

    assert_eq!(loaded.source, ImageSource::Disk);
    assert_eq!(
        (loaded.width(), loaded.height()),
        (produced.width(), produced.height())
    );
}

#[tokio::test]
async fn memory_pressure_falls_back_to_disk() {
    let dir = TempDir::new().unwrap();
    let pipeline = Arc::new(open(&dir).await);
    let key = CacheKey::new("photo7_64x64");
    let target = TargetSize::square(64.0);

    pipeline.resolve(jpeg(256, 256), &key, target, 1.0).await;
    pipeline.wait_idle().await;

    let (tx, rx) = mpsc::unbounded_channel();
    let listener = pipeline.spawn_memory_pressure_listener(rx);
    tx.send(MemoryPressure::Warning).unwrap();
    drop(tx);
    listener.await.unwrap();
    assert!(pipeline.memory_cache().is_empty());

    let loaded = pipeline.resolve(Bytes::new(), &key, target, 1.0).await;
    assert_eq!(loaded.map(|l| l.source), Some(ImageSource::Disk));
}

#[tokio::test]
async fn concurrent_resolves_stay_within_bounds() {
    let dir = TempDir::new().unwrap();
    let config = ImagePipelineConfig {
        memory_max_entries: 4,
        ..ImagePipelineConfig::default()
    };
    let pipeline = Arc::new(
        ImagePipeline::with_disk_dir(config, dir.path().to_path_buf())
            .await
            .unwrap(),
    );
    let source = jpeg(64, 64);

    let handles: Vec<_> = (0..12)
        .map(|i| {
            let pipeline = Arc::clone(&pipeline);
            let source = source.clone();
            tokio::spawn(async move {
                let key = content_hasher::derive_key(&format!("p{i}"), 32, 32);
                pipeline
                    .resolve(source, &key, TargetSize::square(32.0), 1.0)
                    .await
            })
        })
        .collect();
    for handle in handles {
        assert!(handle.await.unwrap().is_some());
    }
    pipeline.wait_idle().await;

    let tracked = pipeline.memory_cache().tracked_keys();
    assert!(tracked.len() <= 4);
    assert!(tracked.iter().all(|k| pipeline.memory_cache().contains(k)));
    assert_eq!(pipeline.disk_cache().unwrap().len(), 12);
    assert_eq!(pipeline.pending_count(), 0);
}
