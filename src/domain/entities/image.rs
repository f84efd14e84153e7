//! Domain types for image caching.

use std::sync::Arc;

/// Opaque identifier for a cached, derived image artifact.
///
/// Built either from a content hash of the source bytes or from a logical
/// identifier plus output pixel dimensions (see
/// [`content_hasher`](crate::domain::services::content_hasher)).
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct CacheKey(String);

impl CacheKey {
    /// Creates a new `CacheKey` from any string-like input.
    #[must_use]
    pub fn new(key: impl Into<String>) -> Self {
        Self(key.into())
    }

    /// Returns the inner string.
    #[must_use]
    pub fn as_str(&self) -> &str {
        &self.0
    }

    /// Returns true if the key begins with `prefix`.
    #[must_use]
    pub fn has_prefix(&self, prefix: &str) -> bool {
        self.0.starts_with(prefix)
    }
}

impl std::fmt::Display for CacheKey {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.0)
    }
}

impl AsRef<str> for CacheKey {
    fn as_ref(&self) -> &str {
        &self.0
    }
}

impl From<&str> for CacheKey {
    fn from(s: &str) -> Self {
        Self::new(s)
    }
}

impl From<String> for CacheKey {
    fn from(s: String) -> Self {
        Self::new(s)
    }
}

/// Requested display footprint, in points.
///
/// Multiply by a scale factor to get the pixel footprint.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct TargetSize {
    /// Width in points.
    pub width: f32,
    /// Height in points.
    pub height: f32,
}

impl TargetSize {
    /// Creates a target size.
    #[must_use]
    pub const fn new(width: f32, height: f32) -> Self {
        Self { width, height }
    }

    /// Creates a square target size.
    #[must_use]
    pub const fn square(side: f32) -> Self {
        Self::new(side, side)
    }

    /// Returns true if either side is zero, negative or not finite.
    #[must_use]
    pub fn is_degenerate(self) -> bool {
        !(self.width.is_finite() && self.height.is_finite())
            || self.width <= 0.0
            || self.height <= 0.0
    }

    /// Largest pixel dimension a downsampled image may have at `scale`.
    ///
    /// Returns `None` when the target or scale is degenerate or the bound
    /// rounds down to zero pixels.
    #[must_use]
    pub fn max_pixel_dimension(self, scale: f32) -> Option<u32> {
        if self.is_degenerate() || !scale.is_finite() || scale <= 0.0 {
            return None;
        }
        let px = to_pixels(self.width.max(self.height) * scale);
        (px > 0).then_some(px)
    }

    /// Pixel width and height at `scale`, zero for degenerate sides.
    #[must_use]
    pub fn pixel_dimensions(self, scale: f32) -> (u32, u32) {
        if !scale.is_finite() || scale <= 0.0 {
            return (0, 0);
        }
        (to_pixels(self.width * scale), to_pixels(self.height * scale))
    }
}

impl std::fmt::Display for TargetSize {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}x{}", self.width, self.height)
    }
}

#[allow(clippy::cast_possible_truncation, clippy::cast_sign_loss)]
fn to_pixels(value: f32) -> u32 {
    if !value.is_finite() || value < 1.0 {
        return 0;
    }
    // `as` saturates at u32::MAX.
    value.floor() as u32
}

/// Where a resolved image came from.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ImageSource {
    /// Served from the in-memory LRU cache.
    Memory,
    /// Decoded from the disk cache.
    Disk,
    /// Downsampled from the source bytes.
    Decoded,
}

impl std::fmt::Display for ImageSource {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Memory => write!(f, "memory"),
            Self::Disk => write!(f, "disk"),
            Self::Decoded => write!(f, "decoded"),
        }
    }
}

/// A decoded image ready for display.
#[derive(Debug, Clone)]
pub struct LoadedImage {
    /// Key the image is cached under.
    pub key: CacheKey,
    /// Decoded pixels.
    pub image: Arc<image::DynamicImage>,
    /// Tier that produced the image.
    pub source: ImageSource,
}

impl LoadedImage {
    /// Pixel width.
    #[must_use]
    pub fn width(&self) -> u32 {
        self.image.width()
    }

    /// Pixel height.
    #[must_use]
    pub fn height(&self) -> u32 {
        self.image.height()
    }
}
