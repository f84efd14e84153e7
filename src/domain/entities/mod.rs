//! Domain entity definitions.

mod image;

pub use self::image::{CacheKey, ImageSource, LoadedImage, TargetSize};
