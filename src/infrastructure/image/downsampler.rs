//! Decoding and shrinking encoded images to a display footprint.
//!
//! JPEG sources are decoded at a reduced size (1/2 down to 1/8 in the DCT
//! domain) when the target is small enough, so a large photo never needs its
//! full pixel buffer. Other formats, and JPEGs with grayscale-16 or CMYK
//! pixels, are decoded at full resolution under the allocation limit and
//! shrunk afterwards.

use std::io::Cursor;

use image::codecs::jpeg::JpegEncoder;
use image::codecs::jpeg::JpegDecoder;
use image::metadata::Orientation;
use image::{DynamicImage, GrayImage, ImageDecoder, ImageFormat, ImageReader, Limits, RgbImage};
use jpeg_decoder::PixelFormat;
use tracing::{debug, trace};

use crate::domain::entities::TargetSize;
use crate::domain::ports::{CacheError, CacheResult};

/// Default decoder allocation ceiling (256 MB).
pub const DEFAULT_MAX_DECODE_ALLOC: u64 = 256 * 1024 * 1024;

/// Default JPEG quality for disk cache entries.
pub const DEFAULT_JPEG_QUALITY: u8 = 85;

/// Decodes encoded bytes and fits them inside a target footprint.
///
/// Decoding is bounded by an allocation limit so a hostile or enormous
/// source is rejected instead of spiking memory. All methods are CPU-bound;
/// callers on an async runtime should use `spawn_blocking`.
#[derive(Debug, Clone, Copy)]
pub struct Downsampler {
    max_alloc: u64,
}

impl Downsampler {
    /// Creates a downsampler with the given decoder allocation ceiling.
    #[must_use]
    pub const fn new(max_alloc: u64) -> Self {
        Self { max_alloc }
    }

    /// Decodes `bytes` into an image whose largest side is at most
    /// `floor(max(target.width, target.height) * scale)` pixels.
    ///
    /// Aspect ratio is preserved and EXIF orientation applied. Returns `None`
    /// for undecodable input or a degenerate target.
    #[must_use]
    pub fn downsample(&self, bytes: &[u8], target: TargetSize, scale: f32) -> Option<DynamicImage> {
        let Some(max_px) = target.max_pixel_dimension(scale) else {
            debug!(target = %target, scale, "Degenerate downsample target");
            return None;
        };

        match self.decode_oriented(bytes, Some(max_px)) {
            Ok(image) => {
                trace!(
                    width = image.width(),
                    height = image.height(),
                    max_px,
                    "Downsampled image"
                );
                Some(image)
            }
            Err(e) => {
                debug!(error = %e, len = bytes.len(), "Failed to downsample image");
                None
            }
        }
    }

    /// Decodes `bytes` at native size with orientation applied.
    ///
    /// # Errors
    /// Returns `CacheError::DecodeError` if the bytes are not a supported
    /// image or exceed the allocation limit.
    pub fn decode(&self, bytes: &[u8]) -> CacheResult<DynamicImage> {
        self.decode_oriented(bytes, None)
    }

    fn decode_oriented(&self, bytes: &[u8], max_px: Option<u32>) -> CacheResult<DynamicImage> {
        if let Some(max_px) = max_px
            && image::guess_format(bytes).is_ok_and(|format| format == ImageFormat::Jpeg)
            && let Some(image) = self.decode_jpeg_reduced(bytes, max_px)?
        {
            return Ok(image);
        }

        let mut reader = ImageReader::new(Cursor::new(bytes))
            .with_guessed_format()
            .map_err(|e| CacheError::DecodeError(format!("Failed to sniff format: {e}")))?;

        let mut limits = Limits::default();
        limits.max_alloc = Some(self.max_alloc);
        reader.limits(limits);

        let mut decoder = reader
            .into_decoder()
            .map_err(|e| CacheError::DecodeError(format!("Unsupported image: {e}")))?;
        let orientation = decoder
            .orientation()
            .unwrap_or(Orientation::NoTransforms);

        let decoded = DynamicImage::from_decoder(decoder)
            .map_err(|e| CacheError::DecodeError(format!("Failed to decode image: {e}")))?;

        // Shrink before rotating; the longest side is unaffected by orientation.
        let mut image = match max_px {
            Some(max_px) => fit_within(decoded, max_px),
            None => decoded,
        };
        image.apply_orientation(orientation);
        Ok(image)
    }

    /// Decodes a JPEG at the smallest DCT scale that still covers `max_px`.
    ///
    /// `Ok(None)` means the reduced path does not apply and the caller should
    /// take the full decode.
    fn decode_jpeg_reduced(&self, bytes: &[u8], max_px: u32) -> CacheResult<Option<DynamicImage>> {
        let mut decoder = jpeg_decoder::Decoder::new(Cursor::new(bytes));
        if decoder.read_info().is_err() {
            return Ok(None);
        }
        let Some(info) = decoder.info() else {
            return Ok(None);
        };
        let (width, height) = (u32::from(info.width), u32::from(info.height));
        if width.max(height) <= max_px {
            return Ok(None);
        }
        let channels: u64 = match info.pixel_format {
            PixelFormat::L8 => 1,
            PixelFormat::RGB24 => 3,
            _ => return Ok(None),
        };

        let (fit_w, fit_h) = fit_dimensions(width, height, max_px);
        let (Ok(req_w), Ok(req_h)) = (u16::try_from(fit_w), u16::try_from(fit_h)) else {
            return Ok(None);
        };
        let Ok((out_w, out_h)) = decoder.scale(req_w, req_h) else {
            return Ok(None);
        };

        let needed = u64::from(out_w) * u64::from(out_h) * channels;
        if needed > self.max_alloc {
            return Err(CacheError::DecodeError(format!(
                "Reduced JPEG {out_w}x{out_h} needs {needed} bytes, limit is {}",
                self.max_alloc
            )));
        }

        let pixels = decoder
            .decode()
            .map_err(|e| CacheError::DecodeError(format!("Failed to decode JPEG: {e}")))?;
        let (out_w, out_h) = (u32::from(out_w), u32::from(out_h));
        let decoded = match info.pixel_format {
            PixelFormat::L8 => GrayImage::from_raw(out_w, out_h, pixels).map(DynamicImage::ImageLuma8),
            _ => RgbImage::from_raw(out_w, out_h, pixels).map(DynamicImage::ImageRgb8),
        };
        let Some(decoded) = decoded else {
            return Ok(None);
        };
        trace!(width, height, out_w, out_h, "Decoded JPEG at reduced scale");

        let mut image = fit_within(decoded, max_px);
        image.apply_orientation(jpeg_orientation(bytes));
        Ok(Some(image))
    }
}

impl Default for Downsampler {
    fn default() -> Self {
        Self::new(DEFAULT_MAX_DECODE_ALLOC)
    }
}

/// Downsamples with the default allocation limit.
#[must_use]
pub fn downsample(bytes: &[u8], target: TargetSize, scale: f32) -> Option<DynamicImage> {
    Downsampler::default().downsample(bytes, target, scale)
}

/// Encodes an image as JPEG for the disk tier. Alpha is dropped.
///
/// # Errors
/// Returns `CacheError::DecodeError` if the encoder fails.
pub fn encode_jpeg(image: &DynamicImage, quality: u8) -> CacheResult<Vec<u8>> {
    let rgb = DynamicImage::ImageRgb8(image.to_rgb8());
    let mut buf = Vec::new();
    rgb.write_with_encoder(JpegEncoder::new_with_quality(&mut buf, quality.clamp(1, 100)))
        .map_err(|e| CacheError::DecodeError(format!("Failed to encode JPEG: {e}")))?;
    Ok(buf)
}

/// Largest `(w, h)` with the same aspect ratio whose longer side is `max_px`.
fn fit_dimensions(width: u32, height: u32, max_px: u32) -> (u32, u32) {
    let (width, height, max_px) = (u64::from(width), u64::from(height), u64::from(max_px));
    let (w, h) = if width >= height {
        (max_px, (height * max_px).div_ceil(width))
    } else {
        ((width * max_px).div_ceil(height), max_px)
    };
    (
        u32::try_from(w.max(1)).unwrap_or(u32::MAX),
        u32::try_from(h.max(1)).unwrap_or(u32::MAX),
    )
}

fn jpeg_orientation(bytes: &[u8]) -> Orientation {
    JpegDecoder::new(Cursor::new(bytes))
        .and_then(|mut decoder| decoder.orientation())
        .unwrap_or(Orientation::NoTransforms)
}

fn fit_within(image: DynamicImage, max_px: u32) -> DynamicImage {
    if image.width().max(image.height()) <= max_px {
        return image;
    }
    image.thumbnail(max_px, max_px)
}

#[cfg(test)]
pub(crate) mod test_support {
    use std::io::Cursor;

    use image::{DynamicImage, ImageFormat};

    /// Encodes a solid test image in the given format.
    pub fn encoded(width: u32, height: u32, format: ImageFormat) -> Vec<u8> {
        let image = DynamicImage::new_rgb8(width, height);
        let mut buf = Cursor::new(Vec::new());
        image.write_to(&mut buf, format).unwrap();
        buf.into_inner()
    }

    /// JPEG with an EXIF APP1 segment carrying `orientation`.
    pub fn jpeg_with_orientation(width: u32, height: u32, orientation: u8) -> Vec<u8> {
        let jpeg = encoded(width, height, ImageFormat::Jpeg);
        let tiff: [u8; 26] = [
            b'I', b'I', 0x2A, 0x00, 0x08, 0x00, 0x00, 0x00, // header, IFD0 at 8
            0x01, 0x00, // one entry
            0x12, 0x01, 0x03, 0x00, 0x01, 0x00, 0x00, 0x00, // Orientation, SHORT, 1
            orientation, 0x00, 0x00, 0x00, // value
            0x00, 0x00, 0x00, 0x00, // no next IFD
        ];
        let mut app1 = vec![0xFF, 0xE1, 0x00, 0x22];
        app1.extend_from_slice(b"Exif\0\0");
        app1.extend_from_slice(&tiff);

        let mut out = jpeg[..2].to_vec();
        out.extend_from_slice(&app1);
        out.extend_from_slice(&jpeg[2..]);
        out
    }
}
