//! Export of a drawn surface to encoded bytes.
//!
//! Mirrors what a canvas export offers: JPEG (lossy, honours quality),
//! PNG and lossless WebP (quality ignored). Any other image type falls back
//! to PNG.

use std::io::Cursor;

use image::buffer::ConvertBuffer;
use image::codecs::jpeg::JpegEncoder;
use image::codecs::png::PngEncoder;
use image::codecs::webp::WebPEncoder;
use image::{ExtendedColorType, ImageEncoder, RgbImage, RgbaImage};
use thiserror::Error;

use crate::mime;

/// JPEG quality used when the requested quality is outside `0..=1`.
const DEFAULT_JPEG_QUALITY: u8 = 92;

/// Errors that can occur while rendering or encoding.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum EncodeError {
    /// Width or height is zero, or the surface would be too large.
    #[error("Invalid dimensions: {width}x{height}")]
    InvalidDimensions { width: u32, height: u32 },

    /// The encoder failed.
    #[error("{format} encoding failed: {message}")]
    EncodingFailed { format: &'static str, message: String },
}

/// Formats a drawn surface can be exported to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OutputFormat {
    Jpeg,
    Png,
    WebP,
}

impl OutputFormat {
    /// Exact match on an encodable media type.
    pub fn from_mime_type(value: &str) -> Option<Self> {
        match value {
            v if mime::is_jpeg_type(v) => Some(Self::Jpeg),
            mime::PNG => Some(Self::Png),
            mime::WEBP => Some(Self::WebP),
            _ => None,
        }
    }

    /// The format an export of `value` produces, PNG for unsupported types.
    pub fn for_export(value: &str) -> Self {
        Self::from_mime_type(value).unwrap_or(Self::Png)
    }

    pub fn mime_type(self) -> &'static str {
        match self {
            Self::Jpeg => mime::JPEG,
            Self::Png => mime::PNG,
            Self::WebP => mime::WEBP,
        }
    }

    /// Formats without alpha get an opaque white background.
    pub fn supports_alpha(self) -> bool {
        !matches!(self, Self::Jpeg)
    }

    fn name(self) -> &'static str {
        match self {
            Self::Jpeg => "JPEG",
            Self::Png => "PNG",
            Self::WebP => "WebP",
        }
    }
}

/// Map a `0..=1` quality to the JPEG encoder's `1..=100` scale.
pub fn jpeg_quality(quality: f64) -> u8 {
    if quality.is_finite() && (0.0..=1.0).contains(&quality) {
        ((quality * 100.0).round() as u8).clamp(1, 100)
    } else {
        DEFAULT_JPEG_QUALITY
    }
}

/// Encode RGBA pixels.
///
/// # Arguments
///
/// * `image` - The drawn surface
/// * `format` - Target format
/// * `quality` - `0..=1`, only used for JPEG
///
/// # Errors
///
/// Returns `EncodeError::InvalidDimensions` for an empty image and
/// `EncodeError::EncodingFailed` when the codec reports an error.
pub fn encode_rgba(
    image: &RgbaImage,
    format: OutputFormat,
    quality: f64,
) -> Result<Vec<u8>, EncodeError> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 {
        return Err(EncodeError::InvalidDimensions { width, height });
    }

    let mut buffer = Cursor::new(Vec::new());
    let result = match format {
        OutputFormat::Jpeg => {
            let rgb: RgbImage = image.convert();
            JpegEncoder::new_with_quality(&mut buffer, jpeg_quality(quality)).write_image(
                rgb.as_raw(),
                width,
                height,
                ExtendedColorType::Rgb8,
            )
        }
        OutputFormat::Png => PngEncoder::new(&mut buffer).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
        OutputFormat::WebP => WebPEncoder::new_lossless(&mut buffer).write_image(
            image.as_raw(),
            width,
            height,
            ExtendedColorType::Rgba8,
        ),
    };

    result.map_err(|e| EncodeError::EncodingFailed {
        format: format.name(),
        message: e.to_string(),
    })?;

    Ok(buffer.into_inner())
}
