//! Core types for image decoding.

use image::RgbaImage;
use thiserror::Error;

use crate::metadata::OrientationTransform;

/// Error types for image decoding operations.
#[derive(Debug, Clone, Error, PartialEq, Eq)]
pub enum DecodeError {
    /// The bytes are empty.
    #[error("The image is empty")]
    Empty,

    /// No decoder recognizes the bytes.
    #[error("Invalid or unsupported image format")]
    InvalidFormat,

    /// A decoder recognized the format but could not finish.
    #[error("Corrupted or incomplete image file: {0}")]
    CorruptedFile(String),

    /// A data URL payload could not be turned into bytes.
    #[error("Invalid image data URL: {0}")]
    InvalidDataUrl(String),
}

/// Which decoder produced an image.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodeStrategy {
    /// The decoder named by the declared media type.
    DeclaredType,
    /// Format sniffed from the leading bytes.
    Sniffed,
}

/// A decoded RGBA image plus the orientation transform to draw it with.
///
/// Held exclusively by one render; dropping it releases the pixel buffer.
#[derive(Debug, Clone)]
pub struct DecodedImage {
    pub pixels: RgbaImage,
    pub transform: OrientationTransform,
    pub strategy: DecodeStrategy,
}

impl DecodedImage {
    /// Natural (pre-orientation) width.
    pub fn natural_width(&self) -> u32 {
        self.pixels.width()
    }

    /// Natural (pre-orientation) height.
    pub fn natural_height(&self) -> u32 {
        self.pixels.height()
    }
}
