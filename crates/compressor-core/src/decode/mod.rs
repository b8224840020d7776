//! Image decoding for the render path.
//!
//! Decoding tries two strategies in order:
//! - **Declared type**: the decoder selected from the source's media type
//! - **Sniffed**: the leading bytes pick the decoder, for sources whose
//!   declared type is missing or wrong
//!
//! Orientation is never applied here. The source bytes have already had
//! their orientation tag neutralized, and the draw applies the transform.

mod types;

use std::io::Cursor;

use image::{ImageFormat, ImageReader};
use tracing::{debug, trace};

pub use types::{DecodeError, DecodeStrategy, DecodedImage};

use crate::metadata::OrientationTransform;

/// Decode `bytes` into RGBA pixels.
///
/// # Arguments
///
/// * `bytes` - Encoded image file bytes
/// * `declared_type` - The media type the source claims to be
/// * `transform` - Orientation transform carried alongside the pixels
///
/// # Errors
///
/// Returns `DecodeError::Empty` for empty input, `DecodeError::InvalidFormat`
/// when no strategy recognizes the bytes, and `DecodeError::CorruptedFile`
/// when the recognized decoder fails.
pub fn decode_image(
    bytes: &[u8],
    declared_type: &str,
    transform: OrientationTransform,
) -> Result<DecodedImage, DecodeError> {
    if bytes.is_empty() {
        return Err(DecodeError::Empty);
    }

    if let Some(format) = ImageFormat::from_mime_type(declared_type) {
        match image::load_from_memory_with_format(bytes, format) {
            Ok(img) => {
                trace!(?format, "decoded with declared type");
                return Ok(DecodedImage {
                    pixels: img.into_rgba8(),
                    transform,
                    strategy: DecodeStrategy::DeclaredType,
                });
            }
            Err(e) => debug!(declared_type, error = %e, "declared-type decode failed, sniffing"),
        }
    }

    let reader = ImageReader::new(Cursor::new(bytes))
        .with_guessed_format()
        .map_err(|e| DecodeError::CorruptedFile(e.to_string()))?;
    if reader.format().is_none() {
        return Err(DecodeError::InvalidFormat);
    }

    let img = reader
        .decode()
        .map_err(|e| DecodeError::CorruptedFile(e.to_string()))?;

    Ok(DecodedImage {
        pixels: img.into_rgba8(),
        transform,
        strategy: DecodeStrategy::Sniffed,
    })
}
