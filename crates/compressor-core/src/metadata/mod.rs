//! Binary metadata reader for JPEG sources.
//!
//! Everything here works on raw bytes and never fails: malformed or missing
//! metadata degrades to "no orientation" and "no segments" so that metadata
//! handling can never abort a compression.
//!
//! # Architecture
//!
//! - [`read_orientation`] finds the orientation tag inside the first APP1
//!   segment, reports it and overwrites it with `1` in place. The rewritten
//!   buffer is what gets decoded, so the transform is applied exactly once by
//!   the draw instead of again by an orientation-aware decoder.
//! - [`extract_app1_segments`] / [`insert_app1_segments`] carry the EXIF
//!   block from the source over to the re-encoded output.

mod orientation;
mod segments;

pub use orientation::{parse_orientation, Orientation, OrientationTransform};
pub use segments::{extract_app1_segments, insert_app1_segments};

use tracing::trace;

const ORIENTATION_TAG: u16 = 0x0112;
const TIFF_MAGIC: u16 = 0x002A;
const LITTLE_ENDIAN: u16 = 0x4949;
const BIG_ENDIAN: u16 = 0x4D4D;

/// Read the EXIF orientation code and reset the stored value to `1`.
///
/// Returns the code found (1-8) or `1` when the buffer is not a JPEG, has no
/// EXIF block, no orientation entry, or the entry is out of range.
pub fn read_orientation(data: &mut [u8]) -> u16 {
    let code = locate_orientation(data).map(|(offset, little_endian)| {
        let code = read_u16(data, offset, little_endian).unwrap_or(1);
        let neutral = if little_endian {
            1u16.to_le_bytes()
        } else {
            1u16.to_be_bytes()
        };
        data[offset..offset + 2].copy_from_slice(&neutral);
        code
    });

    match code {
        Some(code @ 1..=8) => code,
        Some(other) => {
            trace!(code = other, "ignoring out-of-range orientation");
            1
        }
        None => 1,
    }
}

/// Byte offset of the orientation value and the TIFF byte order.
fn locate_orientation(data: &[u8]) -> Option<(usize, bool)> {
    if !data.starts_with(&[0xFF, 0xD8]) {
        return None;
    }

    let app1_start = (2..data.len().saturating_sub(1))
        .find(|&offset| data[offset] == 0xFF && data[offset + 1] == 0xE1)?;

    if data.get(app1_start + 4..app1_start + 8)? != b"Exif" {
        return None;
    }

    let tiff = app1_start + 10;
    let little_endian = match read_u16(data, tiff, false)? {
        LITTLE_ENDIAN => true,
        BIG_ENDIAN => false,
        _ => return None,
    };
    if read_u16(data, tiff + 2, little_endian)? != TIFF_MAGIC {
        return None;
    }

    let first_ifd = read_u32(data, tiff + 4, little_endian)? as usize;
    if first_ifd < 8 {
        return None;
    }
    let ifd = tiff.checked_add(first_ifd)?;
    let entries = read_u16(data, ifd, little_endian)? as usize;

    (0..entries).find_map(|i| {
        let entry = ifd + 2 + i * 12;
        (read_u16(data, entry, little_endian)? == ORIENTATION_TAG)
            .then_some(entry + 8)
            .filter(|value| value + 2 <= data.len())
            .map(|value| (value, little_endian))
    })
}

fn read_u16(data: &[u8], offset: usize, little_endian: bool) -> Option<u16> {
    let bytes: [u8; 2] = data.get(offset..offset.checked_add(2)?)?.try_into().ok()?;
    Some(if little_endian {
        u16::from_le_bytes(bytes)
    } else {
        u16::from_be_bytes(bytes)
    })
}

fn read_u32(data: &[u8], offset: usize, little_endian: bool) -> Option<u32> {
    let bytes: [u8; 4] = data.get(offset..offset.checked_add(4)?)?.try_into().ok()?;
    Some(if little_endian {
        u32::from_le_bytes(bytes)
    } else {
        u32::from_be_bytes(bytes)
    })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{exif_app1, jpeg_with_exif, solid_jpeg};

    fn exif_orientation(data: &[u8]) -> Option<u32> {
        let exif = exif::Reader::new()
            .read_from_container(&mut std::io::Cursor::new(data))
            .ok()?;
        exif.get_field(exif::Tag::Orientation, exif::In::PRIMARY)?
            .value
            .get_uint(0)
    }

    #[test]
    fn test_read_orientation_big_endian() {
        let mut data = jpeg_with_exif(&solid_jpeg(8, 4, [200, 10, 10]), 6, false);
        assert_eq!(exif_orientation(&data), Some(6));

        assert_eq!(read_orientation(&mut data), 6);
        assert_eq!(exif_orientation(&data), Some(1));
        // Second read sees the neutralized value
        assert_eq!(read_orientation(&mut data), 1);
    }

    #[test]
    fn test_read_orientation_little_endian() {
        let mut data = jpeg_with_exif(&solid_jpeg(8, 4, [200, 10, 10]), 8, true);
        assert_eq!(read_orientation(&mut data), 8);
        assert_eq!(exif_orientation(&data), Some(1));
    }

    #[test]
    fn test_read_orientation_out_of_range() {
        let mut data = jpeg_with_exif(&solid_jpeg(8, 4, [0, 0, 0]), 42, false);
        assert_eq!(read_orientation(&mut data), 1);
    }

    #[test]
    fn test_read_orientation_without_exif() {
        let mut data = solid_jpeg(8, 4, [0, 0, 0]);
        let before = data.clone();
        assert_eq!(read_orientation(&mut data), 1);
        assert_eq!(data, before);
    }

    #[test]
    fn test_read_orientation_not_jpeg() {
        let mut data = b"\x89PNG\r\n\x1a\nrest".to_vec();
        assert_eq!(read_orientation(&mut data), 1);
    }

    #[test]
    fn test_read_orientation_truncated_ifd() {
        let app1 = exif_app1(6, false);
        let mut data = vec![0xFF, 0xD8];
        // Cut the segment before the orientation value
        data.extend_from_slice(&app1[..app1.len() - 8]);
        assert_eq!(read_orientation(&mut data), 1);
    }

    #[test]
    fn test_extracted_segments_carry_neutralized_tag() {
        let mut data = jpeg_with_exif(&solid_jpeg(8, 4, [0, 0, 0]), 6, false);
        read_orientation(&mut data);

        let segments = extract_app1_segments(&data);
        assert_eq!(segments.len(), 1);

        let output = insert_app1_segments(&solid_jpeg(4, 8, [0, 0, 0]), &segments);
        assert_eq!(exif_orientation(&output), Some(1));
    }
}

#[cfg(test)]
mod proptests {
    use super::*;
    use proptest::prelude::*;

    proptest! {
        /// Property: arbitrary input never panics and yields a valid code.
        #[test]
        fn prop_read_orientation_total(mut data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let code = read_orientation(&mut data);
            prop_assert!((1..=8).contains(&code));
        }

        /// Property: arbitrary JPEG-prefixed input never panics.
        #[test]
        fn prop_read_orientation_jpeg_prefixed(tail in proptest::collection::vec(any::<u8>(), 0..512)) {
            let mut data = vec![0xFF, 0xD8, 0xFF, 0xE1, 0x00, 0x40];
            data.extend_from_slice(b"Exif\0\0");
            data.extend_from_slice(&tail);
            let code = read_orientation(&mut data);
            prop_assert!((1..=8).contains(&code));
        }

        /// Property: segment scanning never panics on arbitrary bytes.
        #[test]
        fn prop_segments_total(data in proptest::collection::vec(any::<u8>(), 0..512)) {
            let segments = extract_app1_segments(&data);
            let _ = insert_app1_segments(&data, &segments);
        }
    }
}
