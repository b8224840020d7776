//! JPEG marker-segment scanning for APP1 (EXIF) extraction and reinsertion.

const MARKER: u8 = 0xFF;
const SOI: u8 = 0xD8;
const SOS: u8 = 0xDA;
const APP0: u8 = 0xE0;
const APP1: u8 = 0xE1;

/// Collect every APP1 segment (marker included) that precedes the scan data.
///
/// Scanning stops at the start-of-scan marker, at a truncated length field,
/// or at the first byte that is not a marker prefix.
pub fn extract_app1_segments(data: &[u8]) -> Vec<Vec<u8>> {
    let mut segments = Vec::new();
    let mut start = 0usize;

    while start + 3 < data.len() {
        if data[start] != MARKER {
            break;
        }
        match data[start + 1] {
            SOS => break,
            SOI => start += 2,
            kind => {
                let length = u16::from_be_bytes([data[start + 2], data[start + 3]]) as usize;
                let end = (start + length + 2).min(data.len());
                if kind == APP1 {
                    segments.push(data[start..end].to_vec());
                }
                start = end;
            }
        }
    }

    segments
}

/// Replace the leading APP0 segment of an encoded JPEG with `segments`.
///
/// The buffer is returned unchanged when there is nothing to insert or when
/// it does not start with SOI immediately followed by APP0, the layout every
/// JPEG produced by the encoder has.
pub fn insert_app1_segments(data: &[u8], segments: &[Vec<u8>]) -> Vec<u8> {
    if segments.is_empty() || !has_app0_layout(data) {
        return data.to_vec();
    }

    let app0_length = u16::from_be_bytes([data[4], data[5]]) as usize;
    let rest = data.get(4 + app0_length..).unwrap_or_default();
    let inserted: usize = segments.iter().map(Vec::len).sum();

    let mut out = Vec::with_capacity(2 + inserted + rest.len());
    out.extend_from_slice(&[MARKER, SOI]);
    for segment in segments {
        out.extend_from_slice(segment);
    }
    out.extend_from_slice(rest);
    out
}

fn has_app0_layout(data: &[u8]) -> bool {
    data.len() >= 6 && data[0] == MARKER && data[1] == SOI && data[2] == MARKER && data[3] == APP0
}
