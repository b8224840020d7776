//! EXIF orientation codes and the draw transform each one implies.

use serde::{Deserialize, Serialize};

/// EXIF orientation values (1-8).
/// See: https://exiftool.org/TagNames/EXIF.html
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[repr(u8)]
pub enum Orientation {
    /// Normal (no transformation needed).
    #[default]
    Normal = 1,
    /// Horizontal flip.
    FlipHorizontal = 2,
    /// Rotate 180 degrees.
    Rotate180 = 3,
    /// Vertical flip.
    FlipVertical = 4,
    /// Vertical flip, then a quarter turn clockwise.
    Transpose = 5,
    /// Rotate 90 degrees clockwise.
    Rotate90CW = 6,
    /// Horizontal flip, then a quarter turn clockwise.
    Transverse = 7,
    /// Rotate 90 degrees counter-clockwise.
    Rotate270CW = 8,
}

impl Orientation {
    /// The rotation and axis scale that undo this orientation when drawing.
    pub fn transform(self) -> OrientationTransform {
        let (rotate, scale_x, scale_y) = match self {
            Orientation::Normal => (0, 1.0, 1.0),
            Orientation::FlipHorizontal => (0, -1.0, 1.0),
            Orientation::Rotate180 => (-180, 1.0, 1.0),
            Orientation::FlipVertical => (0, 1.0, -1.0),
            Orientation::Transpose => (90, 1.0, -1.0),
            Orientation::Rotate90CW => (90, 1.0, 1.0),
            Orientation::Transverse => (90, -1.0, 1.0),
            Orientation::Rotate270CW => (-90, 1.0, 1.0),
        };
        OrientationTransform {
            rotate,
            scale_x,
            scale_y,
        }
    }
}

impl From<u16> for Orientation {
    fn from(value: u16) -> Self {
        match value {
            2 => Orientation::FlipHorizontal,
            3 => Orientation::Rotate180,
            4 => Orientation::FlipVertical,
            5 => Orientation::Transpose,
            6 => Orientation::Rotate90CW,
            7 => Orientation::Transverse,
            8 => Orientation::Rotate270CW,
            _ => Orientation::Normal,
        }
    }
}

/// Rotation (degrees, clockwise) and axis scale applied around the surface center.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct OrientationTransform {
    pub rotate: i32,
    pub scale_x: f64,
    pub scale_y: f64,
}

impl OrientationTransform {
    pub const IDENTITY: Self = Self {
        rotate: 0,
        scale_x: 1.0,
        scale_y: 1.0,
    };

    pub fn is_identity(&self) -> bool {
        *self == Self::IDENTITY
    }
}

impl Default for OrientationTransform {
    fn default() -> Self {
        Self::IDENTITY
    }
}

/// Map an orientation code to its draw transform. Unknown codes are identity.
pub fn parse_orientation(code: u16) -> OrientationTransform {
    Orientation::from(code).transform()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_orientation_table() {
        assert!(parse_orientation(1).is_identity());
        assert_eq!(
            parse_orientation(2),
            OrientationTransform {
                rotate: 0,
                scale_x: -1.0,
                scale_y: 1.0
            }
        );
        assert_eq!(parse_orientation(3).rotate.rem_euclid(360), 180);
        assert_eq!(parse_orientation(4).scale_y, -1.0);
        assert_eq!(
            parse_orientation(5),
            OrientationTransform {
                rotate: 90,
                scale_x: 1.0,
                scale_y: -1.0
            }
        );
        assert_eq!(
            parse_orientation(6),
            OrientationTransform {
                rotate: 90,
                scale_x: 1.0,
                scale_y: 1.0
            }
        );
        assert_eq!(parse_orientation(7).scale_x, -1.0);
        assert_eq!(parse_orientation(7).rotate, 90);
        assert_eq!(parse_orientation(8).rotate, -90);
    }

    #[test]
    fn test_invalid_codes_are_identity() {
        for code in [0, 9, 255, u16::MAX] {
            assert!(parse_orientation(code).is_identity(), "code {code}");
        }
    }
}
