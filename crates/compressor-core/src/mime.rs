//! Media-type helpers shared by the format policy and output naming.

/// The JPEG media type, the target of forced conversions.
pub const JPEG: &str = "image/jpeg";
pub const PNG: &str = "image/png";
pub const WEBP: &str = "image/webp";

/// Returns true for `image/<something>`.
pub fn is_image_type(value: &str) -> bool {
    value.len() > "image/".len() && value.starts_with("image/")
}

/// Returns true for the JPEG family of media types.
pub fn is_jpeg_type(value: &str) -> bool {
    matches!(value, JPEG | "image/jpg" | "image/pjpeg")
}

/// The canonical spelling of a media type: JPEG aliases become `image/jpeg`.
pub fn canonical_type(value: &str) -> &str {
    if is_jpeg_type(value) {
        JPEG
    } else {
        value
    }
}

/// Whether two media types name the same format.
pub fn same_type(a: &str, b: &str) -> bool {
    canonical_type(a) == canonical_type(b)
}

/// File extension for an image media type: `image/jpeg` -> `.jpg`, `image/png` -> `.png`.
///
/// Non-image types produce a bare `.`.
pub fn image_type_to_extension(value: &str) -> String {
    let extension = if is_image_type(value) {
        &value["image/".len()..]
    } else {
        ""
    };
    match extension {
        "jpeg" => ".jpg".to_string(),
        other => format!(".{other}"),
    }
}

/// Replace a trailing `.ext` (word characters only) with `extension`.
///
/// A name without such a suffix is returned unchanged.
pub fn replace_extension(name: &str, extension: &str) -> String {
    match name.rfind('.') {
        Some(dot)
            if dot + 1 < name.len()
                && name[dot + 1..]
                    .chars()
                    .all(|c| c.is_alphanumeric() || c == '_') =>
        {
            format!("{}{}", &name[..dot], extension)
        }
        _ => name.to_string(),
    }
}
