//! WASM-compatible wrapper types for compression results.

use compressor_core::Blob;
use wasm_bindgen::prelude::*;

/// A compressed image handed back to JavaScript.
///
/// # Memory Management
///
/// The encoded bytes stay in WASM memory until `bytes()` copies them into a
/// `Uint8Array`. The `free()` method releases the WASM side early; otherwise
/// wasm-bindgen's finalizer does it.
#[wasm_bindgen]
pub struct JsCompressedImage {
    blob: Blob,
}

#[wasm_bindgen]
impl JsCompressedImage {
    /// Encoded bytes as a `Uint8Array` (copied).
    pub fn bytes(&self) -> Vec<u8> {
        self.blob.bytes().to_vec()
    }

    #[wasm_bindgen(getter)]
    pub fn size(&self) -> usize {
        self.blob.size()
    }

    /// Media type of the encoded bytes, e.g. `image/jpeg`.
    #[wasm_bindgen(getter, js_name = mimeType)]
    pub fn mime_type(&self) -> String {
        self.blob.mime_type().to_string()
    }

    /// File name, with the extension rewritten when the type changed.
    #[wasm_bindgen(getter)]
    pub fn name(&self) -> Option<String> {
        self.blob.name().map(str::to_string)
    }

    /// Milliseconds since the Unix epoch.
    #[wasm_bindgen(getter, js_name = lastModified)]
    pub fn last_modified(&self) -> f64 {
        self.blob.last_modified() as f64
    }

    /// Explicitly free WASM memory.
    pub fn free(self) {}
}

impl JsCompressedImage {
    pub(crate) fn from_blob(blob: Blob) -> Self {
        Self { blob }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_accessors() {
        let blob = Blob::new(vec![0xFF, 0xD8, 0xFF, 0xD9], "image/jpeg")
            .with_name("photo.jpg")
            .with_last_modified(1_000);
        let image = JsCompressedImage::from_blob(blob);

        assert_eq!(image.bytes(), vec![0xFF, 0xD8, 0xFF, 0xD9]);
        assert_eq!(image.size(), 4);
        assert_eq!(image.mime_type(), "image/jpeg");
        assert_eq!(image.name().as_deref(), Some("photo.jpg"));
        assert_eq!(image.last_modified(), 1_000.0);
    }

    #[test]
    fn test_unnamed() {
        let image = JsCompressedImage::from_blob(Blob::new(vec![1], "image/png"));
        assert_eq!(image.name(), None);
    }
}
