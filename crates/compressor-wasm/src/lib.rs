//! Compressor WASM - WebAssembly bindings for compressor-core
//!
//! # Module Structure
//!
//! - `compress` - One-shot compression and default-option management
//! - `types` - WASM-compatible result wrapper
//!
//! # Usage
//!
//! ```typescript
//! import init, { compress_image } from '@compressor/wasm';
//!
//! await init();
//!
//! const bytes = new Uint8Array(await file.arrayBuffer());
//! const result = compress_image(bytes, file.type, file.name, { quality: 0.6 });
//! console.log(`${file.size} -> ${result.size} bytes`);
//! ```

use wasm_bindgen::prelude::*;

mod compress;
mod types;

pub use compress::{compress_image, get_defaults, reset_defaults, set_defaults};
pub use types::JsCompressedImage;

/// Initialize the WASM module (called automatically on load)
#[wasm_bindgen(start)]
pub fn init() {}

/// Get the version of the WASM module
#[wasm_bindgen]
pub fn version() -> String {
    env!("CARGO_PKG_VERSION").to_string()
}

/// Terminate the shared background context, if one is running.
#[wasm_bindgen]
pub fn teardown() {
    compressor_core::teardown_shared_context();
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!version().is_empty());
    }

    #[test]
    fn test_teardown_without_context() {
        teardown();
        assert!(!compressor_core::shared_router().is_running());
    }
}
