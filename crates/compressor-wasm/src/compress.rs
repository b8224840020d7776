//! Compression WASM bindings.
//!
//! Sessions run on the calling thread: the background context is a native
//! thread and is not available on `wasm32`. A request for it renders on the
//! calling thread with a console warning.
//!
//! # Example
//!
//! ```typescript
//! import { compress_image, set_defaults } from '@compressor/wasm';
//!
//! set_defaults({ quality: 0.7 });
//!
//! const bytes = new Uint8Array(await file.arrayBuffer());
//! const result = compress_image(bytes, file.type, file.name, { maxWidth: 1920 });
//! const output = new File([result.bytes()], result.name, { type: result.mimeType });
//! ```

use compressor_core::{Blob, CompressError, CompressOptions, Completion, Compressor, Runtime};
use wasm_bindgen::prelude::*;

use crate::types::JsCompressedImage;

/// Compress an encoded image.
///
/// # Arguments
///
/// * `bytes` - The encoded source image
/// * `mime_type` - Declared media type of the source, e.g. `image/png`
/// * `name` - Optional file name; the extension follows the output type
/// * `options` - Optional options object (camelCase keys); omitted keys take
///   the current defaults
///
/// # Errors
///
/// Returns an error string if the options are malformed, the source is not
/// an image type, or decoding or encoding fails.
#[wasm_bindgen]
pub fn compress_image(
    bytes: &[u8],
    mime_type: &str,
    name: Option<String>,
    options: JsValue,
) -> Result<JsCompressedImage, JsValue> {
    let options = parse_options(options)?;
    if options.use_worker == Some(true) {
        web_sys::console::warn_1(&JsValue::from_str(
            "compressor: background execution is unavailable, compressing on the main thread",
        ));
    }
    compress_bytes(bytes, mime_type, name, options).map_err(|e| JsValue::from_str(&e.to_string()))
}

/// Merge `options` into the defaults used by later calls.
///
/// Keys missing from `options` keep their current default.
#[wasm_bindgen]
pub fn set_defaults(options: JsValue) -> Result<(), JsValue> {
    let merged = parse_options(options)?;
    compressor_core::set_defaults(|defaults| *defaults = merged);
    Ok(())
}

/// Restore the built-in defaults.
#[wasm_bindgen]
pub fn reset_defaults() {
    compressor_core::reset_defaults();
}

/// Current defaults as a plain object.
#[wasm_bindgen]
pub fn get_defaults() -> Result<JsValue, JsValue> {
    serde_wasm_bindgen::to_value(&compressor_core::options::defaults())
        .map_err(|e| JsValue::from_str(&e.to_string()))
}

fn parse_options(options: JsValue) -> Result<CompressOptions, JsValue> {
    if options.is_undefined() || options.is_null() {
        return Ok(CompressOptions::default());
    }
    serde_wasm_bindgen::from_value(options)
        .map_err(|e| JsValue::from_str(&format!("Invalid options: {}", e)))
}

fn runtime() -> Runtime {
    let runtime = Runtime::main_thread();
    #[cfg(target_arch = "wasm32")]
    let runtime = runtime.with_clock(|| js_sys::Date::now() as u64);
    runtime
}

/// Run one session on the calling thread.
pub(crate) fn compress_bytes(
    bytes: &[u8],
    mime_type: &str,
    name: Option<String>,
    options: CompressOptions,
) -> Result<JsCompressedImage, CompressError> {
    let mut source = Blob::new(bytes.to_vec(), mime_type);
    if let Some(name) = name {
        source = source.with_name(name);
    }

    match Compressor::with_runtime(source, options, runtime()).run_blocking()? {
        Completion::Compressed(blob) => Ok(JsCompressedImage::from_blob(blob)),
        Completion::Aborted => Err(CompressError::Aborted),
    }
}
