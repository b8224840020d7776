//! Compression options and the process-wide defaults they start from.
//!
//! Options deserialize from camelCase keys (the shape a JavaScript caller
//! passes); every missing key is filled from the current global defaults,
//! which [`set_defaults`] can change for all subsequent requests.
//!
//! # Examples
//!
//! ```ignore
//! use compressor_core::options::{set_defaults, CompressOptions};
//!
//! set_defaults(|opts| opts.quality = 0.6);
//! let opts = CompressOptions::default();
//! assert_eq!(opts.quality, 0.6);
//! ```

use std::sync::OnceLock;

use parking_lot::RwLock;
use serde::{Deserialize, Deserializer, Serialize};

use crate::geometry::{ResizeMode, SizeConstraints};
use crate::router::WorkerMode;

/// Every data option of a compression request.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase", default = "defaults")]
pub struct CompressOptions {
    /// Return the source instead of a larger, unconstrained result.
    pub strict: bool,
    /// Read the EXIF orientation of JPEG sources and draw upright.
    pub check_orientation: bool,
    /// Copy the EXIF block of JPEG sources into JPEG output.
    #[serde(alias = "retainExif")]
    pub retain_metadata: bool,
    #[serde(deserialize_with = "unbounded_if_null")]
    pub max_width: f64,
    #[serde(deserialize_with = "unbounded_if_null")]
    pub max_height: f64,
    pub min_width: f64,
    pub min_height: f64,
    /// Fixed output width; natural width when unset.
    pub width: Option<f64>,
    /// Fixed output height; natural height when unset.
    pub height: Option<f64>,
    pub resize: ResizeMode,
    /// Lossy quality in `0..=1`.
    pub quality: f64,
    /// Output media type, or `"auto"` to keep the source type.
    pub mime_type: String,
    /// Source types converted to JPEG once they exceed `convert_size`.
    pub convert_types: Vec<String>,
    /// Byte threshold for `convert_types`.
    pub convert_size: u64,
    /// `Some(true)`/`Some(false)` force the execution path, `None` detects it.
    pub use_worker: Option<bool>,
    /// Location of an externally built worker script.
    pub worker_path: Option<String>,
}

impl CompressOptions {
    /// The built-in defaults, ignoring [`set_defaults`].
    pub fn builtin() -> Self {
        Self {
            strict: true,
            check_orientation: true,
            retain_metadata: false,
            max_width: f64::INFINITY,
            max_height: f64::INFINITY,
            min_width: 0.0,
            min_height: 0.0,
            width: None,
            height: None,
            resize: ResizeMode::None,
            quality: 0.8,
            mime_type: "auto".to_string(),
            convert_types: vec![crate::mime::PNG.to_string()],
            convert_size: 5_000_000,
            use_worker: None,
            worker_path: None,
        }
    }

    pub fn worker_mode(&self) -> WorkerMode {
        WorkerMode::from(self.use_worker)
    }

    /// The geometry subset of these options.
    pub fn size_constraints(&self) -> SizeConstraints {
        SizeConstraints {
            max_width: self.max_width,
            max_height: self.max_height,
            min_width: self.min_width,
            min_height: self.min_height,
            width: self.width,
            height: self.height,
            resize: self.resize,
        }
    }
}

impl Default for CompressOptions {
    /// A snapshot of the current global defaults.
    fn default() -> Self {
        defaults()
    }
}

fn unbounded_if_null<'de, D>(deserializer: D) -> Result<f64, D::Error>
where
    D: Deserializer<'de>,
{
    Ok(Option::<f64>::deserialize(deserializer)?.unwrap_or(f64::INFINITY))
}

fn global() -> &'static RwLock<CompressOptions> {
    static DEFAULTS: OnceLock<RwLock<CompressOptions>> = OnceLock::new();
    DEFAULTS.get_or_init(|| RwLock::new(CompressOptions::builtin()))
}

/// Snapshot of the current global defaults.
pub fn defaults() -> CompressOptions {
    global().read().clone()
}

/// Mutate the global defaults used by every later request.
pub fn set_defaults(update: impl FnOnce(&mut CompressOptions)) {
    update(&mut global().write());
}

/// Restore the built-in defaults.
pub fn reset_defaults() {
    *global().write() = CompressOptions::builtin();
}

/// Serializes tests that touch the global defaults.
#[cfg(test)]
pub(crate) static DEFAULTS_TEST_LOCK: parking_lot::Mutex<()> = parking_lot::Mutex::new(());

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_builtin_values() {
        let opts = CompressOptions::builtin();
        assert!(opts.strict);
        assert!(opts.check_orientation);
        assert!(!opts.retain_metadata);
        assert!(opts.max_width.is_infinite());
        assert_eq!(opts.quality, 0.8);
        assert_eq!(opts.mime_type, "auto");
        assert_eq!(opts.convert_types, vec!["image/png".to_string()]);
        assert_eq!(opts.convert_size, 5_000_000);
        assert_eq!(opts.worker_mode(), WorkerMode::Auto);
    }

    #[test]
    fn test_set_and_reset_defaults() {
        let _guard = DEFAULTS_TEST_LOCK.lock();

        set_defaults(|opts| {
            opts.quality = 0.5;
            opts.strict = false;
        });
        let opts = CompressOptions::default();
        assert_eq!(opts.quality, 0.5);
        assert!(!opts.strict);

        reset_defaults();
        assert_eq!(CompressOptions::default(), CompressOptions::builtin());
    }

    #[test]
    fn test_size_constraints_mirror_options() {
        let opts = CompressOptions {
            max_width: 800.0,
            width: Some(300.0),
            resize: ResizeMode::Cover,
            ..CompressOptions::builtin()
        };
        let constraints = opts.size_constraints();
        assert_eq!(constraints.max_width, 800.0);
        assert!(constraints.max_height.is_infinite());
        assert_eq!(constraints.width, Some(300.0));
        assert_eq!(constraints.resize, ResizeMode::Cover);
    }
}
