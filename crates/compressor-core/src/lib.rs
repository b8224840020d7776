//! Compressor Core - client-side image compression
//!
//! This crate takes an encoded image and produces a re-encoded, optionally
//! resized copy: EXIF orientation is applied, size constraints are resolved,
//! and the result is exported as JPEG, PNG or WebP. The EXIF block of JPEG
//! sources can be carried over into JPEG output.
//!
//! # Architecture
//!
//! - [`session`]: the per-request state machine, abort handling and result
//!   policy
//! - [`geometry`]: output dimensions and source crop for every resize mode
//! - [`metadata`]: EXIF orientation and APP1 segment surgery
//! - [`render`]: the drawing surface and encoders
//! - [`router`] and [`worker`]: one shared background context with
//!   task correlation, timeouts and main-thread fallback
//!
//! # Examples
//!
//! ```ignore
//! use compressor_core::{compress, Blob, CompressOptions};
//!
//! let source = Blob::new(std::fs::read("photo.jpg")?, "image/jpeg").with_name("photo.jpg");
//! let options = CompressOptions { max_width: 1920.0, ..CompressOptions::default() };
//! let result = compress(source, options).await?;
//! ```

use std::sync::{Arc, OnceLock};

pub mod blob;
pub mod decode;
pub mod error;
pub mod geometry;
pub mod metadata;
pub mod mime;
pub mod object_url;
pub mod options;
pub mod render;
pub mod router;
pub mod session;
pub mod worker;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use blob::{Blob, DataUrlError};
pub use error::CompressError;
pub use geometry::{plan_draw, DrawPlan, Rect, ResizeMode, SizeConstraints};
pub use metadata::{Orientation, OrientationTransform};
pub use object_url::{InMemoryUrlRegistry, ObjectUrl, ObjectUrlRegistry};
pub use options::{reset_defaults, set_defaults, CompressOptions};
pub use render::{DrawingSurface, OutputFormat, Rendered};
pub use router::{ExecutionRouter, RouterConfig, RoutingError, WorkerMode};
pub use session::{AbortHandle, Completion, Compressor, Runtime, SessionState};
pub use worker::ThreadContextFactory;

/// The router shared by every session created with [`Compressor::new`].
pub fn shared_router() -> Arc<ExecutionRouter> {
    static ROUTER: OnceLock<Arc<ExecutionRouter>> = OnceLock::new();
    Arc::clone(ROUTER.get_or_init(|| ExecutionRouter::new(Arc::new(ThreadContextFactory))))
}

/// Terminate the shared background context now, rejecting in-flight tasks.
///
/// A later session spawns a fresh one on demand.
pub fn teardown_shared_context() {
    shared_router().shutdown();
}

/// Compress `source` on the shared runtime.
///
/// # Errors
///
/// Returns the session's error; an abort is reported as
/// `CompressError::Aborted`.
pub async fn compress(source: Blob, options: CompressOptions) -> Result<Blob, CompressError> {
    match Compressor::new(source, options).run().await? {
        Completion::Compressed(blob) => Ok(blob),
        Completion::Aborted => Err(CompressError::Aborted),
    }
}
