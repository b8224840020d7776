//! Top-level error type of a compression session.

use thiserror::Error;

use crate::decode::DecodeError;
use crate::render::EncodeError;
use crate::router::RoutingError;

/// Every way a compression can end without a result.
#[derive(Debug, Clone, Error)]
pub enum CompressError {
    /// The source is not a blob-like object or its type is not an image type.
    #[error("The first argument must be an image File or Blob object: {0}")]
    InvalidInput(String),

    /// The runtime lacks a primitive the requested path depends on.
    #[error("The current runtime does not support {0}")]
    UnsupportedRuntime(String),

    /// Reading the source bytes or metadata was aborted or failed.
    #[error("Failed to read the image: {0}")]
    ReadFailure(String),

    #[error("Failed to load the image: {0}")]
    DecodeFailure(#[from] DecodeError),

    /// Background execution failed and no fallback was allowed.
    #[error("Background execution failed: {0}")]
    RoutingFailure(#[from] RoutingError),

    #[error("Failed to encode the image: {0}")]
    EncodeFailure(#[from] EncodeError),

    #[error("Aborted to compress the image.")]
    Aborted,

    /// `run` was called on a session that already reached a terminal state.
    #[error("The compression session has already finished")]
    AlreadyFinished,
}
