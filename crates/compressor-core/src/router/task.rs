//! Messages exchanged with an execution context.
//!
//! Every field is plain data: hooks and callbacks never cross the boundary.

use std::sync::Arc;

use serde::{Deserialize, Serialize};

use crate::blob::Blob;
use crate::decode::DecodeError;
use crate::metadata::OrientationTransform;
use crate::render::{RenderOptions, Rendered};

/// Correlates a request with its response.
pub type TaskId = u64;

/// The image handed to the context, never decoded on the sending side.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", content = "data", rename_all = "camelCase")]
pub enum ImagePayload {
    Bytes(Arc<[u8]>),
    /// A base64 `data:` URL.
    DataUrl(String),
}

impl ImagePayload {
    /// Byte-level conversion only; no decoding happens here.
    pub fn into_bytes(self) -> Result<Arc<[u8]>, DecodeError> {
        match self {
            ImagePayload::Bytes(bytes) => Ok(bytes),
            ImagePayload::DataUrl(url) => Blob::from_data_url(&url)
                .map(|blob| blob.read_bytes())
                .map_err(|e| DecodeError::InvalidDataUrl(e.to_string())),
        }
    }
}

/// One render job, as submitted by a session.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct RenderJob {
    pub payload: ImagePayload,
    /// Declared media type of the source.
    pub source_type: String,
    pub transform: OrientationTransform,
    pub options: RenderOptions,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskRequest {
    pub task_id: TaskId,
    #[serde(flatten)]
    pub job: RenderJob,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TaskResponse {
    pub task_id: TaskId,
    pub result: TaskResult,
}

/// Outcome of a task inside the context.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "camelCase")]
pub enum TaskResult {
    Ok(Rendered),
    Error { message: String },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_payload_bytes_pass_through() {
        let bytes: Arc<[u8]> = Arc::from(vec![1u8, 2, 3]);
        let out = ImagePayload::Bytes(Arc::clone(&bytes)).into_bytes().unwrap();
        assert!(Arc::ptr_eq(&out, &bytes));
    }

    #[test]
    fn test_payload_data_url() {
        let url = Blob::new(vec![9u8, 8, 7], "image/png").to_data_url();
        let out = ImagePayload::DataUrl(url).into_bytes().unwrap();
        assert_eq!(&out[..], &[9, 8, 7]);

        assert!(matches!(
            ImagePayload::DataUrl("nope".into()).into_bytes(),
            Err(DecodeError::InvalidDataUrl(_))
        ));
    }
}
