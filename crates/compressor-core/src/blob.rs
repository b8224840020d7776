//! An immutable, cheaply clonable binary object with a declared media type.

use std::sync::Arc;

use base64::engine::general_purpose::STANDARD;
use base64::Engine;
use thiserror::Error;

/// Errors produced when parsing a `data:` URL.
#[derive(Debug, Error, PartialEq, Eq)]
pub enum DataUrlError {
    #[error("not a data URL")]
    NotDataUrl,

    #[error("data URL is not base64 encoded")]
    NotBase64,

    #[error("invalid base64 payload: {0}")]
    InvalidPayload(String),
}

/// Source and result object of a compression.
///
/// Cloning shares the byte buffer, so [`Blob::same_bytes`] can tell an
/// untouched source apart from an equal-looking copy.
#[derive(Debug, Clone)]
pub struct Blob {
    bytes: Arc<[u8]>,
    mime_type: String,
    name: Option<String>,
    /// Milliseconds since the Unix epoch.
    last_modified: u64,
}

impl Blob {
    pub fn new(bytes: impl Into<Arc<[u8]>>, mime_type: impl Into<String>) -> Self {
        Self {
            bytes: bytes.into(),
            mime_type: mime_type.into(),
            name: None,
            last_modified: 0,
        }
    }

    /// Attach a file name.
    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = Some(name.into());
        self
    }

    /// Set the modification time in milliseconds since the Unix epoch.
    pub fn with_last_modified(mut self, millis: u64) -> Self {
        self.last_modified = millis;
        self
    }

    pub fn size(&self) -> usize {
        self.bytes.len()
    }

    pub fn mime_type(&self) -> &str {
        &self.mime_type
    }

    pub fn name(&self) -> Option<&str> {
        self.name.as_deref()
    }

    pub fn last_modified(&self) -> u64 {
        self.last_modified
    }

    pub fn bytes(&self) -> &[u8] {
        &self.bytes
    }

    /// A shared handle to the underlying buffer.
    pub fn read_bytes(&self) -> Arc<[u8]> {
        Arc::clone(&self.bytes)
    }

    /// Encode as `data:<type>;base64,<payload>`.
    pub fn to_data_url(&self) -> String {
        format!("data:{};base64,{}", self.mime_type, STANDARD.encode(&self.bytes))
    }

    /// Parse a base64 `data:` URL.
    pub fn from_data_url(url: &str) -> Result<Self, DataUrlError> {
        let (mime_type, payload) = parse_data_url(url)?;
        let bytes = STANDARD
            .decode(payload)
            .map_err(|e| DataUrlError::InvalidPayload(e.to_string()))?;
        Ok(Self::new(bytes, mime_type))
    }

    /// True when both blobs share the same byte buffer.
    pub fn same_bytes(&self, other: &Blob) -> bool {
        Arc::ptr_eq(&self.bytes, &other.bytes)
    }
}

/// Split a base64 data URL into its media type and payload.
pub(crate) fn parse_data_url(url: &str) -> Result<(&str, &str), DataUrlError> {
    let rest = url.strip_prefix("data:").ok_or(DataUrlError::NotDataUrl)?;
    let (header, payload) = rest.split_once(',').ok_or(DataUrlError::NotDataUrl)?;
    let mime_type = header
        .strip_suffix(";base64")
        .ok_or(DataUrlError::NotBase64)?;
    Ok((mime_type, payload))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_data_url_round_trip() {
        let blob = Blob::new(vec![0xFF, 0xD8, 0x00, 0x7F], "image/jpeg");
        let url = blob.to_data_url();
        assert_eq!(url, "data:image/jpeg;base64,/9gAfw==");

        let parsed = Blob::from_data_url(&url).unwrap();
        assert_eq!(parsed.mime_type(), "image/jpeg");
        assert_eq!(parsed.bytes(), blob.bytes());
        assert!(!parsed.same_bytes(&blob));
    }

    #[test]
    fn test_data_url_errors() {
        assert_eq!(
            Blob::from_data_url("http://example.com").unwrap_err(),
            DataUrlError::NotDataUrl
        );
        assert_eq!(
            Blob::from_data_url("data:text/plain,hello").unwrap_err(),
            DataUrlError::NotBase64
        );
        assert!(matches!(
            Blob::from_data_url("data:image/png;base64,***"),
            Err(DataUrlError::InvalidPayload(_))
        ));
    }

    #[test]
    fn test_clone_shares_bytes() {
        let blob = Blob::new(vec![1, 2, 3], "image/png").with_name("a.png");
        let clone = blob.clone();
        assert!(blob.same_bytes(&clone));
        assert_eq!(clone.name(), Some("a.png"));
        assert_eq!(clone.size(), 3);

        let copy = Blob::new(blob.bytes().to_vec(), "image/png");
        assert!(!blob.same_bytes(&copy));
    }
}
