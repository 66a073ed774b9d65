//! Upload validation.

use bytes::Bytes;

use crate::error::{RestError, RestResult};

/// Accepted upload types and the extension stored for each.
const ALLOWED: [(&str, &str); 5] = [
    ("application/pdf", "pdf"),
    ("image/jpeg", "jpg"),
    ("image/png", "png"),
    ("application/msword", "doc"),
    (
        "application/vnd.openxmlformats-officedocument.wordprocessingml.document",
        "docx",
    ),
];

/// A file received from a multipart request.
#[derive(Debug, Clone)]
pub struct Upload {
    /// Client-supplied file name.
    pub file_name: String,
    /// Declared MIME type.
    pub content_type: String,
    /// File content.
    pub data: Bytes,
}

impl Upload {
    /// Checks the size cap and the type allow-list, returning the storage
    /// extension.
    pub fn validate(&self, max_size: usize) -> RestResult<&'static str> {
        if self.data.len() > max_size {
            return Err(RestError::PayloadTooLarge { limit: max_size });
        }
        if self.data.is_empty() {
            return Err(RestError::validation("The uploaded file is empty"));
        }
        extension_for(&self.content_type).ok_or_else(|| RestError::UnsupportedMediaType {
            content_type: self.content_type.clone(),
        })
    }
}

/// Maps an allowed MIME type (parameters ignored) to its extension.
pub fn extension_for(content_type: &str) -> Option<&'static str> {
    let essence = content_type
        .split(';')
        .next()
        .unwrap_or_default()
        .trim()
        .to_ascii_lowercase();
    ALLOWED
        .iter()
        .find(|(mime, _)| *mime == essence)
        .map(|(_, ext)| *ext)
}
