//! Attachment validation logic
//!
//! Size checks run before an upload is started; content types are derived
//! from the file extension when the file does not declare one.

use crate::error::{UploadError, UploadResult};

pub const FALLBACK_CONTENT_TYPE: &str = "application/octet-stream";

/// Reject a file larger than `max` bytes. A file of exactly `max` passes.
pub fn validate_size(name: &str, size: u64, max: u64) -> UploadResult<()> {
    if size > max {
        return Err(UploadError::SizeExceeded {
            name: name.to_string(),
            size,
            max,
        });
    }
    Ok(())
}

/// Best-effort MIME type from a file name's extension.
pub fn content_type_for(name: &str) -> String {
    mime_guess::from_path(name)
        .first()
        .map(|mime| mime.to_string())
        .unwrap_or_else(|| FALLBACK_CONTENT_TYPE.to_string())
}

/// Check if a file is an image based on its content type
pub fn is_image(content_type: &str) -> bool {
    content_type.starts_with("image/")
}
