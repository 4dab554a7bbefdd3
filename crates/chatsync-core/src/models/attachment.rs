use std::fmt;

use serde::{Deserialize, Serialize};

/// Identifier the upload pipeline assigns to every selected file.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AttachmentId(pub u64);

impl fmt::Display for AttachmentId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "att-{}", self.0)
    }
}

/// Opaque reference to materialized file content.
///
/// Whoever holds a locator outside a message must hand it back to the
/// materializer that minted it, otherwise the underlying resource leaks.
#[derive(Clone, Debug, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct Locator(pub String);

impl Locator {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl fmt::Display for Locator {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(&self.0)
    }
}

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum AttachmentStatus {
    Queued,
    Uploading,
    Ready,
    Failed,
}

impl AttachmentStatus {
    /// Queued and uploading files count towards the visible queue size.
    pub fn is_pending(self) -> bool {
        matches!(self, AttachmentStatus::Queued | AttachmentStatus::Uploading)
    }
}

#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Attachment {
    pub id: AttachmentId,
    /// Set once the upload completed.
    pub reference: Option<Locator>,
    pub name: String,
    pub content_type: String,
    pub size_bytes: u64,
    pub status: AttachmentStatus,
}
