use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::attachment::Attachment;

#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Role {
    User,
    Assistant,
}

/// One entry of a conversation's message list.
///
/// Only the trailing assistant message of a conversation may be non-final,
/// and only while a response is streaming into it.
#[derive(Clone, Debug, PartialEq, Eq, Serialize, Deserialize)]
pub struct Message {
    pub id: String,
    pub role: Role,
    pub content: String,
    pub is_final: bool,
    /// Attachments submitted together with a user message.
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub attachments: Vec<Attachment>,
}

impl Message {
    pub fn user(content: impl Into<String>, attachments: Vec<Attachment>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::User,
            content: content.into(),
            is_final: true,
            attachments,
        }
    }

    pub fn assistant(content: impl Into<String>) -> Self {
        Self {
            id: Uuid::new_v4().to_string(),
            role: Role::Assistant,
            content: content.into(),
            is_final: true,
            attachments: Vec::new(),
        }
    }

    /// Empty, non-final assistant message that a streaming response fills in.
    pub fn placeholder() -> Self {
        Self {
            is_final: false,
            ..Self::assistant(String::new())
        }
    }

    pub fn is_user(&self) -> bool {
        self.role == Role::User
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_placeholder_is_empty_and_open() {
        let msg = Message::placeholder();
        assert_eq!(msg.role, Role::Assistant);
        assert!(msg.content.is_empty());
        assert!(!msg.is_final);
    }

    #[test]
    fn test_ids_are_unique() {
        let a = Message::user("hi", Vec::new());
        let b = Message::user("hi", Vec::new());
        assert_ne!(a.id, b.id);
        assert!(a.is_user());
    }

    #[test]
    fn test_role_serializes_lowercase() {
        let json = serde_json::to_value(Message::assistant("ok")).unwrap();
        assert_eq!(json["role"], "assistant");
        assert!(json.get("attachments").is_none());
    }
}
