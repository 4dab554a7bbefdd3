use std::time::SystemTime;

use serde::{Deserialize, Serialize};
use uuid::Uuid;

use super::message::Message;

/// A single conversation and its summary metadata.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
pub struct Conversation {
    id: String,
    title: String,
    last_message_preview: String,
    updated_at: SystemTime,
    messages: Vec<Message>,
}

impl Conversation {
    /// Create an empty conversation with a fresh id
    pub fn new(title: impl Into<String>) -> Self {
        Self::with_id(Uuid::new_v4().to_string(), title)
    }

    pub fn with_id(id: impl Into<String>, title: impl Into<String>) -> Self {
        Self {
            id: id.into(),
            title: title.into(),
            last_message_preview: String::new(),
            updated_at: SystemTime::now(),
            messages: Vec::new(),
        }
    }

    /// Restore a conversation whose summary is known but whose messages
    /// have not been loaded (the conversation list shows it anyway).
    pub fn from_summary(
        id: impl Into<String>,
        title: impl Into<String>,
        last_message_preview: impl Into<String>,
        updated_at: SystemTime,
    ) -> Self {
        Self {
            last_message_preview: last_message_preview.into(),
            updated_at,
            ..Self::with_id(id, title)
        }
    }

    pub fn id(&self) -> &str {
        &self.id
    }

    pub fn title(&self) -> &str {
        &self.title
    }

    pub fn last_message_preview(&self) -> &str {
        &self.last_message_preview
    }

    pub fn updated_at(&self) -> SystemTime {
        self.updated_at
    }

    pub fn messages(&self) -> &[Message] {
        &self.messages
    }

    pub fn trailing(&self) -> Option<&Message> {
        self.messages.last()
    }

    /// The trailing message if a response is still streaming into it.
    pub fn streaming_message(&self) -> Option<&Message> {
        self.messages.last().filter(|msg| !msg.is_final)
    }

    pub(crate) fn streaming_message_mut(&mut self) -> Option<&mut Message> {
        self.messages.last_mut().filter(|msg| !msg.is_final)
    }

    pub(crate) fn push(&mut self, message: Message) {
        self.messages.push(message);
    }

    /// Refresh `updated_at` and, when `text` is non-empty, the preview.
    pub(crate) fn touch(&mut self, text: &str, preview_length: usize) {
        if !text.trim().is_empty() {
            self.last_message_preview = truncate_preview(text, preview_length);
        }
        self.updated_at = SystemTime::now();
    }
}

/// Keep the first `max_chars` characters, marking a cut with `...`.
pub fn truncate_preview(text: &str, max_chars: usize) -> String {
    let mut chars = text.chars();
    let head: String = chars.by_ref().take(max_chars).collect();
    if chars.next().is_some() {
        format!("{head}...")
    } else {
        head
    }
}
