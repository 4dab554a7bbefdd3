use std::time::SystemTime;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;

use super::conversation::Conversation;

/// One row of the conversation list.
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
pub struct ConversationSummary {
    pub id: String,
    pub title: String,
    pub preview: String,
    pub updated_label: String,
    pub is_active: bool,
}

impl ConversationSummary {
    pub fn of(conversation: &Conversation, is_active: bool, now: SystemTime) -> Self {
        Self {
            id: conversation.id().to_string(),
            title: conversation.title().to_string(),
            preview: conversation.last_message_preview().to_string(),
            updated_label: updated_label(conversation.updated_at(), now),
            is_active,
        }
    }
}

/// `HH:MM` for today, `Yesterday`, otherwise a short date like `Mar 4`.
pub fn updated_label(updated_at: SystemTime, now: SystemTime) -> String {
    let updated: DateTime<Utc> = updated_at.into();
    let now: DateTime<Utc> = now.into();

    let day = updated.date_naive();
    if day == now.date_naive() {
        updated.format("%H:%M").to_string()
    } else if day == (now - Duration::days(1)).date_naive() {
        "Yesterday".to_string()
    } else {
        updated.format("%b %-d").to_string()
    }
}
