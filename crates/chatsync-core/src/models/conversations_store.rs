use std::collections::HashMap;
use std::time::SystemTime;

use tracing::debug;

use super::conversation::Conversation;
use super::message::Message;
use super::summary::ConversationSummary;
use crate::config::EngineConfig;
use crate::error::{ConversationError, ConversationResult};

/// Result of offering a streaming update to the store.
#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum ApplyOutcome {
    Applied,
    /// The update carried a sequence number at or below one already applied.
    Stale,
}

/// Owns every conversation, in display order (newest first).
pub struct ConversationStore {
    conversations: Vec<Conversation>,
    active_conversation_id: Option<String>,
    /// Highest sequence applied to each conversation's open placeholder.
    /// Present exactly while the trailing message is non-final.
    streaming_sequences: HashMap<String, u64>,
    preview_length: usize,
    greeting: String,
    new_conversation_title: String,
    new_conversation_preview: String,
}

impl ConversationStore {
    pub fn new(config: &EngineConfig) -> Self {
        Self {
            conversations: Vec::new(),
            active_conversation_id: None,
            streaming_sequences: HashMap::new(),
            preview_length: config.preview_length,
            greeting: config.greeting.clone(),
            new_conversation_title: config.new_conversation_title.clone(),
            new_conversation_preview: config.new_conversation_preview.clone(),
        }
    }

    /// Create a conversation seeded with the greeting, put it at the top of
    /// the list and make it active.
    pub fn create_conversation(&mut self) -> &Conversation {
        let mut conversation = Conversation::new(self.new_conversation_title.clone());
        conversation.push(Message::assistant(self.greeting.clone()));
        conversation.touch(&self.new_conversation_preview, self.preview_length);

        debug!(conv_id = %conversation.id(), "Created conversation");
        self.active_conversation_id = Some(conversation.id().to_string());
        self.conversations.insert(0, conversation);
        &self.conversations[0]
    }

    /// Add an already existing conversation below the current ones.
    /// The first conversation ever added becomes active.
    pub fn insert_existing(&mut self, conversation: Conversation) {
        if self.active_conversation_id.is_none() {
            self.active_conversation_id = Some(conversation.id().to_string());
        }
        if conversation.streaming_message().is_some() {
            self.streaming_sequences
                .insert(conversation.id().to_string(), 0);
        }
        self.conversations.push(conversation);
    }

    /// Change the active conversation. Message contents are left alone.
    pub fn select_conversation(&mut self, id: &str) -> ConversationResult<()> {
        if self.get(id).is_none() {
            return Err(unknown(id));
        }
        self.active_conversation_id = Some(id.to_string());
        Ok(())
    }

    /// Delete a conversation; the next one in the list becomes active if the
    /// active one was removed.
    pub fn delete_conversation(&mut self, id: &str) -> bool {
        let Some(index) = self.index_of(id) else {
            return false;
        };
        self.conversations.remove(index);
        self.streaming_sequences.remove(id);

        if self.active_conversation_id.as_deref() == Some(id) {
            self.active_conversation_id = self.conversations.first().map(|c| c.id().to_string());
        }
        true
    }

    pub fn get(&self, id: &str) -> Option<&Conversation> {
        self.conversations.iter().find(|c| c.id() == id)
    }

    pub fn active_id(&self) -> Option<&str> {
        self.active_conversation_id.as_deref()
    }

    pub fn active(&self) -> Option<&Conversation> {
        self.active_id().and_then(|id| self.get(id))
    }

    pub fn list(&self) -> &[Conversation] {
        &self.conversations
    }

    pub fn count(&self) -> usize {
        self.conversations.len()
    }

    /// Conversation list rows with time labels relative to `now`.
    pub fn summaries(&self, now: SystemTime) -> Vec<ConversationSummary> {
        self.conversations
            .iter()
            .map(|c| ConversationSummary::of(c, self.active_id() == Some(c.id()), now))
            .collect()
    }

    /// Append a finished message. Rejected while a response is streaming,
    /// since the open placeholder must stay the trailing message.
    pub fn append_message(&mut self, conversation_id: &str, mut message: Message) -> ConversationResult<()> {
        let preview_length = self.preview_length;
        let conversation = self.get_mut(conversation_id)?;
        if conversation.streaming_message().is_some() {
            return Err(ConversationError::StreamInProgress {
                conversation_id: conversation_id.to_string(),
            });
        }

        message.is_final = true;
        conversation.touch(&message.content, preview_length);
        conversation.push(message);
        Ok(())
    }

    /// Append an empty, non-final assistant message for a new response.
    ///
    /// A non-final message left behind by a failed response is sealed with
    /// whatever content it had before the new placeholder goes in.
    pub fn begin_streaming_message(&mut self, conversation_id: &str) -> ConversationResult<Message> {
        if self.seal_streaming_message(conversation_id)?.is_some() {
            debug!(conv_id = %conversation_id, "Sealed leftover streaming message");
        }

        let placeholder = Message::placeholder();
        self.get_mut(conversation_id)?.push(placeholder.clone());
        self.streaming_sequences
            .insert(conversation_id.to_string(), 0);
        Ok(placeholder)
    }

    /// Replace the streaming message's content if `sequence` is newer than
    /// every update applied so far. Older updates are dropped.
    pub fn apply_streaming_update(
        &mut self,
        conversation_id: &str,
        sequence: u64,
        content: &str,
    ) -> ConversationResult<ApplyOutcome> {
        let last_applied = match self.streaming_sequences.get(conversation_id) {
            Some(seq) => *seq,
            None => {
                self.get_mut(conversation_id)?;
                return Err(not_streaming(conversation_id));
            }
        };

        if sequence <= last_applied {
            debug!(conv_id = %conversation_id, sequence, last_applied, "Discarding stale update");
            return Ok(ApplyOutcome::Stale);
        }

        let message = self
            .get_mut(conversation_id)?
            .streaming_message_mut()
            .ok_or_else(|| not_streaming(conversation_id))?;
        message.content.clear();
        message.content.push_str(content);
        self.streaming_sequences
            .insert(conversation_id.to_string(), sequence);
        Ok(ApplyOutcome::Applied)
    }

    /// Set the streaming message's final content and close it.
    pub fn finalize_streaming_message(&mut self, conversation_id: &str, content: &str) -> ConversationResult<()> {
        let preview_length = self.preview_length;
        let conversation = self.get_mut(conversation_id)?;
        let message = conversation
            .streaming_message_mut()
            .ok_or_else(|| not_streaming(conversation_id))?;
        message.content = content.to_string();
        message.is_final = true;
        conversation.touch(content, preview_length);

        self.streaming_sequences.remove(conversation_id);
        Ok(())
    }

    /// Close the streaming message keeping its current content.
    /// Returns the sealed message, or `None` if nothing was streaming.
    pub fn seal_streaming_message(&mut self, conversation_id: &str) -> ConversationResult<Option<Message>> {
        let preview_length = self.preview_length;
        let conversation = self.get_mut(conversation_id)?;
        let Some(message) = conversation.streaming_message_mut() else {
            return Ok(None);
        };
        message.is_final = true;
        let sealed = message.clone();
        conversation.touch(&sealed.content, preview_length);

        self.streaming_sequences.remove(conversation_id);
        Ok(Some(sealed))
    }

    fn index_of(&self, id: &str) -> Option<usize> {
        self.conversations.iter().position(|c| c.id() == id)
    }

    fn get_mut(&mut self, id: &str) -> ConversationResult<&mut Conversation> {
        self.conversations
            .iter_mut()
            .find(|c| c.id() == id)
            .ok_or_else(|| unknown(id))
    }
}

fn unknown(id: &str) -> ConversationError {
    ConversationError::UnknownConversation {
        conversation_id: id.to_string(),
    }
}

fn not_streaming(id: &str) -> ConversationError {
    ConversationError::NotStreaming {
        conversation_id: id.to_string(),
    }
}
