use serde::Serialize;

use crate::models::stream_manager::StreamTaskEvent;
use crate::models::{Attachment, AttachmentId, Message, SessionId, SessionStatus};
use crate::services::upload_pipeline::UploadTaskEvent;

/// Message from a background task back to the engine.
///
/// Tasks never touch engine state directly; the engine applies these one at
/// a time, so every mutation happens within a single scheduler turn.
#[derive(Debug)]
pub enum TaskEvent {
    Stream(StreamTaskEvent),
    Upload(UploadTaskEvent),
}

impl From<StreamTaskEvent> for TaskEvent {
    fn from(event: StreamTaskEvent) -> Self {
        TaskEvent::Stream(event)
    }
}

impl From<UploadTaskEvent> for TaskEvent {
    fn from(event: UploadTaskEvent) -> Self {
        TaskEvent::Upload(event)
    }
}

/// Events broadcast by [`crate::ChatEngine`] for rendering and telemetry.
/// Each variant is tagged with the ids subscribers need to filter on.
#[derive(Clone, Debug, Serialize)]
#[serde(tag = "event", rename_all = "snake_case")]
pub enum EngineEvent {
    ConversationCreated {
        conversation_id: String,
    },
    ActiveConversationChanged {
        conversation_id: String,
    },
    ConversationDeleted {
        conversation_id: String,
    },
    ConversationUpdated {
        conversation_id: String,
        preview: String,
    },
    MessageAppended {
        conversation_id: String,
        message: Message,
    },
    StreamingChunkApplied {
        conversation_id: String,
        session_id: SessionId,
        sequence: u64,
        content: String,
    },
    SessionFinalized {
        conversation_id: String,
        session_id: SessionId,
        status: SessionStatus,
    },
    AttachmentQueued {
        attachment: Attachment,
    },
    AttachmentReady {
        attachment: Attachment,
    },
    AttachmentFailed {
        attachment: Attachment,
        reason: String,
    },
    AttachmentRejected {
        name: String,
        reason: String,
    },
    AttachmentRemoved {
        attachment_id: AttachmentId,
    },
}
