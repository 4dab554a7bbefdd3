pub mod attachment;
pub mod conversation;
pub mod conversations_store;
pub mod message;
pub mod stream_manager;
pub mod summary;

pub use attachment::{Attachment, AttachmentId, AttachmentStatus, Locator};
pub use conversation::Conversation;
pub use conversations_store::{ApplyOutcome, ConversationStore};
pub use message::{Message, Role};
pub use stream_manager::{
    SessionHandle, SessionId, SessionStatus, StreamManager, StreamOutcome, StreamingSession,
};
pub use summary::ConversationSummary;
