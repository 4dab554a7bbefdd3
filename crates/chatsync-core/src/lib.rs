//! Client-side state engine for a streaming chat conversation.
//!
//! The crate keeps a conversation's displayed state consistent while an
//! assistant response streams in and file attachments upload in parallel.
//! Nothing here renders anything: callers drive a [`ChatEngine`] and listen
//! to the [`EngineEvent`]s it broadcasts.

pub mod config;
pub mod controllers;
pub mod error;
pub mod events;
pub mod models;
pub mod services;

#[cfg(test)]
pub(crate) mod test_helpers;

pub use config::{ChatsyncConfig, EngineConfig, SimulationConfig};
pub use controllers::{ChatEngine, Composer, SendOutcome, SendRequest, SubmitRejection, try_submit};
pub use error::{ConversationError, EngineError, StreamError, UploadError};
pub use events::{EngineEvent, TaskEvent};
pub use models::{
    ApplyOutcome, Attachment, AttachmentId, AttachmentStatus, Conversation, ConversationStore,
    ConversationSummary, Locator, Message, Role, SessionHandle, SessionId, SessionStatus,
    StreamManager, StreamingSession,
};
pub use services::{
    AttachmentPipeline, LocalFile, LocalFileMaterializer, Materialized, Materializer,
    ResponseEvent, ResponseSource, ResponseStream, SimulatedMaterializer, SimulatedResponseSource,
};
