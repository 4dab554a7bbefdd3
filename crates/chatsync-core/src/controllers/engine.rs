use std::sync::Arc;

use tokio::sync::{broadcast, mpsc};
use tracing::{debug, info, warn};

use super::submission_gate::{Composer, SendRequest, SubmitRejection};
use crate::config::EngineConfig;
use crate::error::{EngineResult, StreamError, UploadError};
use crate::events::{EngineEvent, TaskEvent};
use crate::models::stream_manager::StreamTaskEvent;
use crate::models::{
    AttachmentId, Conversation, ConversationStore, Message, SessionHandle, SessionId, SessionStatus,
    StreamManager, StreamOutcome,
};
use crate::services::upload_pipeline::UploadTaskEvent;
use crate::services::{AttachmentPipeline, EnqueueReport, LocalFile, Materializer, ResponseSource, UploadOutcome};

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum SendOutcome {
    Started(SessionHandle),
    /// The gate refused; nothing was changed.
    Rejected(SubmitRejection),
}

/// Owns all chat state and applies what background tasks report.
///
/// Upload and response tasks run on the tokio runtime but only ever send a
/// [`TaskEvent`] back; state changes happen in [`ChatEngine::handle_task_event`]
/// and the user-facing methods, one at a time. Callers drive the engine with
/// [`ChatEngine::next_event`] and watch it through [`ChatEngine::subscribe`].
pub struct ChatEngine {
    config: EngineConfig,
    store: ConversationStore,
    uploads: AttachmentPipeline,
    streams: StreamManager,
    composer: Composer,
    task_rx: mpsc::UnboundedReceiver<TaskEvent>,
    events: broadcast::Sender<EngineEvent>,
}

impl ChatEngine {
    pub fn new(config: EngineConfig, source: Arc<dyn ResponseSource>, materializer: Arc<dyn Materializer>) -> Self {
        let (task_tx, task_rx) = mpsc::unbounded_channel();
        let (events, _) = broadcast::channel(config.event_capacity.max(1));

        Self {
            store: ConversationStore::new(&config),
            uploads: AttachmentPipeline::new(materializer, config.max_attachment_bytes, task_tx.clone()),
            streams: StreamManager::new(source, task_tx),
            composer: Composer::new(),
            task_rx,
            events,
            config,
        }
    }

    pub fn subscribe(&self) -> broadcast::Receiver<EngineEvent> {
        self.events.subscribe()
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn store(&self) -> &ConversationStore {
        &self.store
    }

    pub fn uploads(&self) -> &AttachmentPipeline {
        &self.uploads
    }

    pub fn streams(&self) -> &StreamManager {
        &self.streams
    }

    pub fn draft(&self) -> &str {
        self.composer.text()
    }

    fn emit(&self, event: EngineEvent) {
        // no subscribers is fine
        self.events.send(event).ok();
    }

    /// Create a conversation, make it active and return its id.
    pub fn create_conversation(&mut self) -> String {
        let conversation_id = self.store.create_conversation().id().to_string();
        info!(conv_id = %conversation_id, "New conversation");

        self.emit(EngineEvent::ConversationCreated {
            conversation_id: conversation_id.clone(),
        });
        self.emit(EngineEvent::ActiveConversationChanged {
            conversation_id: conversation_id.clone(),
        });
        conversation_id
    }

    /// Add a conversation that already exists elsewhere (sample or restored
    /// history).
    pub fn insert_conversation(&mut self, conversation: Conversation) {
        let conversation_id = conversation.id().to_string();
        self.store.insert_existing(conversation);
        self.emit(EngineEvent::ConversationCreated { conversation_id });
    }

    pub fn select_conversation(&mut self, conversation_id: &str) -> EngineResult<()> {
        self.store.select_conversation(conversation_id)?;
        debug!(conv_id = %conversation_id, "Selected conversation");
        self.emit(EngineEvent::ActiveConversationChanged {
            conversation_id: conversation_id.to_string(),
        });
        Ok(())
    }

    /// Delete a conversation, stopping its response and releasing the
    /// locators of attachments its messages still reference.
    pub fn delete_conversation(&mut self, conversation_id: &str) -> bool {
        if let Some(session_id) = self.streams.cancel(&mut self.store, conversation_id) {
            self.emit(EngineEvent::SessionFinalized {
                conversation_id: conversation_id.to_string(),
                session_id,
                status: SessionStatus::Cancelled,
            });
        }
        self.streams.forget(conversation_id);
        if let Some(conversation) = self.store.get(conversation_id) {
            for message in conversation.messages() {
                self.uploads.release_submitted(&message.attachments);
            }
        }

        let was_active = self.store.active_id() == Some(conversation_id);
        if !self.store.delete_conversation(conversation_id) {
            return false;
        }
        info!(conv_id = %conversation_id, "Deleted conversation");
        self.emit(EngineEvent::ConversationDeleted {
            conversation_id: conversation_id.to_string(),
        });

        if was_active && let Some(next) = self.store.active_id() {
            self.emit(EngineEvent::ActiveConversationChanged {
                conversation_id: next.to_string(),
            });
        }
        true
    }

    pub fn set_draft(&mut self, text: impl Into<String>) {
        self.composer.set_text(text);
    }

    /// Start uploading the selected files.
    pub fn attach(&mut self, files: Vec<LocalFile>) -> EnqueueReport {
        let report = self.uploads.enqueue(files);

        for attachment in &report.queued {
            self.emit(EngineEvent::AttachmentQueued {
                attachment: attachment.clone(),
            });
        }
        for err in &report.rejected {
            let name = match err {
                UploadError::SizeExceeded { name, .. } | UploadError::Materialize { name, .. } => name.clone(),
            };
            self.emit(EngineEvent::AttachmentRejected {
                name,
                reason: err.to_string(),
            });
        }
        report
    }

    pub fn remove_attachment(&mut self, attachment_id: AttachmentId) -> bool {
        let removed = self.uploads.remove(attachment_id);
        if removed {
            self.emit(EngineEvent::AttachmentRemoved { attachment_id });
        }
        removed
    }

    /// Whether the active conversation has a response streaming.
    pub fn is_generating(&self) -> bool {
        self.store
            .active_id()
            .is_some_and(|id| self.streams.is_active(id))
    }

    /// Send the draft and ready attachments to the active conversation.
    ///
    /// Creates a conversation when there is none. Either the user message is
    /// appended and a response started, or nothing changes: a gate rejection
    /// comes back as [`SendOutcome::Rejected`], a failed transaction as an
    /// error with the draft and attachments restored.
    pub fn send(&mut self) -> EngineResult<SendOutcome> {
        let is_generating = self.is_generating();
        let request = match self.composer.submit(&mut self.uploads, is_generating) {
            Ok(request) => request,
            Err(reason) => return Ok(SendOutcome::Rejected(reason)),
        };

        let conversation_id = match self.store.active_id() {
            Some(id) => id.to_string(),
            None => self.create_conversation(),
        };

        match self.commit_send(&conversation_id, &request) {
            Ok(handle) => Ok(SendOutcome::Started(handle)),
            Err(err) => {
                warn!(conv_id = %conversation_id, error = %err, "Send failed, restoring draft");
                self.composer.restore(request, &mut self.uploads);
                Err(err)
            }
        }
    }

    fn commit_send(&mut self, conversation_id: &str, request: &SendRequest) -> EngineResult<SessionHandle> {
        if self.streams.is_active(conversation_id) {
            return Err(StreamError::AlreadyActive {
                conversation_id: conversation_id.to_string(),
            }
            .into());
        }
        // an errored response may have left its message open
        self.store.seal_streaming_message(conversation_id)?;

        let message = Message::user(request.text.clone(), request.attachments.clone());
        self.store.append_message(conversation_id, message.clone())?;
        self.emit(EngineEvent::MessageAppended {
            conversation_id: conversation_id.to_string(),
            message,
        });
        self.emit_conversation_updated(conversation_id);

        let prior = self
            .store
            .get(conversation_id)
            .map(|c| c.messages().to_vec())
            .unwrap_or_default();
        let handle = self.streams.start(&mut self.store, conversation_id, prior)?;

        if let Some(placeholder) = self.store.get(conversation_id).and_then(|c| c.trailing()) {
            self.emit(EngineEvent::MessageAppended {
                conversation_id: conversation_id.to_string(),
                message: placeholder.clone(),
            });
        }
        info!(conv_id = %conversation_id, session_id = %handle.session_id, "Message sent");
        Ok(handle)
    }

    /// Cancel the active conversation's response, keeping what already
    /// streamed in.
    pub fn stop_generating(&mut self) -> Option<SessionId> {
        let conversation_id = self.store.active_id()?.to_string();
        let session_id = self.streams.cancel(&mut self.store, &conversation_id)?;

        self.emit(EngineEvent::SessionFinalized {
            conversation_id: conversation_id.clone(),
            session_id,
            status: SessionStatus::Cancelled,
        });
        self.emit_conversation_updated(&conversation_id);
        Some(session_id)
    }

    /// Apply one report from a background task.
    pub fn handle_task_event(&mut self, event: TaskEvent) {
        match event {
            TaskEvent::Stream(event) => self.handle_stream_event(event),
            TaskEvent::Upload(event) => self.handle_upload_event(event),
        }
    }

    fn handle_stream_event(&mut self, event: StreamTaskEvent) {
        let conversation_id = event.conversation_id.clone();

        match self.streams.handle_event(&mut self.store, event) {
            StreamOutcome::ChunkApplied {
                session_id,
                sequence,
                content,
            } => self.emit(EngineEvent::StreamingChunkApplied {
                conversation_id,
                session_id,
                sequence,
                content,
            }),
            StreamOutcome::Finalized { session_id, status, .. } => {
                let completed = status == SessionStatus::Complete;
                self.emit(EngineEvent::SessionFinalized {
                    conversation_id: conversation_id.clone(),
                    session_id,
                    status,
                });
                if completed {
                    self.emit_conversation_updated(&conversation_id);
                }
            }
            StreamOutcome::Discarded => {}
        }
    }

    fn handle_upload_event(&mut self, event: UploadTaskEvent) {
        match self.uploads.handle_event(event) {
            UploadOutcome::Ready(attachment) => self.emit(EngineEvent::AttachmentReady { attachment }),
            UploadOutcome::Failed { attachment, reason } => {
                self.emit(EngineEvent::AttachmentFailed { attachment, reason })
            }
            UploadOutcome::Discarded => {}
        }
    }

    fn emit_conversation_updated(&self, conversation_id: &str) {
        if let Some(conversation) = self.store.get(conversation_id) {
            self.emit(EngineEvent::ConversationUpdated {
                conversation_id: conversation_id.to_string(),
                preview: conversation.last_message_preview().to_string(),
            });
        }
    }

    /// Whether any upload or response task may still report back.
    pub fn has_pending_tasks(&self) -> bool {
        self.streams.active_count() > 0 || self.uploads.outstanding_tasks() > 0
    }

    /// Wait for the next task report and apply it. Returns `false` right away
    /// when nothing is in flight.
    pub async fn next_event(&mut self) -> bool {
        if !self.has_pending_tasks() {
            return false;
        }
        match self.task_rx.recv().await {
            Some(event) => {
                self.handle_task_event(event);
                true
            }
            None => false,
        }
    }

    /// Apply task reports until every upload and response has settled.
    pub async fn run_until_idle(&mut self) {
        while self.next_event().await {}
    }

    /// Stop every response and release every locator the uploads still own.
    pub fn shutdown(&mut self) {
        for (conversation_id, session_id) in self.streams.stop_all(&mut self.store) {
            self.emit(EngineEvent::SessionFinalized {
                conversation_id,
                session_id,
                status: SessionStatus::Cancelled,
            });
        }
        self.uploads.release_all();
        info!("Engine shut down");
    }
}
