use std::collections::HashMap;
use std::fmt;
use std::panic::AssertUnwindSafe;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use futures::StreamExt;
use serde::Serialize;
use tokio::sync::mpsc::UnboundedSender;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

use super::conversations_store::{ApplyOutcome, ConversationStore};
use super::message::Message;
use crate::error::{StreamError, StreamResult, panic_reason};
use crate::events::TaskEvent;
use crate::services::response_source::{ResponseEvent, ResponseSource, ResponseStream};

/// Identity of one streaming session. Never reused, so an event carrying an
/// old id can be told apart from one of a newer session for the same
/// conversation.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Hash, Serialize)]
#[serde(transparent)]
pub struct SessionId(pub u64);

impl fmt::Display for SessionId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "session-{}", self.0)
    }
}

/// Status of a stream lifecycle
#[derive(Clone, Debug, PartialEq, Eq, Serialize)]
#[serde(tag = "status", content = "reason", rename_all = "lowercase")]
pub enum SessionStatus {
    Idle,
    Active,
    Complete,
    Cancelled,
    Error(String),
}

impl SessionStatus {
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            SessionStatus::Complete | SessionStatus::Cancelled | SessionStatus::Error(_)
        )
    }
}

/// Per-conversation stream state.
///
/// `buffer` mirrors the content last applied to the store; the store's
/// trailing message stays the source of truth for what is displayed.
pub struct StreamingSession {
    id: SessionId,
    conversation_id: String,
    message_id: String,
    sequence: u64,
    buffer: String,
    status: SessionStatus,
    cancel_flag: Arc<AtomicBool>,
    task: Option<JoinHandle<()>>,
}

impl StreamingSession {
    pub fn id(&self) -> SessionId {
        self.id
    }

    pub fn conversation_id(&self) -> &str {
        &self.conversation_id
    }

    /// Id of the placeholder message this session streams into.
    pub fn message_id(&self) -> &str {
        &self.message_id
    }

    pub fn sequence(&self) -> u64 {
        self.sequence
    }

    pub fn buffer(&self) -> &str {
        &self.buffer
    }

    pub fn status(&self) -> &SessionStatus {
        &self.status
    }

    fn stop_task(&mut self) {
        self.cancel_flag.store(true, Ordering::Relaxed);
        if let Some(task) = self.task.take() {
            task.abort();
        }
    }
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SessionHandle {
    pub session_id: SessionId,
    pub conversation_id: String,
    pub message_id: String,
}

/// What a response task reports back for its session.
#[derive(Debug)]
pub struct StreamTaskEvent {
    pub conversation_id: String,
    pub session_id: SessionId,
    pub kind: StreamTaskKind,
}

#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamTaskKind {
    /// Full text received so far, numbered by arrival.
    Chunk { sequence: u64, buffer: String },
    Done { content: String },
    Failed { reason: String },
}

/// Effect of one [`StreamTaskEvent`] on the session and the store.
#[derive(Clone, Debug, PartialEq, Eq)]
pub enum StreamOutcome {
    ChunkApplied {
        session_id: SessionId,
        sequence: u64,
        content: String,
    },
    Finalized {
        session_id: SessionId,
        status: SessionStatus,
        content: String,
    },
    /// Stale, out-of-order or post-cancellation event; nothing changed.
    Discarded,
}

/// Owns at most one active response per conversation and merges what the
/// response tasks report into the [`ConversationStore`].
pub struct StreamManager {
    sessions: HashMap<String, StreamingSession>,
    next_session_id: u64,
    source: Arc<dyn ResponseSource>,
    task_tx: UnboundedSender<TaskEvent>,
}

impl StreamManager {
    pub fn new(source: Arc<dyn ResponseSource>, task_tx: UnboundedSender<TaskEvent>) -> Self {
        Self {
            sessions: HashMap::new(),
            next_session_id: 0,
            source,
            task_tx,
        }
    }

    /// Start streaming a response into `conversation_id`.
    ///
    /// Appends the placeholder message and spawns the response task on the
    /// current tokio runtime. Fails with [`StreamError::AlreadyActive`]
    /// without touching the store if a session is still active.
    pub fn start(
        &mut self,
        store: &mut ConversationStore,
        conversation_id: &str,
        prior_messages: Vec<Message>,
    ) -> StreamResult<SessionHandle> {
        if self.is_active(conversation_id) {
            warn!(conv_id = %conversation_id, "Refusing to start a second response");
            return Err(StreamError::AlreadyActive {
                conversation_id: conversation_id.to_string(),
            });
        }

        let placeholder = store.begin_streaming_message(conversation_id)?;

        self.next_session_id += 1;
        let session_id = SessionId(self.next_session_id);
        let cancel_flag = Arc::new(AtomicBool::new(false));

        debug!(
            conv_id = %conversation_id,
            %session_id,
            prior = prior_messages.len(),
            "Starting response"
        );
        let stream = self.source.produce(prior_messages);
        let task = tokio::spawn(run_response_task(
            stream,
            conversation_id.to_string(),
            session_id,
            cancel_flag.clone(),
            self.task_tx.clone(),
        ));

        self.sessions.insert(
            conversation_id.to_string(),
            StreamingSession {
                id: session_id,
                conversation_id: conversation_id.to_string(),
                message_id: placeholder.id.clone(),
                sequence: 0,
                buffer: String::new(),
                status: SessionStatus::Active,
                cancel_flag,
                task: Some(task),
            },
        );

        Ok(SessionHandle {
            session_id,
            conversation_id: conversation_id.to_string(),
            message_id: placeholder.id,
        })
    }

    /// Apply one event reported by a response task.
    pub fn handle_event(&mut self, store: &mut ConversationStore, event: StreamTaskEvent) -> StreamOutcome {
        let conv_id = event.conversation_id;
        let Some(session) = self.sessions.get_mut(&conv_id) else {
            debug!(conv_id = %conv_id, session_id = %event.session_id, "Discarding event for unknown session");
            return StreamOutcome::Discarded;
        };
        if session.id != event.session_id || session.status != SessionStatus::Active {
            debug!(
                conv_id = %conv_id,
                session_id = %event.session_id,
                current = %session.id,
                "Discarding event from a finished session"
            );
            return StreamOutcome::Discarded;
        }

        match event.kind {
            StreamTaskKind::Chunk { sequence, buffer } => {
                match store.apply_streaming_update(&conv_id, sequence, &buffer) {
                    Ok(ApplyOutcome::Applied) => {
                        session.sequence = sequence;
                        session.buffer.clone_from(&buffer);
                        StreamOutcome::ChunkApplied {
                            session_id: session.id,
                            sequence,
                            content: buffer,
                        }
                    }
                    Ok(ApplyOutcome::Stale) => StreamOutcome::Discarded,
                    Err(err) => fail_session(session, err.to_string()),
                }
            }
            StreamTaskKind::Done { content } => {
                if let Err(err) = store.finalize_streaming_message(&conv_id, &content) {
                    return fail_session(session, err.to_string());
                }
                session.status = SessionStatus::Complete;
                session.buffer.clone_from(&content);
                session.task = None;
                debug!(conv_id = %conv_id, session_id = %session.id, "Response complete");
                StreamOutcome::Finalized {
                    session_id: session.id,
                    status: SessionStatus::Complete,
                    content,
                }
            }
            StreamTaskKind::Failed { reason } => {
                session.task = None;
                fail_session(session, reason)
            }
        }
    }

    /// Cancel the active session of a conversation.
    ///
    /// Content already applied stays; the placeholder is sealed as-is so the
    /// next session can start cleanly. Returns the cancelled session id.
    pub fn cancel(&mut self, store: &mut ConversationStore, conversation_id: &str) -> Option<SessionId> {
        let session = self
            .sessions
            .get_mut(conversation_id)
            .filter(|s| s.status == SessionStatus::Active)?;

        session.stop_task();
        session.status = SessionStatus::Cancelled;
        debug!(conv_id = %conversation_id, session_id = %session.id, "Response cancelled");

        if let Err(err) = store.seal_streaming_message(conversation_id) {
            warn!(conv_id = %conversation_id, error = %err, "Could not seal cancelled message");
        }
        Some(session.id)
    }

    /// Cancel every active session (shutdown).
    pub fn stop_all(&mut self, store: &mut ConversationStore) -> Vec<(String, SessionId)> {
        let active: Vec<String> = self
            .sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .map(|s| s.conversation_id.clone())
            .collect();

        active
            .into_iter()
            .filter_map(|conv_id| self.cancel(store, &conv_id).map(|id| (conv_id, id)))
            .collect()
    }

    /// Drop all bookkeeping for a deleted conversation, stopping its task if
    /// one is still running. Returns the id of the session that was removed.
    pub fn forget(&mut self, conversation_id: &str) -> Option<SessionId> {
        let mut session = self.sessions.remove(conversation_id)?;
        session.stop_task();
        debug!(conv_id = %conversation_id, session_id = %session.id, "Forgot session");
        Some(session.id)
    }

    pub fn is_active(&self, conversation_id: &str) -> bool {
        self.sessions
            .get(conversation_id)
            .is_some_and(|s| s.status == SessionStatus::Active)
    }

    /// Status of the latest session, `Idle` if there never was one.
    pub fn status(&self, conversation_id: &str) -> SessionStatus {
        self.sessions
            .get(conversation_id)
            .map(|s| s.status.clone())
            .unwrap_or(SessionStatus::Idle)
    }

    pub fn session(&self, conversation_id: &str) -> Option<&StreamingSession> {
        self.sessions.get(conversation_id)
    }

    pub fn active_count(&self) -> usize {
        self.sessions
            .values()
            .filter(|s| s.status == SessionStatus::Active)
            .count()
    }
}

impl Drop for StreamManager {
    fn drop(&mut self) {
        for session in self.sessions.values_mut() {
            session.stop_task();
        }
    }
}

fn fail_session(session: &mut StreamingSession, reason: String) -> StreamOutcome {
    warn!(conv_id = %session.conversation_id, session_id = %session.id, reason = %reason, "Response failed");
    session.stop_task();
    session.status = SessionStatus::Error(reason);
    StreamOutcome::Finalized {
        session_id: session.id,
        status: session.status.clone(),
        content: session.buffer.clone(),
    }
}

/// Consume the response stream, reporting the accumulated buffer after
/// every chunk and exactly one terminal event.
async fn run_response_task(
    stream: ResponseStream,
    conversation_id: String,
    session_id: SessionId,
    cancel_flag: Arc<AtomicBool>,
    task_tx: UnboundedSender<TaskEvent>,
) {
    let report = |kind: StreamTaskKind| {
        task_tx
            .send(
                StreamTaskEvent {
                    conversation_id: conversation_id.clone(),
                    session_id,
                    kind,
                }
                .into(),
            )
            .is_ok()
    };

    let mut buffer = String::new();
    let mut sequence = 0u64;

    // a panicking source ends the stream with a failure instead of a silent abort
    let mut stream = AssertUnwindSafe(stream).catch_unwind();
    while let Some(event) = stream.next().await {
        if cancel_flag.load(Ordering::Relaxed) {
            debug!(%session_id, "Response task stopping after cancellation");
            return;
        }

        let event = match event {
            Ok(event) => event,
            Err(payload) => {
                report(StreamTaskKind::Failed {
                    reason: panic_reason(payload.as_ref()),
                });
                return;
            }
        };

        match event {
            ResponseEvent::Chunk(delta) => {
                buffer.push_str(&delta);
                sequence += 1;
                let kind = StreamTaskKind::Chunk {
                    sequence,
                    buffer: buffer.clone(),
                };
                if !report(kind) {
                    return;
                }
            }
            ResponseEvent::Done(text) => {
                let content = if text.is_empty() { buffer } else { text };
                report(StreamTaskKind::Done { content });
                return;
            }
            ResponseEvent::Error(reason) => {
                report(StreamTaskKind::Failed { reason });
                return;
            }
        }
    }

    if !cancel_flag.load(Ordering::Relaxed) {
        debug!(%session_id, "Response ended without a terminal event");
        report(StreamTaskKind::Done { content: buffer });
    }
}
