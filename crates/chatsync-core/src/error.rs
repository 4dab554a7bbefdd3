use thiserror::Error;

/// Failures of the conversation store.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum ConversationError {
    #[error("Unknown conversation: {conversation_id}")]
    UnknownConversation { conversation_id: String },

    /// There is no non-final trailing message to mutate, either because no
    /// response was ever started or because it was already finalized.
    #[error("Conversation {conversation_id} has no message being streamed")]
    NotStreaming { conversation_id: String },

    #[error("Conversation {conversation_id} is streaming; appends must wait for finalization")]
    StreamInProgress { conversation_id: String },
}

pub type ConversationResult<T> = Result<T, ConversationError>;

/// Failures of the streaming response coordinator.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum StreamError {
    #[error("A response is already streaming for conversation {conversation_id}")]
    AlreadyActive { conversation_id: String },

    #[error(transparent)]
    Store(#[from] ConversationError),
}

pub type StreamResult<T> = Result<T, StreamError>;

/// Per-file upload failures. Never fatal to the pipeline as a whole.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum UploadError {
    #[error("{name} is {size} bytes, larger than the {max} byte limit")]
    SizeExceeded { name: String, size: u64, max: u64 },

    #[error("Failed to materialize {name}: {reason}")]
    Materialize { name: String, reason: String },
}

pub type UploadResult<T> = Result<T, UploadError>;

/// Failures of a send transaction driven by the engine.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum EngineError {
    #[error(transparent)]
    Conversation(#[from] ConversationError),

    #[error(transparent)]
    Stream(#[from] StreamError),
}

pub type EngineResult<T> = Result<T, EngineError>;

/// Readable text of a panic caught from a background task.
pub(crate) fn panic_reason(payload: &(dyn std::any::Any + Send)) -> String {
    let message = payload
        .downcast_ref::<&str>()
        .map(|s| s.to_string())
        .or_else(|| payload.downcast_ref::<String>().cloned())
        .unwrap_or_else(|| "unknown cause".to_string());
    format!("task panicked: {message}")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_already_active_message_names_conversation() {
        let err = StreamError::AlreadyActive {
            conversation_id: "conv-1".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "A response is already streaming for conversation conv-1"
        );
    }

    #[test]
    fn test_store_error_is_transparent_through_stream_error() {
        let inner = ConversationError::NotStreaming {
            conversation_id: "conv-2".to_string(),
        };
        let err: StreamError = inner.clone().into();
        assert_eq!(err.to_string(), inner.to_string());
    }

    #[test]
    fn test_panic_reason_reads_str_and_string_payloads() {
        let from_str: Box<dyn std::any::Any + Send> = Box::new("boom");
        let from_string: Box<dyn std::any::Any + Send> = Box::new(String::from("bang"));
        let opaque: Box<dyn std::any::Any + Send> = Box::new(42u8);

        assert_eq!(panic_reason(from_str.as_ref()), "task panicked: boom");
        assert_eq!(panic_reason(from_string.as_ref()), "task panicked: bang");
        assert_eq!(panic_reason(opaque.as_ref()), "task panicked: unknown cause");
    }

    #[test]
    fn test_size_exceeded_display() {
        let err = UploadError::SizeExceeded {
            name: "big.png".to_string(),
            size: 30,
            max: 25,
        };
        assert_eq!(err.to_string(), "big.png is 30 bytes, larger than the 25 byte limit");
    }
}
