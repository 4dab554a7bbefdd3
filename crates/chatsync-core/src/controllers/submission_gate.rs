use serde::Serialize;
use tracing::debug;

use crate::models::Attachment;
use crate::services::AttachmentPipeline;

/// Why a send attempt did nothing.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum SubmitRejection {
    /// No text and no ready attachment.
    Empty,
    UploadInProgress,
    AlreadyGenerating,
}

impl std::fmt::Display for SubmitRejection {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let reason = match self {
            SubmitRejection::Empty => "nothing to send",
            SubmitRejection::UploadInProgress => "attachments are still uploading",
            SubmitRejection::AlreadyGenerating => "a response is still being generated",
        };
        f.write_str(reason)
    }
}

/// One immutable send request.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct SendRequest {
    /// Trimmed text, possibly empty when attachments are sent alone.
    pub text: String,
    pub attachments: Vec<Attachment>,
}

/// Decide whether a send is allowed and build its request.
///
/// Checks run in a fixed order: generation first, then uploads, then
/// emptiness. An upload still in flight blocks sending even when the ready
/// set is empty.
pub fn try_submit(
    text: &str,
    ready: &[Attachment],
    queue_size: usize,
    is_generating: bool,
) -> Result<SendRequest, SubmitRejection> {
    if is_generating {
        return Err(SubmitRejection::AlreadyGenerating);
    }
    if queue_size > 0 {
        return Err(SubmitRejection::UploadInProgress);
    }

    let text = text.trim();
    if text.is_empty() && ready.is_empty() {
        return Err(SubmitRejection::Empty);
    }

    Ok(SendRequest {
        text: text.to_string(),
        attachments: ready.to_vec(),
    })
}

/// Draft text of the input box, submitted together with the pipeline's
/// ready set.
#[derive(Clone, Debug, Default)]
pub struct Composer {
    draft: String,
}

impl Composer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn set_text(&mut self, text: impl Into<String>) {
        self.draft = text.into();
    }

    pub fn text(&self) -> &str {
        &self.draft
    }

    /// Submit the draft with the ready attachments.
    ///
    /// On success the draft is cleared and the ready set is handed over in
    /// the same call, so no upload finishing later can slip into this
    /// request. On rejection nothing changes.
    pub fn submit(
        &mut self,
        pipeline: &mut AttachmentPipeline,
        is_generating: bool,
    ) -> Result<SendRequest, SubmitRejection> {
        let request = try_submit(&self.draft, pipeline.ready(), pipeline.queue_size(), is_generating)
            .inspect_err(|reason| debug!(%reason, "Submit rejected"))?;

        self.draft.clear();
        pipeline.take_ready();
        debug!(
            text_len = request.text.len(),
            attachment_count = request.attachments.len(),
            "Submit accepted"
        );
        Ok(request)
    }

    /// Undo a submit whose send could not be carried out.
    pub fn restore(&mut self, request: SendRequest, pipeline: &mut AttachmentPipeline) {
        self.draft = request.text;
        pipeline.restore_ready(request.attachments);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::events::TaskEvent;
    use crate::models::{AttachmentId, AttachmentStatus, Locator};
    use crate::services::LocalFile;
    use crate::test_helpers::ControlledMaterializer;
    use std::sync::Arc;
    use tokio::sync::mpsc;

    fn ready_attachment(id: u64) -> Attachment {
        Attachment {
            id: AttachmentId(id),
            reference: Some(Locator(format!("blob:{id}"))),
            name: format!("file-{id}.png"),
            content_type: "image/png".to_string(),
            size_bytes: 10,
            status: AttachmentStatus::Ready,
        }
    }

    #[test]
    fn test_text_only_submit() {
        let request = try_submit("hello", &[], 0, false).unwrap();
        assert_eq!(
            request,
            SendRequest {
                text: "hello".to_string(),
                attachments: vec![],
            }
        );
    }

    #[test]
    fn test_text_is_trimmed() {
        let request = try_submit("  hi there \n", &[], 0, false).unwrap();
        assert_eq!(request.text, "hi there");
    }

    #[test]
    fn test_whitespace_only_is_empty() {
        assert_eq!(try_submit("   \n\t", &[], 0, false), Err(SubmitRejection::Empty));
    }

    #[test]
    fn test_attachments_alone_are_enough() {
        let ready = vec![ready_attachment(1)];
        let request = try_submit("", &ready, 0, false).unwrap();
        assert_eq!(request.text, "");
        assert_eq!(request.attachments, ready);
    }

    #[test]
    fn test_blocked_while_uploading() {
        assert_eq!(
            try_submit("hello", &[], 1, false),
            Err(SubmitRejection::UploadInProgress)
        );
        // a ready attachment does not unblock the gate
        assert_eq!(
            try_submit("hello", &[ready_attachment(1)], 1, false),
            Err(SubmitRejection::UploadInProgress)
        );
    }

    #[test]
    fn test_blocked_while_generating() {
        assert_eq!(
            try_submit("hello", &[], 0, true),
            Err(SubmitRejection::AlreadyGenerating)
        );
        assert_eq!(try_submit("", &[], 3, true), Err(SubmitRejection::AlreadyGenerating));
    }

    #[test]
    fn test_upload_checked_before_empty() {
        assert_eq!(try_submit("", &[], 2, false), Err(SubmitRejection::UploadInProgress));
    }

    #[tokio::test]
    async fn test_composer_clears_state_after_submit() {
        let (tx, _rx) = mpsc::unbounded_channel::<TaskEvent>();
        let mut pipeline = AttachmentPipeline::new(Arc::new(ControlledMaterializer::new()), 100, tx);
        let mut composer = Composer::new();
        composer.set_text("hello");

        let request = composer.submit(&mut pipeline, false).unwrap();
        assert_eq!(request.text, "hello");
        assert!(request.attachments.is_empty());
        assert_eq!(composer.text(), "");

        assert_eq!(composer.submit(&mut pipeline, false), Err(SubmitRejection::Empty));
    }

    #[tokio::test]
    async fn test_composer_snapshots_ready_set() {
        let (tx, mut rx) = mpsc::unbounded_channel::<TaskEvent>();
        let materializer = Arc::new(ControlledMaterializer::new());
        let mut pipeline = AttachmentPipeline::new(materializer.clone(), 100, tx);
        pipeline.enqueue(vec![LocalFile::new("a.png", 5)]);
        if let Some(TaskEvent::Upload(event)) = rx.recv().await {
            pipeline.handle_event(event);
        }

        let mut composer = Composer::new();
        let request = composer.submit(&mut pipeline, false).unwrap();
        assert_eq!(request.attachments.len(), 1);
        assert!(pipeline.ready().is_empty());
        // submitted locators stay alive for the rendered message
        assert!(materializer.released().is_empty());
    }

    #[tokio::test]
    async fn test_rejected_submit_keeps_draft() {
        let (tx, _rx) = mpsc::unbounded_channel::<TaskEvent>();
        let mut pipeline = AttachmentPipeline::new(Arc::new(ControlledMaterializer::new()), 100, tx);
        let mut composer = Composer::new();
        composer.set_text("wait for it");

        assert_eq!(
            composer.submit(&mut pipeline, true),
            Err(SubmitRejection::AlreadyGenerating)
        );
        assert_eq!(composer.text(), "wait for it");
    }
}
