use std::panic::AssertUnwindSafe;
use std::path::{Path, PathBuf};
use std::sync::Arc;

use futures::FutureExt;
use tokio::sync::mpsc::UnboundedSender;
use tracing::{debug, warn};

use super::attachment_validation::{content_type_for, validate_size};
use super::materializer::{Materialized, Materializer};
use crate::error::{UploadError, UploadResult, panic_reason};
use crate::events::TaskEvent;
use crate::models::{Attachment, AttachmentId, AttachmentStatus};

/// A file the user picked, before anything was uploaded.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct LocalFile {
    pub name: String,
    pub size_bytes: u64,
    pub path: Option<PathBuf>,
    /// Declared type, if the picker reported one.
    pub content_type: Option<String>,
}

impl LocalFile {
    pub fn new(name: impl Into<String>, size_bytes: u64) -> Self {
        Self {
            name: name.into(),
            size_bytes,
            path: None,
            content_type: None,
        }
    }

    /// Stat a file on disk.
    pub fn from_path(path: &Path) -> std::io::Result<Self> {
        let metadata = std::fs::metadata(path)?;
        let name = path
            .file_name()
            .map(|n| n.to_string_lossy().into_owned())
            .unwrap_or_else(|| path.display().to_string());

        Ok(Self {
            name,
            size_bytes: metadata.len(),
            path: Some(path.to_path_buf()),
            content_type: None,
        })
    }

    pub fn with_content_type(mut self, content_type: impl Into<String>) -> Self {
        self.content_type = Some(content_type.into());
        self
    }

    pub fn content_type_or_guess(&self) -> String {
        self.content_type
            .clone()
            .unwrap_or_else(|| content_type_for(&self.name))
    }
}

/// Result of one materialize task.
#[derive(Debug)]
pub struct UploadTaskEvent {
    pub attachment_id: AttachmentId,
    pub result: UploadResult<Materialized>,
}

#[derive(Debug, Default)]
pub struct EnqueueReport {
    /// Accepted files, already uploading.
    pub queued: Vec<Attachment>,
    pub rejected: Vec<UploadError>,
}

#[derive(Clone, Debug, PartialEq)]
pub enum UploadOutcome {
    Ready(Attachment),
    Failed { attachment: Attachment, reason: String },
    /// The attachment was removed while its upload was in flight.
    Discarded,
}

/// Uploads selected files concurrently and collects the ones that made it
/// into the ready set.
///
/// The pipeline owns every locator it hands out until the ready set is taken
/// by a submission; removing an attachment releases its locator.
pub struct AttachmentPipeline {
    materializer: Arc<dyn Materializer>,
    max_attachment_bytes: u64,
    /// Files still uploading, in selection order.
    queue: Vec<Attachment>,
    ready: Vec<Attachment>,
    /// Spawned tasks whose result has not been handled yet, including those
    /// of attachments removed mid-flight.
    outstanding_tasks: usize,
    next_id: u64,
    task_tx: UnboundedSender<TaskEvent>,
}

impl AttachmentPipeline {
    pub fn new(
        materializer: Arc<dyn Materializer>,
        max_attachment_bytes: u64,
        task_tx: UnboundedSender<TaskEvent>,
    ) -> Self {
        Self {
            materializer,
            max_attachment_bytes,
            queue: Vec::new(),
            ready: Vec::new(),
            outstanding_tasks: 0,
            next_id: 0,
            task_tx,
        }
    }

    /// Validate and start uploading each file independently.
    ///
    /// Oversized files are rejected up front and never enter the queue.
    /// Every accepted file gets its own task; they complete in any order.
    pub fn enqueue(&mut self, files: Vec<LocalFile>) -> EnqueueReport {
        let mut report = EnqueueReport::default();

        for file in files {
            if let Err(err) = validate_size(&file.name, file.size_bytes, self.max_attachment_bytes) {
                warn!(name = %file.name, error = %err, "Skipping oversized file");
                report.rejected.push(err);
                continue;
            }

            self.next_id += 1;
            let attachment = Attachment {
                id: AttachmentId(self.next_id),
                reference: None,
                name: file.name.clone(),
                content_type: file.content_type_or_guess(),
                size_bytes: file.size_bytes,
                // queued and started in the same turn
                status: AttachmentStatus::Uploading,
            };
            debug!(id = %attachment.id, name = %attachment.name, "Upload started");

            self.queue.push(attachment.clone());
            self.spawn_upload(attachment.id, file);
            report.queued.push(attachment);
        }

        report
    }

    fn spawn_upload(&mut self, attachment_id: AttachmentId, file: LocalFile) {
        let materializer = self.materializer.clone();
        let task_tx = self.task_tx.clone();
        self.outstanding_tasks += 1;

        tokio::spawn(async move {
            // a panicking materializer counts as a failed upload
            let result = AssertUnwindSafe(materializer.materialize(&file))
                .catch_unwind()
                .await
                .unwrap_or_else(|payload| {
                    Err(UploadError::Materialize {
                        name: file.name.clone(),
                        reason: panic_reason(payload.as_ref()),
                    })
                });
            let event = UploadTaskEvent {
                attachment_id,
                result,
            };
            if let Err(unsent) = task_tx.send(event.into()) {
                // nobody left to take ownership of the locator
                if let TaskEvent::Upload(UploadTaskEvent { result: Ok(m), .. }) = unsent.0 {
                    materializer.release(&m.locator);
                }
            }
        });
    }

    /// Apply the result of a materialize task.
    pub fn handle_event(&mut self, event: UploadTaskEvent) -> UploadOutcome {
        self.outstanding_tasks = self.outstanding_tasks.saturating_sub(1);

        let Some(index) = self.queue.iter().position(|a| a.id == event.attachment_id) else {
            debug!(id = %event.attachment_id, "Upload finished after removal, discarding");
            if let Ok(materialized) = &event.result {
                self.materializer.release(&materialized.locator);
            }
            return UploadOutcome::Discarded;
        };

        let mut attachment = self.queue.remove(index);
        match event.result {
            Ok(materialized) => {
                attachment.status = AttachmentStatus::Ready;
                attachment.reference = Some(materialized.locator);
                attachment.content_type = materialized.content_type;
                attachment.size_bytes = materialized.size_bytes;
                debug!(id = %attachment.id, name = %attachment.name, "Attachment ready");

                self.ready.push(attachment.clone());
                UploadOutcome::Ready(attachment)
            }
            Err(err) => {
                warn!(id = %attachment.id, name = %attachment.name, error = %err, "Upload failed");
                attachment.status = AttachmentStatus::Failed;
                UploadOutcome::Failed {
                    attachment,
                    reason: err.to_string(),
                }
            }
        }
    }

    /// Remove an attachment, ready or still uploading.
    ///
    /// A ready attachment's locator is released. An in-flight upload keeps
    /// running but its result is discarded. Returns `false` if the id is not
    /// known (already removed, failed or submitted).
    pub fn remove(&mut self, id: AttachmentId) -> bool {
        if let Some(index) = self.ready.iter().position(|a| a.id == id) {
            let attachment = self.ready.remove(index);
            if let Some(locator) = &attachment.reference {
                self.materializer.release(locator);
            }
            debug!(%id, "Removed ready attachment");
            return true;
        }

        if let Some(index) = self.queue.iter().position(|a| a.id == id) {
            self.queue.remove(index);
            debug!(%id, "Removed attachment while uploading");
            return true;
        }

        false
    }

    /// Hand the ready set over to a submission. Locators are not released:
    /// the submitted message keeps referencing them.
    pub fn take_ready(&mut self) -> Vec<Attachment> {
        std::mem::take(&mut self.ready)
    }

    /// Put attachments taken by a send that could not be completed back in
    /// front of the ready set.
    pub fn restore_ready(&mut self, attachments: Vec<Attachment>) {
        self.ready.splice(0..0, attachments);
    }

    /// Release locators of attachments that left the pipeline through
    /// [`AttachmentPipeline::take_ready`] and are no longer displayed.
    pub fn release_submitted(&self, attachments: &[Attachment]) {
        for locator in attachments.iter().filter_map(|a| a.reference.as_ref()) {
            self.materializer.release(locator);
        }
    }

    /// Drop everything the pipeline still owns.
    pub fn release_all(&mut self) {
        let ready = self.take_ready();
        self.release_submitted(&ready);
        self.queue.clear();
    }

    /// Files still uploading. Non-zero means "not yet ready to send".
    pub fn queue_size(&self) -> usize {
        self.queue.len()
    }

    pub fn queued(&self) -> &[Attachment] {
        &self.queue
    }

    pub fn ready(&self) -> &[Attachment] {
        &self.ready
    }

    pub fn outstanding_tasks(&self) -> usize {
        self.outstanding_tasks
    }

    pub fn max_attachment_bytes(&self) -> u64 {
        self.max_attachment_bytes
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::test_helpers::{ControlledMaterializer, PanickingMaterializer};
    use tokio::sync::mpsc::{self, UnboundedReceiver};

    const MAX: u64 = 1000;

    fn pipeline() -> (
        AttachmentPipeline,
        UnboundedReceiver<TaskEvent>,
        Arc<ControlledMaterializer>,
    ) {
        let (tx, rx) = mpsc::unbounded_channel();
        let materializer = Arc::new(ControlledMaterializer::new());
        let pipeline = AttachmentPipeline::new(materializer.clone(), MAX, tx);
        (pipeline, rx, materializer)
    }

    async fn next_outcome(
        pipeline: &mut AttachmentPipeline,
        rx: &mut UnboundedReceiver<TaskEvent>,
    ) -> UploadOutcome {
        match rx.recv().await {
            Some(TaskEvent::Upload(event)) => pipeline.handle_event(event),
            other => panic!("unexpected task event: {other:?}"),
        }
    }

    #[tokio::test]
    async fn test_oversized_file_is_rejected() {
        let (mut pipeline, _rx, _m) = pipeline();
        let report = pipeline.enqueue(vec![LocalFile::new("huge.mov", MAX + 1)]);

        assert!(report.queued.is_empty());
        assert!(matches!(
            report.rejected.as_slice(),
            [UploadError::SizeExceeded { size, .. }] if *size == MAX + 1
        ));
        assert_eq!(pipeline.queue_size(), 0);
        assert_eq!(pipeline.outstanding_tasks(), 0);
    }

    #[tokio::test]
    async fn test_accepted_file_starts_uploading() {
        let (mut pipeline, _rx, materializer) = pipeline();
        let _gate = materializer.gate("a.png");
        let report = pipeline.enqueue(vec![LocalFile::new("a.png", 10)]);

        assert_eq!(report.queued.len(), 1);
        assert_eq!(report.queued[0].status, AttachmentStatus::Uploading);
        assert_eq!(report.queued[0].content_type, "image/png");
        assert_eq!(pipeline.queue_size(), 1);
        assert!(pipeline.ready().is_empty());
    }

    #[tokio::test]
    async fn test_uploads_complete_in_any_order() {
        let (mut pipeline, mut rx, materializer) = pipeline();
        let gate_a = materializer.gate("a.png");
        let gate_b = materializer.gate("b.pdf");
        pipeline.enqueue(vec![LocalFile::new("a.png", 10), LocalFile::new("b.pdf", 20)]);
        assert_eq!(pipeline.queue_size(), 2);

        gate_b.send(true).unwrap();
        let first = next_outcome(&mut pipeline, &mut rx).await;
        assert!(matches!(first, UploadOutcome::Ready(ref a) if a.name == "b.pdf"));
        assert_eq!(pipeline.queue_size(), 1);

        gate_a.send(true).unwrap();
        next_outcome(&mut pipeline, &mut rx).await;
        assert_eq!(pipeline.queue_size(), 0);

        let names: Vec<&str> = pipeline.ready().iter().map(|a| a.name.as_str()).collect();
        assert_eq!(names, vec!["b.pdf", "a.png"]);
        assert!(pipeline.ready().iter().all(|a| a.reference.is_some()));
        assert!(pipeline.ready().iter().all(|a| a.status == AttachmentStatus::Ready));
    }

    #[tokio::test]
    async fn test_failure_is_isolated() {
        let (mut pipeline, mut rx, materializer) = pipeline();
        let gate_bad = materializer.gate("bad.png");
        let gate_good = materializer.gate("good.png");
        pipeline.enqueue(vec![LocalFile::new("bad.png", 1), LocalFile::new("good.png", 1)]);

        gate_bad.send(false).unwrap();
        let outcome = next_outcome(&mut pipeline, &mut rx).await;
        assert!(matches!(
            outcome,
            UploadOutcome::Failed { ref attachment, .. } if attachment.status == AttachmentStatus::Failed
        ));
        assert_eq!(pipeline.queue_size(), 1);

        gate_good.send(true).unwrap();
        next_outcome(&mut pipeline, &mut rx).await;
        assert_eq!(pipeline.ready().len(), 1);
        assert_eq!(pipeline.ready()[0].name, "good.png");
    }

    #[tokio::test]
    async fn test_panicking_upload_fails_only_that_file() {
        let (tx, mut rx) = mpsc::unbounded_channel();
        let mut pipeline = AttachmentPipeline::new(Arc::new(PanickingMaterializer::new("bad")), MAX, tx);
        pipeline.enqueue(vec![LocalFile::new("bad.png", 1), LocalFile::new("good.png", 1)]);

        let mut failed = Vec::new();
        for _ in 0..2 {
            if let UploadOutcome::Failed { attachment, reason } = next_outcome(&mut pipeline, &mut rx).await {
                failed.push((attachment.name, reason));
            }
        }

        assert_eq!(failed.len(), 1);
        assert_eq!(failed[0].0, "bad.png");
        assert!(failed[0].1.contains("task panicked"));
        assert_eq!(pipeline.queue_size(), 0);
        assert_eq!(pipeline.outstanding_tasks(), 0);
        assert_eq!(pipeline.ready().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_twice_releases_once() {
        let (mut pipeline, mut rx, materializer) = pipeline();
        let report = pipeline.enqueue(vec![LocalFile::new("a.png", 10)]);
        next_outcome(&mut pipeline, &mut rx).await;
        let id = report.queued[0].id;

        assert!(pipeline.remove(id));
        assert!(!pipeline.remove(id));
        assert!(pipeline.ready().is_empty());
        assert_eq!(materializer.released().len(), 1);
    }

    #[tokio::test]
    async fn test_remove_while_uploading_discards_result() {
        let (mut pipeline, mut rx, materializer) = pipeline();
        let gate = materializer.gate("slow.png");
        let report = pipeline.enqueue(vec![LocalFile::new("slow.png", 10)]);

        assert!(pipeline.remove(report.queued[0].id));
        assert_eq!(pipeline.queue_size(), 0);
        assert_eq!(pipeline.outstanding_tasks(), 1);

        gate.send(true).unwrap();
        let outcome = next_outcome(&mut pipeline, &mut rx).await;
        assert_eq!(outcome, UploadOutcome::Discarded);
        assert!(pipeline.ready().is_empty());
        assert_eq!(pipeline.outstanding_tasks(), 0);
        // the late locator is not leaked
        assert_eq!(materializer.released().len(), 1);
    }

    #[tokio::test]
    async fn test_take_ready_keeps_locators() {
        let (mut pipeline, mut rx, materializer) = pipeline();
        pipeline.enqueue(vec![LocalFile::new("a.png", 10)]);
        next_outcome(&mut pipeline, &mut rx).await;

        let taken = pipeline.take_ready();
        assert_eq!(taken.len(), 1);
        assert!(pipeline.ready().is_empty());
        assert!(materializer.released().is_empty());

        pipeline.release_submitted(&taken);
        assert_eq!(materializer.released().len(), 1);
    }

    #[tokio::test]
    async fn test_release_all() {
        let (mut pipeline, mut rx, materializer) = pipeline();
        let _gate = materializer.gate("pending.png");
        pipeline.enqueue(vec![LocalFile::new("done.png", 1), LocalFile::new("pending.png", 1)]);
        next_outcome(&mut pipeline, &mut rx).await;

        pipeline.release_all();
        assert!(pipeline.ready().is_empty());
        assert_eq!(pipeline.queue_size(), 0);
        assert_eq!(materializer.released().len(), 1);
    }

    #[test]
    fn test_local_file_declared_type_wins() {
        let file = LocalFile::new("notes.bin", 4).with_content_type("text/plain");
        assert_eq!(file.content_type_or_guess(), "text/plain");
        assert_eq!(LocalFile::new("x.qqzx", 1).content_type_or_guess(), "application/octet-stream");
    }

    #[test]
    fn test_local_file_from_path() {
        let dir = tempfile::tempdir().expect("temp dir");
        let path = dir.path().join("report.pdf");
        std::fs::write(&path, vec![0u8; 2048]).expect("write file");

        let file = LocalFile::from_path(&path).expect("stat");
        assert_eq!(file.name, "report.pdf");
        assert_eq!(file.size_bytes, 2048);
        assert_eq!(file.path.as_deref(), Some(path.as_path()));
    }
}
