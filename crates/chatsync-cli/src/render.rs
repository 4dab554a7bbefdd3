use std::collections::HashMap;
use std::io::Write;

use chatsync_core::services::attachment_validation::is_image;
use chatsync_core::{Attachment, EngineEvent, Role, SessionId, SessionStatus};
use tokio::sync::broadcast::{self, error::TryRecvError};
use tracing::warn;

/// A piece of terminal output.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Rendered {
    /// Continues the current line (streamed text).
    Partial(String),
    Line(String),
    /// Ends a streamed line without adding text.
    EndLine,
}

/// Turns engine events into terminal output, either human readable or as
/// JSON lines.
pub struct EventPrinter {
    json: bool,
    /// Bytes of each session's content already printed.
    streamed: HashMap<SessionId, usize>,
    mid_line: bool,
}

impl EventPrinter {
    pub fn new(json: bool) -> Self {
        Self {
            json,
            streamed: HashMap::new(),
            mid_line: false,
        }
    }

    /// Print every event received since the last call.
    pub fn drain(&mut self, rx: &mut broadcast::Receiver<EngineEvent>) {
        loop {
            match rx.try_recv() {
                Ok(event) => self.print(&event),
                Err(TryRecvError::Lagged(skipped)) => {
                    warn!(skipped, "Event printer fell behind");
                }
                Err(TryRecvError::Empty | TryRecvError::Closed) => break,
            }
        }
    }

    fn print(&mut self, event: &EngineEvent) {
        if self.json {
            match serde_json::to_string(event) {
                Ok(line) => println!("{line}"),
                Err(err) => warn!(error = %err, "Failed to serialize event"),
            }
            return;
        }

        let mut stdout = std::io::stdout().lock();
        let result = match self.render(event) {
            Some(Rendered::Partial(text)) => {
                self.mid_line = true;
                write!(stdout, "{text}").and_then(|_| stdout.flush())
            }
            Some(Rendered::Line(text)) => {
                let lead = if std::mem::take(&mut self.mid_line) { "\n" } else { "" };
                writeln!(stdout, "{lead}{text}")
            }
            Some(Rendered::EndLine) if std::mem::take(&mut self.mid_line) => writeln!(stdout),
            _ => Ok(()),
        };
        if let Err(err) = result {
            warn!(error = %err, "Failed to write to stdout");
        }
    }

    pub fn render(&mut self, event: &EngineEvent) -> Option<Rendered> {
        let rendered = match event {
            EngineEvent::ConversationCreated { conversation_id } => {
                Rendered::Line(format!("+ conversation {conversation_id}"))
            }
            EngineEvent::ActiveConversationChanged { conversation_id } => {
                Rendered::Line(format!("> now in {conversation_id}"))
            }
            EngineEvent::ConversationDeleted { conversation_id } => {
                Rendered::Line(format!("- conversation {conversation_id}"))
            }
            EngineEvent::ConversationUpdated { .. } => return None,
            EngineEvent::MessageAppended { message, .. } => match message.role {
                Role::User => Rendered::Line(user_line(&message.content, &message.attachments)),
                Role::Assistant if !message.is_final => Rendered::Partial("assistant: ".to_string()),
                Role::Assistant => Rendered::Line(format!("assistant: {}", message.content)),
            },
            EngineEvent::StreamingChunkApplied {
                session_id, content, ..
            } => {
                let printed = self.streamed.entry(*session_id).or_default();
                let delta = content.get(*printed..).unwrap_or_default().to_string();
                *printed = content.len();
                Rendered::Partial(delta)
            }
            EngineEvent::SessionFinalized {
                session_id, status, ..
            } => {
                self.streamed.remove(session_id);
                match status {
                    SessionStatus::Cancelled => Rendered::Line("[stopped]".to_string()),
                    SessionStatus::Error(reason) => Rendered::Line(format!("[response failed: {reason}]")),
                    _ => Rendered::EndLine,
                }
            }
            EngineEvent::AttachmentQueued { attachment } => Rendered::Line(format!(
                "uploading {} ({})",
                attachment.name,
                format_size(attachment.size_bytes)
            )),
            EngineEvent::AttachmentReady { attachment } => {
                Rendered::Line(format!("ready #{} {}", attachment.id.0, attachment_label(attachment)))
            }
            EngineEvent::AttachmentFailed { attachment, reason } => {
                Rendered::Line(format!("upload of {} failed: {reason}", attachment.name))
            }
            EngineEvent::AttachmentRejected { reason, .. } => Rendered::Line(format!("rejected: {reason}")),
            EngineEvent::AttachmentRemoved { attachment_id } => {
                Rendered::Line(format!("removed #{}", attachment_id.0))
            }
        };
        Some(rendered)
    }
}

fn user_line(content: &str, attachments: &[Attachment]) -> String {
    let mut line = format!("you: {content}");
    for attachment in attachments {
        line.push_str(&format!("\n     {}", attachment_label(attachment)));
    }
    line
}

pub fn attachment_label(attachment: &Attachment) -> String {
    let kind = if is_image(&attachment.content_type) { "image" } else { "file" };
    format!("[{kind}] {}", attachment.name)
}

/// Human readable byte count.
pub fn format_size(bytes: u64) -> String {
    const UNITS: [&str; 4] = ["B", "KB", "MB", "GB"];
    let mut size = bytes as f64;
    let mut unit = 0;
    while size >= 1024.0 && unit < UNITS.len() - 1 {
        size /= 1024.0;
        unit += 1;
    }
    if unit == 0 {
        format!("{bytes} B")
    } else {
        format!("{size:.1} {}", UNITS[unit])
    }
}
