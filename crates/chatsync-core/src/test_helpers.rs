use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};

use async_trait::async_trait;
use futures::stream::{self, StreamExt};
use parking_lot::Mutex;
use tokio::sync::oneshot;

use crate::error::{UploadError, UploadResult};
use crate::models::{Locator, Message};
use crate::services::{LocalFile, Materialized, Materializer, ResponseEvent, ResponseSource, ResponseStream};

/// Replays a fixed list of events for every request.
pub struct ScriptedSource {
    events: Vec<ResponseEvent>,
    /// Keep the stream open after the script instead of ending it.
    hang: bool,
    calls: AtomicUsize,
}

impl ScriptedSource {
    pub fn new(events: Vec<ResponseEvent>) -> Self {
        Self {
            events,
            hang: false,
            calls: AtomicUsize::new(0),
        }
    }

    pub fn hanging(events: Vec<ResponseEvent>) -> Self {
        Self {
            hang: true,
            ..Self::new(events)
        }
    }

    pub fn produce_calls(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }
}

impl ResponseSource for ScriptedSource {
    fn produce(&self, _prior_messages: Vec<Message>) -> ResponseStream {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let scripted = stream::iter(self.events.clone());
        if self.hang {
            scripted.chain(stream::pending()).boxed()
        } else {
            scripted.boxed()
        }
    }
}

/// Materializer whose uploads finish when the test says so.
///
/// Files registered with [`ControlledMaterializer::gate`] wait for the
/// returned sender (`true` succeeds, `false` or a dropped sender fails);
/// all other files succeed immediately.
pub struct ControlledMaterializer {
    gates: Mutex<HashMap<String, oneshot::Receiver<bool>>>,
    released: Mutex<Vec<Locator>>,
}

impl ControlledMaterializer {
    pub fn new() -> Self {
        Self {
            gates: Mutex::new(HashMap::new()),
            released: Mutex::new(Vec::new()),
        }
    }

    pub fn gate(&self, name: &str) -> oneshot::Sender<bool> {
        let (tx, rx) = oneshot::channel();
        self.gates.lock().insert(name.to_string(), rx);
        tx
    }

    pub fn released(&self) -> Vec<Locator> {
        self.released.lock().clone()
    }
}

#[async_trait]
impl Materializer for ControlledMaterializer {
    async fn materialize(&self, file: &LocalFile) -> UploadResult<Materialized> {
        let gate = self.gates.lock().remove(&file.name);
        let succeed = match gate {
            Some(rx) => rx.await.unwrap_or(false),
            None => true,
        };

        if !succeed {
            return Err(UploadError::Materialize {
                name: file.name.clone(),
                reason: "upload refused".to_string(),
            });
        }
        Ok(Materialized {
            locator: Locator(format!("blob:{}", file.name)),
            content_type: file.content_type_or_guess(),
            size_bytes: file.size_bytes,
        })
    }

    fn release(&self, locator: &Locator) {
        self.released.lock().push(locator.clone());
    }
}

/// Streams one chunk, then panics.
pub struct PanickingSource;

impl ResponseSource for PanickingSource {
    fn produce(&self, _prior_messages: Vec<Message>) -> ResponseStream {
        Box::pin(async_stream::stream! {
            yield ResponseEvent::Chunk("partial".to_string());
            panic!("backend exploded");
        })
    }
}

/// Panics while materializing the named file; others succeed immediately.
pub struct PanickingMaterializer {
    poisoned: String,
    inner: ControlledMaterializer,
}

impl PanickingMaterializer {
    pub fn new(poisoned: &str) -> Self {
        Self {
            poisoned: poisoned.to_string(),
            inner: ControlledMaterializer::new(),
        }
    }
}

#[async_trait]
impl Materializer for PanickingMaterializer {
    async fn materialize(&self, file: &LocalFile) -> UploadResult<Materialized> {
        if file.name.starts_with(&self.poisoned) {
            panic!("materializer exploded on {}", file.name);
        }
        self.inner.materialize(file).await
    }

    fn release(&self, locator: &Locator) {
        self.inner.release(locator);
    }
}
