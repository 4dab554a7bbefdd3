use std::collections::HashSet;
use std::time::Duration;

use async_trait::async_trait;
use parking_lot::Mutex;
use tracing::debug;
use uuid::Uuid;

use super::upload_pipeline::LocalFile;
use crate::config::SimulationConfig;
use crate::error::{UploadError, UploadResult};
use crate::models::Locator;

/// A file turned into retrievable content.
#[derive(Clone, Debug, PartialEq, Eq)]
pub struct Materialized {
    pub locator: Locator,
    pub content_type: String,
    pub size_bytes: u64,
}

/// Produces a locator for a local file and takes it back once unused.
#[async_trait]
pub trait Materializer: Send + Sync {
    async fn materialize(&self, file: &LocalFile) -> UploadResult<Materialized>;

    /// Revoke a locator minted by [`Materializer::materialize`].
    fn release(&self, locator: &Locator);
}

/// Mints in-memory `blob:` locators after a fixed delay, like an object URL
/// created for a client-side preview. Live locators are tracked so leaks are
/// observable.
pub struct SimulatedMaterializer {
    delay: Duration,
    fail_pattern: Option<String>,
    live: Mutex<HashSet<Locator>>,
}

impl SimulatedMaterializer {
    pub fn new(delay: Duration) -> Self {
        Self {
            delay,
            fail_pattern: None,
            live: Mutex::new(HashSet::new()),
        }
    }

    /// Make uploads of files whose name contains `pattern` fail.
    pub fn with_failures(mut self, pattern: impl Into<String>) -> Self {
        self.fail_pattern = Some(pattern.into());
        self
    }

    pub fn from_config(config: &SimulationConfig) -> Self {
        let materializer = Self::new(config.upload_delay());
        match &config.fail_uploads_matching {
            Some(pattern) => materializer.with_failures(pattern.clone()),
            None => materializer,
        }
    }

    /// Locators minted and not yet released.
    pub fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    pub fn is_live(&self, locator: &Locator) -> bool {
        self.live.lock().contains(locator)
    }
}

#[async_trait]
impl Materializer for SimulatedMaterializer {
    async fn materialize(&self, file: &LocalFile) -> UploadResult<Materialized> {
        debug!(name = %file.name, "Simulating upload");
        tokio::time::sleep(self.delay).await;

        if let Some(pattern) = &self.fail_pattern
            && file.name.contains(pattern.as_str())
        {
            return Err(UploadError::Materialize {
                name: file.name.clone(),
                reason: "simulated upload failure".to_string(),
            });
        }

        let locator = Locator(format!("blob:{}", Uuid::new_v4()));
        self.live.lock().insert(locator.clone());
        debug!(name = %file.name, %locator, "Upload successful");

        Ok(Materialized {
            locator,
            content_type: file.content_type_or_guess(),
            size_bytes: file.size_bytes,
        })
    }

    fn release(&self, locator: &Locator) {
        if self.live.lock().remove(locator) {
            debug!(%locator, "Released locator");
        } else {
            debug!(%locator, "Locator was already released");
        }
    }
}

/// Points at files on the local disk through `file://` locators.
#[derive(Clone, Copy, Debug, Default)]
pub struct LocalFileMaterializer;

#[async_trait]
impl Materializer for LocalFileMaterializer {
    async fn materialize(&self, file: &LocalFile) -> UploadResult<Materialized> {
        let failed = |reason: String| UploadError::Materialize {
            name: file.name.clone(),
            reason,
        };

        let path = file
            .path
            .as_deref()
            .ok_or_else(|| failed("file has no path on disk".to_string()))?;
        let metadata = tokio::fs::metadata(path)
            .await
            .map_err(|e| failed(e.to_string()))?;
        if !metadata.is_file() {
            return Err(failed("not a regular file".to_string()));
        }
        let canonical = tokio::fs::canonicalize(path)
            .await
            .map_err(|e| failed(e.to_string()))?;

        Ok(Materialized {
            locator: Locator(format!("file://{}", canonical.display())),
            content_type: file.content_type_or_guess(),
            size_bytes: metadata.len(),
        })
    }

    fn release(&self, locator: &Locator) {
        debug!(%locator, "Nothing to revoke for a file locator");
    }
}
