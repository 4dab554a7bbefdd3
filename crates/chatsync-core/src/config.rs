use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};
use thiserror::Error;
use tracing::debug;

/// 25 MiB, the per-file ceiling the chat input has always enforced.
pub const DEFAULT_MAX_ATTACHMENT_BYTES: u64 = 25 * 1024 * 1024;
pub const DEFAULT_PREVIEW_LENGTH: usize = 30;
pub const DEFAULT_GREETING: &str = "Hello! How can I assist you today?";
pub const DEFAULT_NEW_CONVERSATION_PREVIEW: &str = "Start a new conversation";
pub const DEFAULT_SIMULATED_RESPONSE: &str =
    "This is a simulated streamed response from the frontend. No actual backend call was made.";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("IO error: {0}")]
    IoError(#[from] std::io::Error),

    #[error("Invalid config file {path}: {source}")]
    ParseError {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
}

pub type ConfigResult<T> = Result<T, ConfigError>;

/// Settings for the state engine itself.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct EngineConfig {
    /// Files larger than this are rejected before any upload starts.
    pub max_attachment_bytes: u64,
    /// Number of characters kept in a conversation's last-message preview.
    pub preview_length: usize,
    /// Assistant message seeded into every new conversation.
    pub greeting: String,
    pub new_conversation_title: String,
    /// List preview of a conversation nobody has written in yet.
    pub new_conversation_preview: String,
    /// Capacity of the broadcast channel carrying [`crate::EngineEvent`]s.
    pub event_capacity: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            max_attachment_bytes: DEFAULT_MAX_ATTACHMENT_BYTES,
            preview_length: DEFAULT_PREVIEW_LENGTH,
            greeting: DEFAULT_GREETING.to_string(),
            new_conversation_title: "New conversation".to_string(),
            new_conversation_preview: DEFAULT_NEW_CONVERSATION_PREVIEW.to_string(),
            event_capacity: 256,
        }
    }
}

/// Timings and canned content for the simulated collaborators.
#[derive(Clone, Debug, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SimulationConfig {
    pub upload_delay_ms: u64,
    /// Wait before the first response chunk.
    pub response_delay_ms: u64,
    pub chunk_delay_ms: u64,
    pub response_text: String,
    /// Simulated uploads of files whose name contains this fail.
    pub fail_uploads_matching: Option<String>,
}

impl SimulationConfig {
    pub fn upload_delay(&self) -> Duration {
        Duration::from_millis(self.upload_delay_ms)
    }

    pub fn response_delay(&self) -> Duration {
        Duration::from_millis(self.response_delay_ms)
    }

    pub fn chunk_delay(&self) -> Duration {
        Duration::from_millis(self.chunk_delay_ms)
    }
}

impl Default for SimulationConfig {
    fn default() -> Self {
        Self {
            upload_delay_ms: 700,
            response_delay_ms: 1500,
            chunk_delay_ms: 40,
            response_text: DEFAULT_SIMULATED_RESPONSE.to_string(),
            fail_uploads_matching: None,
        }
    }
}

/// Top-level config file contents.
#[derive(Clone, Debug, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ChatsyncConfig {
    pub engine: EngineConfig,
    pub simulation: SimulationConfig,
}

impl ChatsyncConfig {
    /// `<config dir>/chatsync/config.json`, if the platform has a config dir.
    pub fn default_path() -> Option<PathBuf> {
        dirs::config_dir().map(|dir| dir.join("chatsync").join("config.json"))
    }

    /// Parse a JSON config file. Missing keys fall back to their defaults.
    pub fn load_from(path: &Path) -> ConfigResult<Self> {
        let raw = std::fs::read_to_string(path)?;
        serde_json::from_str(&raw).map_err(|source| ConfigError::ParseError {
            path: path.to_path_buf(),
            source,
        })
    }

    /// Load `explicit` if given, otherwise the default location.
    ///
    /// A missing default file yields defaults; an explicit path must exist.
    pub fn load(explicit: Option<&Path>) -> ConfigResult<Self> {
        if let Some(path) = explicit {
            return Self::load_from(path);
        }

        match Self::default_path() {
            Some(path) if path.exists() => Self::load_from(&path),
            _ => {
                debug!("No config file found, using defaults");
                Ok(Self::default())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::io::Write;

    #[test]
    fn test_defaults() {
        let config = ChatsyncConfig::default();
        assert_eq!(config.engine.max_attachment_bytes, 26_214_400);
        assert_eq!(config.engine.preview_length, 30);
        assert_eq!(config.engine.greeting, "Hello! How can I assist you today?");
        assert_eq!(config.engine.new_conversation_preview, "Start a new conversation");
        assert_eq!(config.simulation.upload_delay(), Duration::from_millis(700));
        assert_eq!(config.simulation.response_delay(), Duration::from_millis(1500));
    }

    #[test]
    fn test_partial_file_keeps_defaults() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(
            file,
            r#"{{ "engine": {{ "max_attachment_bytes": 1024 }}, "simulation": {{ "upload_delay_ms": 5 }} }}"#
        )
        .expect("write config");

        let config = ChatsyncConfig::load(Some(file.path())).expect("load config");
        assert_eq!(config.engine.max_attachment_bytes, 1024);
        assert_eq!(config.engine.preview_length, DEFAULT_PREVIEW_LENGTH);
        assert_eq!(config.simulation.upload_delay_ms, 5);
        assert_eq!(config.simulation.chunk_delay_ms, 40);
    }

    #[test]
    fn test_malformed_file_is_an_error() {
        let mut file = tempfile::NamedTempFile::new().expect("temp file");
        write!(file, "{{ not json").expect("write config");

        let result = ChatsyncConfig::load_from(file.path());
        assert!(matches!(result, Err(ConfigError::ParseError { .. })));
    }

    #[test]
    fn test_missing_explicit_file_is_an_error() {
        let dir = tempfile::tempdir().expect("temp dir");
        let result = ChatsyncConfig::load(Some(&dir.path().join("absent.json")));
        assert!(matches!(result, Err(ConfigError::IoError(_))));
    }
}
