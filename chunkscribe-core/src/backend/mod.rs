//! Speech-recognition backends that turn one short audio file into timed text.

mod cloud;
mod whisper_cpp;

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use thiserror::Error;

use crate::config::{BackendKind, BackendSection};
use crate::error::ConfigError;
use crate::pipeline::TranscriptResult;

pub use cloud::CloudWhisperBackend;
pub use whisper_cpp::WhisperCppBackend;

#[derive(Debug, Error)]
pub enum BackendError {
    /// The backend answered, but not in the expected shape. Never retried.
    #[error("unexpected backend response: {0}")]
    Format(String),
    #[error("backend call failed: {0}")]
    Transient(String),
}

pub type BackendResult<T> = Result<T, BackendError>;

#[async_trait]
pub trait TranscriptionBackend: Send + Sync {
    fn name(&self) -> &'static str;

    async fn transcribe(&self, audio_path: &Path) -> BackendResult<TranscriptResult>;
}

pub fn backend_from_config(
    section: &BackendSection,
) -> Result<Arc<dyn TranscriptionBackend>, ConfigError> {
    match section.kind {
        BackendKind::Cloud => {
            let cloud = section.cloud.as_ref().ok_or(ConfigError::Invalid {
                field: "backend.cloud",
                reason: "section missing".into(),
            })?;
            Ok(Arc::new(CloudWhisperBackend::from_config(cloud)?))
        }
        BackendKind::WhisperCpp => {
            let local = section.whisper_cpp.as_ref().ok_or(ConfigError::Invalid {
                field: "backend.whisper_cpp",
                reason: "section missing".into(),
            })?;
            Ok(Arc::new(WhisperCppBackend::from_config(local)))
        }
    }
}
