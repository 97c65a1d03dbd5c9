use std::path::PathBuf;

use thiserror::Error;

use crate::backend::BackendError;
use crate::media::MediaError;
use crate::store::StoreError;

#[derive(Debug, Error, Clone, PartialEq)]
pub enum TranscribeError {
    #[error("transcription cancelled by user")]
    CancelledByUser,
    #[error("backend returned an unusable response: {0}")]
    BackendFormat(String),
    #[error("backend call failed: {0}")]
    BackendTransient(String),
}

impl From<BackendError> for TranscribeError {
    fn from(error: BackendError) -> Self {
        match error {
            BackendError::Format(message) => TranscribeError::BackendFormat(message),
            BackendError::Transient(message) => TranscribeError::BackendTransient(message),
        }
    }
}

pub type TranscribeResult<T> = Result<T, TranscribeError>;

#[derive(Debug, Error)]
pub enum PipelineError {
    #[error(transparent)]
    Store(#[from] StoreError),
    #[error(transparent)]
    Media(#[from] MediaError),
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("transcription cancelled by user")]
    CancelledByUser,
    #[error("file {file_id} is already being transcribed")]
    AlreadyRunning { file_id: String },
    #[error("{failed} of {total} chunks failed: {source}")]
    RunFailed {
        failed: usize,
        total: usize,
        #[source]
        source: TranscribeError,
    },
}

impl PipelineError {
    pub(crate) fn io(path: impl Into<PathBuf>, source: std::io::Error) -> Self {
        PipelineError::Io {
            source,
            path: path.into(),
        }
    }

    pub fn is_cancelled(&self) -> bool {
        matches!(self, PipelineError::CancelledByUser)
    }
}

pub type PipelineResult<T> = Result<T, PipelineError>;
