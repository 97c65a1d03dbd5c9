use std::path::PathBuf;
use std::time::Duration;

use thiserror::Error;

#[derive(Debug, Error)]
pub enum MediaError {
    #[error("{tool} failed: {stderr}")]
    Command { tool: String, stderr: String },
    #[error("{tool} timed out after {elapsed:?}")]
    Timeout { tool: String, elapsed: Duration },
    #[error("io error at {path}: {source}")]
    Io {
        source: std::io::Error,
        path: PathBuf,
    },
    #[error("invalid ffprobe payload: {0}")]
    Parse(String),
    #[error("splitting {path} produced no segments")]
    NoSegments { path: PathBuf },
}

impl From<serde_json::Error> for MediaError {
    fn from(source: serde_json::Error) -> Self {
        MediaError::Parse(source.to_string())
    }
}

pub type MediaResult<T> = Result<T, MediaError>;
