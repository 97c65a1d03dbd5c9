//! Boundary to the external media tooling that probes and splits sources.

mod error;
mod ffmpeg;

use std::path::{Path, PathBuf};

use async_trait::async_trait;
use chrono::{DateTime, Utc};

pub use error::{MediaError, MediaResult};
pub use ffmpeg::FfmpegToolkit;

/// Metadata reported for a media file.
#[derive(Debug, Clone, PartialEq, Default)]
pub struct MediaProbe {
    pub duration_seconds: f64,
    pub size_bytes: u64,
    pub modified: Option<DateTime<Utc>>,
    pub created: Option<DateTime<Utc>>,
    pub bitrate: Option<u64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

#[async_trait]
pub trait MediaToolkit: Send + Sync {
    async fn probe(&self, path: &Path) -> MediaResult<MediaProbe>;

    async fn duration(&self, path: &Path) -> MediaResult<f64> {
        Ok(self.probe(path).await?.duration_seconds)
    }

    /// Cuts `path` into sequential audio segments of `segment_seconds` inside
    /// `out_dir`, returned in playback order.
    async fn split(
        &self,
        path: &Path,
        segment_seconds: u32,
        out_dir: &Path,
    ) -> MediaResult<Vec<PathBuf>>;
}
