use std::path::{Path, PathBuf};
use std::process::Output;
use std::time::Duration;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::Deserialize;
use tokio::fs;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::debug;

use crate::config::MediaSection;

use super::{MediaError, MediaProbe, MediaResult, MediaToolkit};

const SEGMENT_PREFIX: &str = "chunk_";
const SEGMENT_EXTENSION: &str = "mp3";

/// Probes with `ffprobe` and splits with ffmpeg's segment muxer.
#[derive(Debug, Clone)]
pub struct FfmpegToolkit {
    ffmpeg: PathBuf,
    ffprobe: PathBuf,
    probe_timeout: Duration,
    split_timeout: Duration,
}

impl FfmpegToolkit {
    pub fn new(section: &MediaSection) -> Self {
        Self {
            ffmpeg: PathBuf::from(&section.ffmpeg_binary),
            ffprobe: PathBuf::from(&section.ffprobe_binary),
            probe_timeout: Duration::from_secs(section.probe_timeout_seconds),
            split_timeout: Duration::from_secs(section.split_timeout_seconds),
        }
    }

    async fn run(&self, tool: &Path, mut command: Command, limit: Duration) -> MediaResult<Output> {
        let label = tool.display().to_string();
        command.kill_on_drop(true);
        match timeout(limit, command.output()).await {
            Ok(Ok(output)) if output.status.success() => Ok(output),
            Ok(Ok(output)) => Err(MediaError::Command {
                tool: label,
                stderr: String::from_utf8_lossy(&output.stderr).trim().to_string(),
            }),
            Ok(Err(source)) => Err(MediaError::Io {
                source,
                path: tool.to_path_buf(),
            }),
            Err(_) => Err(MediaError::Timeout {
                tool: label,
                elapsed: limit,
            }),
        }
    }
}

#[async_trait]
impl MediaToolkit for FfmpegToolkit {
    async fn probe(&self, path: &Path) -> MediaResult<MediaProbe> {
        let metadata = fs::metadata(path).await.map_err(|source| MediaError::Io {
            source,
            path: path.to_path_buf(),
        })?;

        let mut command = Command::new(&self.ffprobe);
        command
            .arg("-v")
            .arg("quiet")
            .arg("-print_format")
            .arg("json")
            .arg("-show_streams")
            .arg("-show_format")
            .arg(path);
        let output = self.run(&self.ffprobe, command, self.probe_timeout).await?;
        let parsed: FfprobeOutput = serde_json::from_slice(&output.stdout)?;

        let duration_seconds = parsed
            .format
            .duration
            .as_deref()
            .and_then(|value| value.parse::<f64>().ok())
            .ok_or_else(|| MediaError::Parse(format!("no duration for {}", path.display())))?;
        let codec_of = |kind: &str| {
            parsed
                .streams
                .iter()
                .find(|stream| stream.codec_type.as_deref() == Some(kind))
                .and_then(|stream| stream.codec_name.clone())
        };

        Ok(MediaProbe {
            duration_seconds,
            size_bytes: metadata.len(),
            modified: metadata.modified().ok().map(DateTime::<Utc>::from),
            created: metadata.created().ok().map(DateTime::<Utc>::from),
            bitrate: parsed
                .format
                .bit_rate
                .as_deref()
                .and_then(|value| value.parse::<u64>().ok()),
            video_codec: codec_of("video"),
            audio_codec: codec_of("audio"),
        })
    }

    async fn split(
        &self,
        path: &Path,
        segment_seconds: u32,
        out_dir: &Path,
    ) -> MediaResult<Vec<PathBuf>> {
        fs::create_dir_all(out_dir)
            .await
            .map_err(|source| MediaError::Io {
                source,
                path: out_dir.to_path_buf(),
            })?;
        let pattern = out_dir.join(format!("{SEGMENT_PREFIX}%04d.{SEGMENT_EXTENSION}"));

        let mut command = Command::new(&self.ffmpeg);
        command
            .arg("-y")
            .arg("-hide_banner")
            .arg("-loglevel")
            .arg("error")
            .arg("-i")
            .arg(path)
            .arg("-vn")
            .arg("-map")
            .arg("0:a:0")
            .arg("-ac")
            .arg("1")
            .arg("-ar")
            .arg("16000")
            .arg("-c:a")
            .arg("libmp3lame")
            .arg("-f")
            .arg("segment")
            .arg("-segment_time")
            .arg(segment_seconds.to_string())
            .arg("-reset_timestamps")
            .arg("1")
            .arg(&pattern);
        self.run(&self.ffmpeg, command, self.split_timeout).await?;

        let segments = list_segments(out_dir).await?;
        debug!(source = %path.display(), count = segments.len(), "split source into segments");
        if segments.is_empty() {
            return Err(MediaError::NoSegments {
                path: path.to_path_buf(),
            });
        }
        Ok(segments)
    }
}

async fn list_segments(dir: &Path) -> MediaResult<Vec<PathBuf>> {
    let io_error = |source| MediaError::Io {
        source,
        path: dir.to_path_buf(),
    };
    let mut entries = fs::read_dir(dir).await.map_err(io_error)?;
    let mut segments = Vec::new();
    while let Some(entry) = entries.next_entry().await.map_err(io_error)? {
        let path = entry.path();
        let is_segment = path
            .file_name()
            .and_then(|name| name.to_str())
            .map(|name| {
                name.starts_with(SEGMENT_PREFIX) && name.ends_with(&format!(".{SEGMENT_EXTENSION}"))
            })
            .unwrap_or(false);
        if is_segment {
            segments.push(path);
        }
    }
    segments.sort();
    Ok(segments)
}

#[derive(Debug, Deserialize)]
struct FfprobeOutput {
    #[serde(default)]
    streams: Vec<FfprobeStream>,
    #[serde(default)]
    format: FfprobeFormat,
}

#[derive(Debug, Deserialize)]
struct FfprobeStream {
    #[serde(default)]
    codec_type: Option<String>,
    #[serde(default)]
    codec_name: Option<String>,
}

#[derive(Debug, Deserialize, Default)]
struct FfprobeFormat {
    #[serde(default)]
    duration: Option<String>,
    #[serde(default)]
    bit_rate: Option<String>,
}
