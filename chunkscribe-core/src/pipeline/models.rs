use std::path::{Component, Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, TimeZone, Utc};
use serde::{Deserialize, Serialize};

use crate::media::MediaProbe;
use crate::store::Validate;

const DURATION_TOLERANCE_SECONDS: f64 = 0.1;
const BITRATE_TOLERANCE: u64 = 1000;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PipelinePhase {
    Init,
    ChunksReady,
    Done,
}

impl PipelinePhase {
    pub fn as_str(&self) -> &'static str {
        match self {
            PipelinePhase::Init => "init",
            PipelinePhase::ChunksReady => "chunks_ready",
            PipelinePhase::Done => "done",
        }
    }

    pub fn has_chunks(&self) -> bool {
        matches!(self, PipelinePhase::ChunksReady | PipelinePhase::Done)
    }
}

/// Structural snapshot of a source file, compared tolerantly between runs.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct SourceFingerprint {
    pub file_name: String,
    pub duration_seconds: f64,
    pub size_bytes: u64,
    pub modified_ms: Option<i64>,
    pub created_ms: Option<i64>,
    pub bitrate: Option<u64>,
    pub video_codec: Option<String>,
    pub audio_codec: Option<String>,
}

impl SourceFingerprint {
    pub fn from_probe(path: &Path, probe: &MediaProbe) -> Self {
        Self {
            file_name: path
                .file_name()
                .map(|name| name.to_string_lossy().to_string())
                .unwrap_or_default(),
            duration_seconds: probe.duration_seconds,
            size_bytes: probe.size_bytes,
            modified_ms: probe.modified.map(|ts| ts.timestamp_millis()),
            created_ms: probe.created.map(|ts| ts.timestamp_millis()),
            bitrate: probe.bitrate,
            video_codec: probe.video_codec.clone(),
            audio_codec: probe.audio_codec.clone(),
        }
    }

    /// Name and size must be identical; duration and bitrate may drift a
    /// little between probes; codecs only count when both sides report one.
    pub fn matches(&self, other: &SourceFingerprint) -> bool {
        if self.file_name != other.file_name || self.size_bytes != other.size_bytes {
            return false;
        }
        if (self.duration_seconds - other.duration_seconds).abs()
            > DURATION_TOLERANCE_SECONDS + f64::EPSILON
        {
            return false;
        }
        if !optional_eq(&self.video_codec, &other.video_codec)
            || !optional_eq(&self.audio_codec, &other.audio_codec)
        {
            return false;
        }
        match (self.bitrate, other.bitrate) {
            (Some(lhs), Some(rhs)) => lhs.abs_diff(rhs) <= BITRATE_TOLERANCE,
            _ => true,
        }
    }
}

fn optional_eq(lhs: &Option<String>, rhs: &Option<String>) -> bool {
    match (lhs, rhs) {
        (Some(lhs), Some(rhs)) => lhs == rhs,
        _ => true,
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct TranscriptSegment {
    pub start_seconds: f64,
    pub end_seconds: f64,
    pub text: String,
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct TranscriptResult {
    pub segments: Vec<TranscriptSegment>,
}

impl TranscriptResult {
    pub fn new(segments: Vec<TranscriptSegment>) -> Self {
        Self { segments }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct Chunk {
    pub offset_seconds: f64,
    pub audio_file_path: PathBuf,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub result: Option<TranscriptResult>,
}

impl Chunk {
    pub fn new(offset_seconds: f64, audio_file_path: impl Into<PathBuf>) -> Self {
        Self {
            offset_seconds,
            audio_file_path: audio_file_path.into(),
            result: None,
        }
    }

    pub fn is_transcribed(&self) -> bool {
        self.result.is_some()
    }
}

/// Persisted progress of one source file, stored as `info.json`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct PipelineState {
    pub source_path: PathBuf,
    pub work_dir: PathBuf,
    pub phase: PipelinePhase,
    pub source_fingerprint: SourceFingerprint,
    pub chunks: Vec<Chunk>,
    /// Milliseconds since the Unix epoch.
    pub last_updated: i64,
}

impl PipelineState {
    pub fn new(
        source_path: impl Into<PathBuf>,
        work_dir: impl Into<PathBuf>,
        source_fingerprint: SourceFingerprint,
        now: DateTime<Utc>,
    ) -> Self {
        Self {
            source_path: source_path.into(),
            work_dir: work_dir.into(),
            phase: PipelinePhase::Init,
            source_fingerprint,
            chunks: Vec::new(),
            last_updated: now.timestamp_millis(),
        }
    }

    pub fn touch(&mut self, now: DateTime<Utc>) {
        self.last_updated = now.timestamp_millis();
    }

    pub fn last_updated_at(&self) -> Option<DateTime<Utc>> {
        Utc.timestamp_millis_opt(self.last_updated).single()
    }

    pub fn is_stale(&self, now: DateTime<Utc>, window: Duration) -> bool {
        let age_ms = now.timestamp_millis() - self.last_updated;
        age_ms > window.as_millis() as i64
    }

    pub fn transcribed_count(&self) -> usize {
        self.chunks.iter().filter(|chunk| chunk.is_transcribed()).count()
    }

    pub fn pending_count(&self) -> usize {
        self.chunks.len() - self.transcribed_count()
    }

    /// True when the document was written for `source` in `work_dir` and
    /// every chunk lives inside that directory.
    pub fn is_owned_by(&self, source: &Path, work_dir: &Path) -> bool {
        self.source_path == source
            && self.work_dir == work_dir
            && self.chunks.iter().all(|chunk| {
                chunk.audio_file_path.starts_with(work_dir)
                    && !chunk
                        .audio_file_path
                        .components()
                        .any(|part| part == Component::ParentDir)
            })
    }
}

impl Validate for PipelineState {
    fn validate(&self) -> Result<(), String> {
        if self.last_updated <= 0 {
            return Err(format!("lastUpdated {} is not a timestamp", self.last_updated));
        }
        if self.phase.has_chunks() && self.chunks.is_empty() {
            return Err(format!("phase {} requires chunks", self.phase.as_str()));
        }
        for (index, chunk) in self.chunks.iter().enumerate() {
            if !chunk.offset_seconds.is_finite() || chunk.offset_seconds < 0.0 {
                return Err(format!(
                    "chunk {index} has invalid offset {}",
                    chunk.offset_seconds
                ));
            }
            let segments = chunk.result.iter().flat_map(|result| result.segments.iter());
            for segment in segments {
                if !segment.start_seconds.is_finite() || !segment.end_seconds.is_finite() {
                    return Err(format!("chunk {index} has a non-finite segment time"));
                }
            }
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn fingerprint() -> SourceFingerprint {
        SourceFingerprint {
            file_name: "talk.mp4".into(),
            duration_seconds: 150.0,
            size_bytes: 4096,
            modified_ms: Some(1_700_000_000_000),
            created_ms: None,
            bitrate: Some(128_000),
            video_codec: Some("h264".into()),
            audio_codec: Some("aac".into()),
        }
    }

    #[test]
    fn fingerprint_tolerates_small_drift() {
        let base = fingerprint();
        let mut drifted = base.clone();
        drifted.duration_seconds += 0.05;
        drifted.bitrate = Some(128_900);
        drifted.modified_ms = Some(1_800_000_000_000);
        assert!(base.matches(&drifted));

        let mut partial = base.clone();
        partial.video_codec = None;
        partial.bitrate = None;
        assert!(base.matches(&partial));
    }

    #[test]
    fn fingerprint_detects_changes() {
        let base = fingerprint();

        let mut longer = base.clone();
        longer.duration_seconds += 0.2;
        assert!(!base.matches(&longer));

        let mut bigger = base.clone();
        bigger.size_bytes += 1;
        assert!(!base.matches(&bigger));

        let mut renamed = base.clone();
        renamed.file_name = "other.mp4".into();
        assert!(!base.matches(&renamed));

        let mut recoded = base.clone();
        recoded.audio_codec = Some("opus".into());
        assert!(!base.matches(&recoded));

        let mut rebitrated = base.clone();
        rebitrated.bitrate = Some(130_000);
        assert!(!base.matches(&rebitrated));
    }

    #[test]
    fn state_validation_rejects_ready_without_chunks() {
        let mut state = PipelineState::new("/a.mp4", "/w", fingerprint(), Utc::now());
        assert!(state.validate().is_ok());
        state.phase = PipelinePhase::ChunksReady;
        assert!(state.validate().is_err());
        state.chunks.push(Chunk::new(0.0, "/w/chunk_0000.mp3"));
        assert!(state.validate().is_ok());
        state.chunks[0].offset_seconds = f64::NAN;
        assert!(state.validate().is_err());
    }

    #[test]
    fn ownership_requires_matching_paths() {
        let source = Path::new("/media/a.mp4");
        let work_dir = Path::new("/tmp/whisper/abc");
        let mut state = PipelineState::new(source, work_dir, fingerprint(), Utc::now());
        state.chunks.push(Chunk::new(0.0, "/tmp/whisper/abc/chunk_0000.mp3"));
        assert!(state.is_owned_by(source, work_dir));
        assert!(!state.is_owned_by(Path::new("/media/b.mp4"), work_dir));
        assert!(!state.is_owned_by(source, Path::new("/tmp/whisper/def")));

        state.chunks.push(Chunk::new(60.0, "/tmp/whisper/abc/../precious/keep.txt"));
        assert!(!state.is_owned_by(source, work_dir));
        state.chunks[1].audio_file_path = "/home/user/chunk_0001.mp3".into();
        assert!(!state.is_owned_by(source, work_dir));
    }

    #[test]
    fn staleness_uses_last_update() {
        let now = Utc::now();
        let mut state = PipelineState::new("/a.mp4", "/w", fingerprint(), now);
        let window = Duration::from_secs(3 * 60 * 60);
        assert!(!state.is_stale(now, window));
        state.touch(now - chrono::Duration::hours(4));
        assert!(state.is_stale(now, window));
    }
}
