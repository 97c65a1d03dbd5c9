use std::path::Path;
use std::sync::Arc;
use std::time::Duration;

use chrono::{DateTime, Utc};
use tokio::fs;
use tracing::{debug, info, warn};

use crate::media::MediaToolkit;

use super::error::{PipelineError, PipelineResult};
use super::models::{Chunk, PipelinePhase, PipelineState, SourceFingerprint};
use super::STATE_FILE_NAME;

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum RebuildReason {
    NotSplit,
    Stale,
    SourceChanged,
}

impl RebuildReason {
    pub fn as_str(&self) -> &'static str {
        match self {
            RebuildReason::NotSplit => "not_split",
            RebuildReason::Stale => "stale",
            RebuildReason::SourceChanged => "source_changed",
        }
    }
}

#[derive(Debug, Clone)]
pub struct ChunkPlan {
    pub state: PipelineState,
    pub rebuilt: bool,
    pub reason: Option<RebuildReason>,
}

/// Keeps the chunk list of a run valid against the current source file.
#[derive(Clone)]
pub struct ChunkPlanner {
    media: Arc<dyn MediaToolkit>,
    segment_seconds: u32,
    staleness: Duration,
}

impl ChunkPlanner {
    pub fn new(media: Arc<dyn MediaToolkit>, segment_seconds: u32, staleness: Duration) -> Self {
        Self {
            media,
            segment_seconds: segment_seconds.max(1),
            staleness,
        }
    }

    pub fn rebuild_reason(
        &self,
        state: &PipelineState,
        fingerprint: &SourceFingerprint,
        now: DateTime<Utc>,
    ) -> Option<RebuildReason> {
        if !state.phase.has_chunks() {
            Some(RebuildReason::NotSplit)
        } else if state.is_stale(now, self.staleness) {
            Some(RebuildReason::Stale)
        } else if !state.source_fingerprint.matches(fingerprint) {
            Some(RebuildReason::SourceChanged)
        } else {
            None
        }
    }

    /// Returns `state` untouched when its chunks are still usable, otherwise
    /// re-splits the source and drops every earlier transcript.
    pub async fn ensure_chunks(
        &self,
        mut state: PipelineState,
        fingerprint: &SourceFingerprint,
        now: DateTime<Utc>,
    ) -> PipelineResult<ChunkPlan> {
        let Some(reason) = self.rebuild_reason(&state, fingerprint, now) else {
            debug!(
                source = %state.source_path.display(),
                chunks = state.chunks.len(),
                transcribed = state.transcribed_count(),
                "reusing existing chunks"
            );
            return Ok(ChunkPlan {
                state,
                rebuilt: false,
                reason: None,
            });
        };

        info!(
            source = %state.source_path.display(),
            reason = reason.as_str(),
            "rebuilding chunks"
        );
        clear_work_dir(&state.work_dir).await?;

        let segments = self
            .media
            .split(&state.source_path, self.segment_seconds, &state.work_dir)
            .await?;
        let mut chunks = Vec::with_capacity(segments.len());
        let mut offset = 0.0;
        for segment in segments {
            let duration = self.media.duration(&segment).await?;
            chunks.push(Chunk::new(offset, segment));
            offset += duration;
        }

        state.chunks = chunks;
        state.source_fingerprint = fingerprint.clone();
        state.phase = PipelinePhase::ChunksReady;
        state.touch(now);
        Ok(ChunkPlan {
            state,
            rebuilt: true,
            reason: Some(reason),
        })
    }
}

/// Removes every entry of the work directory except the state document,
/// which is overwritten by the caller once the new chunk list exists.
async fn clear_work_dir(dir: &Path) -> PipelineResult<()> {
    let mut entries = match fs::read_dir(dir).await {
        Ok(entries) => entries,
        Err(err) if err.kind() == std::io::ErrorKind::NotFound => return Ok(()),
        Err(err) => return Err(PipelineError::io(dir, err)),
    };
    while let Some(entry) = entries
        .next_entry()
        .await
        .map_err(|err| PipelineError::io(dir, err))?
    {
        let path = entry.path();
        if path.file_name().and_then(|name| name.to_str()) == Some(STATE_FILE_NAME) {
            continue;
        }
        let removed = match entry.file_type().await {
            Ok(kind) if kind.is_dir() => fs::remove_dir_all(&path).await,
            _ => fs::remove_file(&path).await,
        };
        if let Err(err) = removed {
            warn!(path = %path.display(), error = %err, "failed to remove stale chunk file");
        }
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::media::{MediaProbe, MediaResult};
    use async_trait::async_trait;
    use std::path::PathBuf;
    use tempfile::tempdir;

    struct FixedSplitter {
        durations: Vec<f64>,
    }

    #[async_trait]
    impl MediaToolkit for FixedSplitter {
        async fn probe(&self, path: &Path) -> MediaResult<MediaProbe> {
            let index: usize = path
                .file_stem()
                .and_then(|stem| stem.to_str())
                .and_then(|stem| stem.strip_prefix("chunk_"))
                .and_then(|digits| digits.parse().ok())
                .unwrap_or(0);
            Ok(MediaProbe {
                duration_seconds: self.durations[index],
                ..MediaProbe::default()
            })
        }

        async fn split(
            &self,
            _path: &Path,
            _segment_seconds: u32,
            out_dir: &Path,
        ) -> MediaResult<Vec<PathBuf>> {
            let mut files = Vec::new();
            for index in 0..self.durations.len() {
                let path = out_dir.join(format!("chunk_{index:04}.mp3"));
                std::fs::write(&path, b"audio").unwrap();
                files.push(path);
            }
            Ok(files)
        }
    }

    fn fingerprint() -> SourceFingerprint {
        SourceFingerprint {
            file_name: "talk.mp4".into(),
            duration_seconds: 150.0,
            size_bytes: 4096,
            modified_ms: None,
            created_ms: None,
            bitrate: None,
            video_codec: None,
            audio_codec: Some("aac".into()),
        }
    }

    fn planner() -> ChunkPlanner {
        ChunkPlanner::new(
            Arc::new(FixedSplitter {
                durations: vec![60.0, 60.0, 30.0],
            }),
            60,
            Duration::from_secs(3 * 60 * 60),
        )
    }

    #[tokio::test]
    async fn fresh_state_is_split_with_cumulative_offsets() {
        let dir = tempdir().unwrap();
        let now = Utc::now();
        let state = PipelineState::new("/src/talk.mp4", dir.path(), fingerprint(), now);
        let plan = planner()
            .ensure_chunks(state, &fingerprint(), now)
            .await
            .unwrap();
        assert!(plan.rebuilt);
        assert_eq!(plan.reason, Some(RebuildReason::NotSplit));
        let offsets: Vec<f64> = plan.state.chunks.iter().map(|c| c.offset_seconds).collect();
        assert_eq!(offsets, vec![0.0, 60.0, 120.0]);
        assert_eq!(plan.state.phase, PipelinePhase::ChunksReady);
    }

    #[tokio::test]
    async fn rebuild_clears_old_files_but_keeps_state_document() {
        let dir = tempdir().unwrap();
        std::fs::write(dir.path().join("leftover.mp3"), b"old").unwrap();
        std::fs::write(dir.path().join(STATE_FILE_NAME), b"{}").unwrap();
        let now = Utc::now();
        let state = PipelineState::new("/src/talk.mp4", dir.path(), fingerprint(), now);
        planner()
            .ensure_chunks(state, &fingerprint(), now)
            .await
            .unwrap();
        assert!(!dir.path().join("leftover.mp3").exists());
        assert!(dir.path().join(STATE_FILE_NAME).exists());
        assert!(dir.path().join("chunk_0002.mp3").exists());
    }

    #[test]
    fn rebuild_reasons_follow_state_and_fingerprint() {
        let now = Utc::now();
        let planner = planner();
        let mut state = PipelineState::new("/src/talk.mp4", "/w", fingerprint(), now);
        assert_eq!(
            planner.rebuild_reason(&state, &fingerprint(), now),
            Some(RebuildReason::NotSplit)
        );

        state.phase = PipelinePhase::ChunksReady;
        state.chunks.push(Chunk::new(0.0, "/w/chunk_0000.mp3"));
        assert_eq!(planner.rebuild_reason(&state, &fingerprint(), now), None);

        let mut drifted = fingerprint();
        drifted.duration_seconds += 0.05;
        assert_eq!(planner.rebuild_reason(&state, &drifted, now), None);

        drifted.duration_seconds += 0.1;
        assert_eq!(
            planner.rebuild_reason(&state, &drifted, now),
            Some(RebuildReason::SourceChanged)
        );

        state.phase = PipelinePhase::Done;
        state.touch(now - chrono::Duration::hours(4));
        assert_eq!(
            planner.rebuild_reason(&state, &fingerprint(), now),
            Some(RebuildReason::Stale)
        );
    }
}
