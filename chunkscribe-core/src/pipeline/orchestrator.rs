use std::collections::{HashMap, HashSet};
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use chrono::Utc;
use futures::future::join_all;
use sha2::{Digest, Sha256};
use tokio::fs;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, info_span, warn, Instrument};

use crate::backend::TranscriptionBackend;
use crate::config::PipelineSettings;
use crate::media::MediaToolkit;
use crate::store::{JsonStore, StoreError};
use crate::subtitle::{assemble, subtitle_path_for, write_srt};

use super::error::{PipelineError, PipelineResult, TranscribeError};
use super::limiter::ConcurrencyLimiter;
use super::models::{PipelinePhase, PipelineState, SourceFingerprint};
use super::planner::ChunkPlanner;
use super::progress::{transcription_progress, ProgressSink, ProgressTracker, TracingProgressSink};
use super::sweeper::ExpirationSweeper;
use super::transcriber::ChunkTranscriber;
use super::STATE_FILE_NAME;

const PROBED_PROGRESS: u8 = 5;
const SPLITTING_PROGRESS: u8 = 10;
const SPLIT_DONE_PROGRESS: u8 = 40;

/// `root/<sha256 of the path>`; renaming a file yields a new directory.
pub fn work_dir_for(root: &Path, source: &Path) -> PathBuf {
    let digest = Sha256::digest(source.to_string_lossy().as_bytes());
    root.join(hex::encode(digest))
}

/// Reads the persisted state of `source` under `root` without creating or
/// repairing it. `None` when no run has recorded anything yet.
pub fn read_state(root: &Path, source: &Path) -> PipelineResult<Option<PipelineState>> {
    let store: JsonStore<PipelineState> =
        JsonStore::builder(work_dir_for(root, source).join(STATE_FILE_NAME)).build();
    match store.read() {
        Ok(state) => Ok(Some(state)),
        Err(StoreError::NotFound { .. }) => Ok(None),
        Err(err) => Err(err.into()),
    }
}

/// Drives one source file from split to subtitle, resuming earlier runs.
pub struct TranscriptionOrchestrator {
    settings: PipelineSettings,
    media: Arc<dyn MediaToolkit>,
    planner: ChunkPlanner,
    transcriber: ChunkTranscriber,
    sweeper: ExpirationSweeper,
    progress: Arc<dyn ProgressSink>,
    auto_repair: bool,
    running: Mutex<HashMap<String, ActiveRun>>,
}

struct ActiveRun {
    cancel: CancellationToken,
    work_dir: PathBuf,
}

impl TranscriptionOrchestrator {
    pub fn new(
        settings: PipelineSettings,
        media: Arc<dyn MediaToolkit>,
        backend: Arc<dyn TranscriptionBackend>,
        limiter: ConcurrencyLimiter,
    ) -> Self {
        let planner = ChunkPlanner::new(
            Arc::clone(&media),
            settings.segment_seconds,
            settings.staleness,
        );
        let transcriber = ChunkTranscriber::new(backend, limiter, settings.max_attempts);
        let sweeper = ExpirationSweeper::new(&settings.root, settings.staleness);
        Self {
            settings,
            media,
            planner,
            transcriber,
            sweeper,
            progress: Arc::new(TracingProgressSink),
            auto_repair: true,
            running: Mutex::new(HashMap::new()),
        }
    }

    pub fn with_progress_sink(mut self, sink: Arc<dyn ProgressSink>) -> Self {
        self.progress = sink;
        self
    }

    pub fn with_auto_repair(mut self, enabled: bool) -> Self {
        self.auto_repair = enabled;
        self
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.transcriber = self.transcriber.with_retry_delay(delay);
        self
    }

    pub fn work_dir(&self, source: &Path) -> PathBuf {
        work_dir_for(&self.settings.root, source)
    }

    /// Signals the run registered under `file_id`. Returns whether one was found.
    pub fn cancel(&self, file_id: &str) -> bool {
        match self.registry().get(file_id) {
            Some(active) => {
                info!(file_id, "cancellation requested");
                active.cancel.cancel();
                true
            }
            None => false,
        }
    }

    pub fn is_running(&self, file_id: &str) -> bool {
        self.registry().contains_key(file_id)
    }

    pub fn status(&self, source: &Path) -> PipelineResult<Option<PipelineState>> {
        read_state(&self.settings.root, source)
    }

    /// Transcribes `source` and returns the path of the written subtitle file.
    ///
    /// Progress and the terminal outcome are reported to the progress sink.
    /// The expiration sweep is started after every run, whatever its result.
    pub async fn run(&self, file_id: &str, source: &Path) -> PipelineResult<PathBuf> {
        let (_guard, cancel) = match self.register(file_id, source) {
            Ok(registered) => registered,
            Err(err) => {
                warn!(file_id, error = %err, "run rejected");
                ProgressTracker::new(file_id, Arc::clone(&self.progress)).failed(err.to_string());
                return Err(err);
            }
        };
        let span = info_span!("transcription", file_id, source = %source.display());

        let outcome = async {
            let tracker = ProgressTracker::new(file_id, Arc::clone(&self.progress));
            tracker.init();
            let outcome = self.execute(source, &cancel, &tracker).await;
            match &outcome {
                Ok(srt_path) => {
                    info!(srt = %srt_path.display(), "transcription completed");
                    tracker.completed(srt_path.clone());
                }
                Err(err) if err.is_cancelled() => {
                    info!("transcription cancelled");
                    tracker.cancelled(err.to_string());
                }
                Err(err) => {
                    warn!(error = %err, "transcription failed");
                    tracker.failed(err.to_string());
                }
            }
            outcome
        }
        .instrument(span)
        .await;

        let active: HashSet<PathBuf> = self
            .registry()
            .values()
            .map(|active| active.work_dir.clone())
            .collect();
        let _ = self.sweeper.spawn(active);
        outcome
    }

    async fn execute(
        &self,
        source: &Path,
        cancel: &CancellationToken,
        tracker: &ProgressTracker,
    ) -> PipelineResult<PathBuf> {
        let work_dir = self.work_dir(source);
        fs::create_dir_all(&work_dir)
            .await
            .map_err(|err| PipelineError::io(&work_dir, err))?;

        let probe = self.media.probe(source).await?;
        let fingerprint = SourceFingerprint::from_probe(source, &probe);
        tracker.processing(PROBED_PROGRESS);

        let fresh = PipelineState::new(source, &work_dir, fingerprint.clone(), Utc::now());
        let store = self.state_store(&work_dir, fresh.clone());
        let mut state = store.load()?;
        if !state.is_owned_by(source, &work_dir) {
            warn!(
                recorded_source = %state.source_path.display(),
                recorded_work_dir = %state.work_dir.display(),
                "state document belongs to another location, starting over"
            );
            state = fresh;
        }

        tracker.processing(SPLITTING_PROGRESS);
        let plan = self
            .planner
            .ensure_chunks(state, &fingerprint, Utc::now())
            .await?;
        let mut state = plan.state;
        if plan.rebuilt {
            store.save(&state)?;
        }
        tracker.processing(SPLIT_DONE_PROGRESS);

        if cancel.is_cancelled() {
            return Err(PipelineError::CancelledByUser);
        }

        let total = state.chunks.len();
        let pending = state.pending_count();
        if pending > 0 {
            info!(total, pending, "transcribing chunks");
            let completed = AtomicUsize::new(total - pending);
            let completed = &completed;
            let transcriber = &self.transcriber;
            let outcomes = join_all(
                state
                    .chunks
                    .iter_mut()
                    .filter(|chunk| !chunk.is_transcribed())
                    .map(|chunk| async move {
                        let outcome = transcriber.process(chunk, cancel).await;
                        if outcome.is_ok() {
                            let done = completed.fetch_add(1, Ordering::SeqCst) + 1;
                            tracker.processing(transcription_progress(done, total));
                        }
                        outcome
                    }),
            )
            .await;

            state.touch(Utc::now());
            store.save(&state)?;

            let failures: Vec<TranscribeError> =
                outcomes.into_iter().filter_map(Result::err).collect();
            if let Some(first) = failures.first() {
                if cancel.is_cancelled()
                    || failures
                        .iter()
                        .all(|err| *err == TranscribeError::CancelledByUser)
                {
                    return Err(PipelineError::CancelledByUser);
                }
                return Err(PipelineError::RunFailed {
                    failed: failures.len(),
                    total,
                    source: first.clone(),
                });
            }
        } else {
            debug!(total, "all chunks already transcribed");
        }

        let lines = assemble(&state.chunks);
        let srt_path = subtitle_path_for(source);
        write_srt(&srt_path, &lines)
            .await
            .map_err(|err| PipelineError::io(&srt_path, err))?;

        state.phase = PipelinePhase::Done;
        state.touch(Utc::now());
        store.save(&state)?;
        Ok(srt_path)
    }

    fn state_store(&self, work_dir: &Path, default: PipelineState) -> JsonStore<PipelineState> {
        JsonStore::builder(work_dir.join(STATE_FILE_NAME))
            .default_value(default)
            .auto_repair(self.auto_repair)
            .on_invalid(|err| warn!(error = %err, "pipeline state rejected"))
            .on_auto_repaired(|state: &PipelineState| {
                info!(work_dir = %state.work_dir.display(), "pipeline state reset")
            })
            .build()
    }

    fn registry(&self) -> MutexGuard<'_, HashMap<String, ActiveRun>> {
        self.running
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    fn register(
        &self,
        file_id: &str,
        source: &Path,
    ) -> PipelineResult<(RunGuard<'_>, CancellationToken)> {
        let mut running = self.registry();
        if running.contains_key(file_id) {
            return Err(PipelineError::AlreadyRunning {
                file_id: file_id.to_string(),
            });
        }
        let token = CancellationToken::new();
        running.insert(
            file_id.to_string(),
            ActiveRun {
                cancel: token.clone(),
                work_dir: self.work_dir(source),
            },
        );
        Ok((
            RunGuard {
                orchestrator: self,
                file_id: file_id.to_string(),
            },
            token,
        ))
    }
}

/// Unregisters a run on every exit path.
struct RunGuard<'a> {
    orchestrator: &'a TranscriptionOrchestrator,
    file_id: String,
}

impl Drop for RunGuard<'_> {
    fn drop(&mut self) {
        self.orchestrator.registry().remove(&self.file_id);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn work_dir_is_a_path_hash() {
        let root = Path::new("/tmp/chunkscribe/whisper");
        let first = work_dir_for(root, Path::new("/media/talk.mp4"));
        assert_eq!(first, work_dir_for(root, Path::new("/media/talk.mp4")));
        assert_ne!(first, work_dir_for(root, Path::new("/media/renamed.mp4")));
        assert_eq!(first.parent(), Some(root));
        assert_eq!(first.file_name().unwrap().len(), 64);
    }

    #[test]
    fn read_state_never_creates_a_document() {
        let root = tempfile::tempdir().unwrap();
        let source = Path::new("/media/talk.mp4");
        assert!(read_state(root.path(), source).unwrap().is_none());
        assert!(!work_dir_for(root.path(), source).exists());

        let work_dir = work_dir_for(root.path(), source);
        std::fs::create_dir_all(&work_dir).unwrap();
        std::fs::write(work_dir.join(STATE_FILE_NAME), b"not json").unwrap();
        assert!(matches!(
            read_state(root.path(), source),
            Err(PipelineError::Store(_))
        ));
        assert_eq!(std::fs::read(work_dir.join(STATE_FILE_NAME)).unwrap(), b"not json");
    }
}
