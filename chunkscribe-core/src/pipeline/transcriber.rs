use std::sync::Arc;
use std::time::Duration;

use tokio::time::sleep;
use tokio_util::sync::CancellationToken;
use tracing::{debug, warn};

use crate::backend::{BackendError, TranscriptionBackend};

use super::error::{TranscribeError, TranscribeResult};
use super::limiter::ConcurrencyLimiter;
use super::models::{Chunk, TranscriptResult};

/// Transcribes one chunk through the shared limiter with bounded retries.
#[derive(Clone)]
pub struct ChunkTranscriber {
    backend: Arc<dyn TranscriptionBackend>,
    limiter: ConcurrencyLimiter,
    max_attempts: u32,
    retry_delay: Duration,
}

impl ChunkTranscriber {
    pub fn new(
        backend: Arc<dyn TranscriptionBackend>,
        limiter: ConcurrencyLimiter,
        max_attempts: u32,
    ) -> Self {
        Self {
            backend,
            limiter,
            max_attempts: max_attempts.max(1),
            retry_delay: Duration::ZERO,
        }
    }

    pub fn with_retry_delay(mut self, delay: Duration) -> Self {
        self.retry_delay = delay;
        self
    }

    /// Stores the transcript on `chunk` when an attempt succeeds.
    ///
    /// Format errors end the attempts immediately; transient errors are retried
    /// until `max_attempts` is spent and the last one is returned. The
    /// cancellation token is checked before every attempt and while waiting
    /// for a limiter slot.
    pub async fn process(
        &self,
        chunk: &mut Chunk,
        cancel: &CancellationToken,
    ) -> TranscribeResult<TranscriptResult> {
        let mut last_error = None;
        for attempt in 1..=self.max_attempts {
            if cancel.is_cancelled() {
                return Err(TranscribeError::CancelledByUser);
            }
            let permit = tokio::select! {
                biased;
                _ = cancel.cancelled() => return Err(TranscribeError::CancelledByUser),
                permit = self.limiter.acquire() => permit
                    .map_err(|err| TranscribeError::BackendTransient(err.to_string()))?,
            };
            let outcome = self.backend.transcribe(&chunk.audio_file_path).await;
            permit.release();

            match outcome {
                Ok(result) => {
                    debug!(
                        chunk = %chunk.audio_file_path.display(),
                        attempt,
                        segments = result.segments.len(),
                        "chunk transcribed"
                    );
                    chunk.result = Some(result.clone());
                    return Ok(result);
                }
                Err(BackendError::Format(message)) => {
                    warn!(
                        chunk = %chunk.audio_file_path.display(),
                        backend = self.backend.name(),
                        error = %message,
                        "backend response rejected"
                    );
                    return Err(TranscribeError::BackendFormat(message));
                }
                Err(err) => {
                    warn!(
                        chunk = %chunk.audio_file_path.display(),
                        backend = self.backend.name(),
                        attempt,
                        max_attempts = self.max_attempts,
                        error = %err,
                        "transcription attempt failed"
                    );
                    last_error = Some(TranscribeError::from(err));
                    if attempt < self.max_attempts && !self.retry_delay.is_zero() {
                        tokio::select! {
                            _ = cancel.cancelled() => return Err(TranscribeError::CancelledByUser),
                            _ = sleep(self.retry_delay) => {}
                        }
                    }
                }
            }
        }
        Err(last_error.unwrap_or_else(|| {
            TranscribeError::BackendTransient("no attempts were made".into())
        }))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::backend::BackendResult;
    use crate::pipeline::TranscriptSegment;
    use async_trait::async_trait;
    use std::path::Path;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::sync::Mutex;

    struct ScriptedBackend {
        calls: AtomicUsize,
        script: Mutex<Vec<BackendResult<TranscriptResult>>>,
    }

    impl ScriptedBackend {
        fn new(mut script: Vec<BackendResult<TranscriptResult>>) -> Arc<Self> {
            script.reverse();
            Arc::new(Self {
                calls: AtomicUsize::new(0),
                script: Mutex::new(script),
            })
        }
    }

    #[async_trait]
    impl TranscriptionBackend for ScriptedBackend {
        fn name(&self) -> &'static str {
            "scripted"
        }

        async fn transcribe(&self, _audio_path: &Path) -> BackendResult<TranscriptResult> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            self.script
                .lock()
                .unwrap()
                .pop()
                .unwrap_or_else(|| Err(BackendError::Transient("script exhausted".into())))
        }
    }

    fn hello() -> TranscriptResult {
        TranscriptResult::new(vec![TranscriptSegment {
            start_seconds: 0.0,
            end_seconds: 1.0,
            text: "hello".into(),
        }])
    }

    #[tokio::test]
    async fn transient_then_success_stores_result() {
        let backend = ScriptedBackend::new(vec![
            Err(BackendError::Transient("503".into())),
            Ok(hello()),
        ]);
        let transcriber =
            ChunkTranscriber::new(backend.clone(), ConcurrencyLimiter::new("test", 1), 3);
        let mut chunk = Chunk::new(0.0, "/w/chunk_0000.mp3");
        let result = transcriber
            .process(&mut chunk, &CancellationToken::new())
            .await
            .unwrap();
        assert_eq!(result, hello());
        assert_eq!(chunk.result, Some(hello()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn format_error_is_not_retried() {
        let backend = ScriptedBackend::new(vec![Err(BackendError::Format("bad".into()))]);
        let transcriber =
            ChunkTranscriber::new(backend.clone(), ConcurrencyLimiter::new("test", 1), 3);
        let mut chunk = Chunk::new(0.0, "/w/chunk_0000.mp3");
        let err = transcriber
            .process(&mut chunk, &CancellationToken::new())
            .await
            .unwrap_err();
        assert_eq!(err, TranscribeError::BackendFormat("bad".into()));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 1);
        assert!(chunk.result.is_none());
    }

    #[tokio::test]
    async fn transient_errors_exhaust_attempts() {
        let backend = ScriptedBackend::new(vec![]);
        let transcriber =
            ChunkTranscriber::new(backend.clone(), ConcurrencyLimiter::new("test", 1), 3);
        let mut chunk = Chunk::new(0.0, "/w/chunk_0000.mp3");
        let err = transcriber
            .process(&mut chunk, &CancellationToken::new())
            .await
            .unwrap_err();
        assert!(matches!(err, TranscribeError::BackendTransient(_)));
        assert_eq!(backend.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn cancelled_token_skips_backend() {
        let backend = ScriptedBackend::new(vec![Ok(hello())]);
        let transcriber =
            ChunkTranscriber::new(backend.clone(), ConcurrencyLimiter::new("test", 1), 3);
        let cancel = CancellationToken::new();
        cancel.cancel();
        let mut chunk = Chunk::new(0.0, "/w/chunk_0000.mp3");
        let err = transcriber.process(&mut chunk, &cancel).await.unwrap_err();
        assert_eq!(err, TranscribeError::CancelledByUser);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
    }

    #[tokio::test]
    async fn cancel_while_waiting_for_slot() {
        let backend = ScriptedBackend::new(vec![Ok(hello())]);
        let limiter = ConcurrencyLimiter::new("test", 1);
        let held = limiter.acquire().await.unwrap();
        let transcriber = ChunkTranscriber::new(backend.clone(), limiter, 3);
        let cancel = CancellationToken::new();
        let trigger = cancel.clone();
        tokio::spawn(async move {
            tokio::time::sleep(Duration::from_millis(20)).await;
            trigger.cancel();
        });
        let mut chunk = Chunk::new(0.0, "/w/chunk_0000.mp3");
        let err = transcriber.process(&mut chunk, &cancel).await.unwrap_err();
        assert_eq!(err, TranscribeError::CancelledByUser);
        assert_eq!(backend.calls.load(Ordering::SeqCst), 0);
        drop(held);
    }
}
