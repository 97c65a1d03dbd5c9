use std::path::{Path, PathBuf};
use std::time::Duration;

use async_trait::async_trait;
use serde::Deserialize;
use tokio::process::Command;
use tokio::time::timeout;
use tracing::{debug, warn};

use crate::config::WhisperCppSection;
use crate::pipeline::{TranscriptResult, TranscriptSegment};

use super::{BackendError, BackendResult, TranscriptionBackend};

/// Local whisper.cpp command-line binary writing `-oj` JSON output.
#[derive(Debug, Clone)]
pub struct WhisperCppBackend {
    executable: PathBuf,
    model_path: PathBuf,
    language: Option<String>,
    timeout: Duration,
}

const DEFAULT_TIMEOUT: Duration = Duration::from_secs(600);

impl WhisperCppBackend {
    pub fn new(
        executable: impl Into<PathBuf>,
        model_path: impl Into<PathBuf>,
        language: Option<String>,
    ) -> Self {
        Self {
            executable: executable.into(),
            model_path: model_path.into(),
            language,
            timeout: DEFAULT_TIMEOUT,
        }
    }

    /// Upper bound for one invocation; a hung process is killed and reported as transient.
    pub fn with_timeout(mut self, limit: Duration) -> Self {
        self.timeout = limit;
        self
    }

    pub fn from_config(section: &WhisperCppSection) -> Self {
        Self::new(
            &section.executable,
            &section.model_path,
            section.language.clone(),
        )
        .with_timeout(Duration::from_secs(section.timeout_seconds))
    }

    fn output_prefix(audio_path: &Path) -> PathBuf {
        let stem = audio_path
            .file_stem()
            .map(|stem| stem.to_string_lossy().to_string())
            .unwrap_or_else(|| "chunk".into());
        audio_path.with_file_name(format!("{stem}.whisper"))
    }
}

#[async_trait]
impl TranscriptionBackend for WhisperCppBackend {
    fn name(&self) -> &'static str {
        "whisper-cpp"
    }

    async fn transcribe(&self, audio_path: &Path) -> BackendResult<TranscriptResult> {
        let prefix = Self::output_prefix(audio_path);
        let json_path = prefix.with_extension("whisper.json");

        let mut command = Command::new(&self.executable);
        command
            .kill_on_drop(true)
            .arg("-m")
            .arg(&self.model_path)
            .arg("-f")
            .arg(audio_path)
            .arg("-oj")
            .arg("-of")
            .arg(&prefix)
            .arg("-np");
        if let Some(language) = &self.language {
            command.arg("-l").arg(language);
        }
        let output = match timeout(self.timeout, command.output()).await {
            Ok(Ok(output)) => output,
            Ok(Err(err)) => {
                return Err(BackendError::Transient(format!(
                    "failed to start {}: {err}",
                    self.executable.display()
                )))
            }
            Err(_) => {
                return Err(BackendError::Transient(format!(
                    "whisper.cpp timed out after {}s",
                    self.timeout.as_secs_f64()
                )))
            }
        };
        if !output.status.success() {
            return Err(BackendError::Transient(format!(
                "whisper.cpp exited with {:?}: {}",
                output.status.code(),
                String::from_utf8_lossy(&output.stderr).trim()
            )));
        }

        let raw = tokio::fs::read_to_string(&json_path).await.map_err(|err| {
            BackendError::Format(format!(
                "whisper.cpp produced no output at {}: {err}",
                json_path.display()
            ))
        })?;
        if let Err(err) = tokio::fs::remove_file(&json_path).await {
            warn!(path = %json_path.display(), error = %err, "failed to remove whisper.cpp output");
        }
        let result = parse_whisper_json(&raw)?;
        debug!(file = %audio_path.display(), segments = result.segments.len(), "local transcription finished");
        Ok(result)
    }
}

#[derive(Debug, Deserialize)]
struct WhisperCppOutput {
    transcription: Vec<WhisperCppSegment>,
}

#[derive(Debug, Deserialize)]
struct WhisperCppSegment {
    offsets: WhisperCppOffsets,
    text: String,
}

/// Millisecond offsets relative to the input file.
#[derive(Debug, Deserialize)]
struct WhisperCppOffsets {
    from: u64,
    to: u64,
}

fn parse_whisper_json(raw: &str) -> BackendResult<TranscriptResult> {
    let parsed: WhisperCppOutput =
        serde_json::from_str(raw).map_err(|err| BackendError::Format(err.to_string()))?;
    let segments = parsed
        .transcription
        .into_iter()
        .map(|segment| TranscriptSegment {
            start_seconds: segment.offsets.from as f64 / 1000.0,
            end_seconds: segment.offsets.to as f64 / 1000.0,
            text: segment.text.trim().to_string(),
        })
        .collect();
    Ok(TranscriptResult::new(segments))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn whisper_json_offsets_become_seconds() {
        let raw = r#"{
            "result": {"language": "en"},
            "transcription": [
                {"timestamps": {"from": "00:00:00,000", "to": "00:00:01,200"},
                 "offsets": {"from": 0, "to": 1200}, "text": " Hi"},
                {"timestamps": {"from": "00:00:01,200", "to": "00:00:03,000"},
                 "offsets": {"from": 1200, "to": 3000}, "text": " there"}
            ]
        }"#;
        let result = parse_whisper_json(raw).unwrap();
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[0].end_seconds, 1.2);
        assert_eq!(result.segments[1].text, "there");
    }

    #[test]
    fn unexpected_shape_is_a_format_error() {
        let err = parse_whisper_json(r#"{"segments": []}"#).unwrap_err();
        assert!(matches!(err, BackendError::Format(_)));
    }

    #[test]
    fn output_prefix_sits_next_to_audio() {
        let prefix = WhisperCppBackend::output_prefix(Path::new("/work/chunk_0003.mp3"));
        assert_eq!(prefix, PathBuf::from("/work/chunk_0003.whisper"));
        assert_eq!(
            prefix.with_extension("whisper.json"),
            PathBuf::from("/work/chunk_0003.whisper.json")
        );
    }

    #[tokio::test]
    async fn missing_executable_is_transient() {
        let backend = WhisperCppBackend::new("/nonexistent/whisper-cli", "/models/base.bin", None);
        let err = backend
            .transcribe(Path::new("/nonexistent/chunk_0000.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transient(_)));
    }

    #[cfg(unix)]
    #[tokio::test]
    async fn hung_process_times_out_as_transient() {
        use std::os::unix::fs::PermissionsExt;

        let dir = tempfile::tempdir().unwrap();
        let script = dir.path().join("whisper-cli");
        std::fs::write(&script, "#!/bin/sh\nsleep 5\n").unwrap();
        std::fs::set_permissions(&script, std::fs::Permissions::from_mode(0o755)).unwrap();

        let backend = WhisperCppBackend::new(&script, "/models/base.bin", None)
            .with_timeout(Duration::from_millis(100));
        // A freshly written script can briefly fail with ETXTBSY while other tests fork.
        let mut message = String::new();
        for _ in 0..5 {
            let started = std::time::Instant::now();
            match backend
                .transcribe(&dir.path().join("chunk_0000.mp3"))
                .await
                .unwrap_err()
            {
                BackendError::Transient(text) => message = text,
                other => panic!("unexpected error: {other}"),
            }
            assert!(started.elapsed() < Duration::from_secs(4));
            if !message.contains("busy") {
                break;
            }
            tokio::time::sleep(Duration::from_millis(50)).await;
        }
        assert!(message.contains("timed out"), "{message}");
    }
}
