use std::path::Path;
use std::time::Duration;

use async_trait::async_trait;
use reqwest::multipart::{Form, Part};
use reqwest::Client;
use serde::Deserialize;
use tracing::debug;
use url::Url;

use crate::config::CloudBackendSection;
use crate::error::ConfigError;
use crate::pipeline::{TranscriptResult, TranscriptSegment};

use super::{BackendError, BackendResult, TranscriptionBackend};

/// OpenAI-compatible `/audio/transcriptions` endpoint.
#[derive(Debug, Clone)]
pub struct CloudWhisperBackend {
    client: Client,
    endpoint: Url,
    model: String,
    api_key: Option<String>,
}

impl CloudWhisperBackend {
    pub fn new(
        endpoint: &str,
        model: impl Into<String>,
        api_key: Option<String>,
        request_timeout: Duration,
    ) -> Result<Self, ConfigError> {
        let endpoint = Url::parse(endpoint.trim()).map_err(|err| ConfigError::Invalid {
            field: "backend.cloud.endpoint",
            reason: err.to_string(),
        })?;
        let client = Client::builder()
            .user_agent("chunkscribe/0.1")
            .timeout(request_timeout)
            .build()
            .map_err(|err| ConfigError::Invalid {
                field: "backend.cloud",
                reason: err.to_string(),
            })?;
        Ok(Self {
            client,
            endpoint,
            model: model.into(),
            api_key: api_key.filter(|key| !key.trim().is_empty()),
        })
    }

    /// Reads the API key from the environment variable named in config.
    pub fn from_config(section: &CloudBackendSection) -> Result<Self, ConfigError> {
        Self::new(
            &section.endpoint,
            section.model.clone(),
            std::env::var(&section.api_key_env).ok(),
            Duration::from_secs(section.timeout_seconds),
        )
    }
}

#[async_trait]
impl TranscriptionBackend for CloudWhisperBackend {
    fn name(&self) -> &'static str {
        "cloud-whisper"
    }

    async fn transcribe(&self, audio_path: &Path) -> BackendResult<TranscriptResult> {
        let api_key = self
            .api_key
            .as_deref()
            .ok_or_else(|| BackendError::Transient("api key not configured".into()))?;
        let bytes = tokio::fs::read(audio_path).await.map_err(|err| {
            BackendError::Transient(format!("failed to read {}: {err}", audio_path.display()))
        })?;
        let file_name = audio_path
            .file_name()
            .and_then(|name| name.to_str())
            .unwrap_or("audio.mp3")
            .to_string();
        let part = Part::bytes(bytes)
            .file_name(file_name)
            .mime_str("audio/mpeg")
            .map_err(|err| BackendError::Transient(err.to_string()))?;
        let form = Form::new()
            .part("file", part)
            .text("model", self.model.clone())
            .text("response_format", "verbose_json")
            .text("timestamp_granularities[]", "segment");

        let response = self
            .client
            .post(self.endpoint.clone())
            .bearer_auth(api_key)
            .multipart(form)
            .send()
            .await
            .map_err(|err| BackendError::Transient(err.to_string()))?;
        let status = response.status();
        let body = response
            .text()
            .await
            .map_err(|err| BackendError::Transient(err.to_string()))?;
        if !status.is_success() {
            return Err(BackendError::Transient(format!("api error {status}: {body}")));
        }
        debug!(file = %audio_path.display(), bytes = body.len(), "cloud transcription received");
        parse_verbose_json(&body)
    }
}

#[derive(Debug, Deserialize)]
struct VerboseTranscription {
    segments: Vec<VerboseSegment>,
}

#[derive(Debug, Deserialize)]
struct VerboseSegment {
    start: f64,
    end: f64,
    text: String,
}

fn parse_verbose_json(body: &str) -> BackendResult<TranscriptResult> {
    let parsed: VerboseTranscription =
        serde_json::from_str(body).map_err(|err| BackendError::Format(err.to_string()))?;
    let segments = parsed
        .segments
        .into_iter()
        .map(|segment| TranscriptSegment {
            start_seconds: segment.start,
            end_seconds: segment.end,
            text: segment.text.trim().to_string(),
        })
        .collect();
    Ok(TranscriptResult::new(segments))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn verbose_json_maps_segments() {
        let body = r#"{
            "text": " hello there",
            "segments": [
                {"id": 0, "start": 0.0, "end": 1.5, "text": " hello"},
                {"id": 1, "start": 1.5, "end": 2.25, "text": " there"}
            ]
        }"#;
        let result = parse_verbose_json(body).unwrap();
        assert_eq!(result.segments.len(), 2);
        assert_eq!(result.segments[1].start_seconds, 1.5);
        assert_eq!(result.segments[1].text, "there");
    }

    #[test]
    fn body_without_segments_is_a_format_error() {
        let err = parse_verbose_json(r#"{"text": "plain"}"#).unwrap_err();
        assert!(matches!(err, BackendError::Format(_)));
    }

    #[tokio::test]
    async fn missing_key_is_transient() {
        let backend = CloudWhisperBackend::new(
            "http://127.0.0.1:9/v1/audio/transcriptions",
            "whisper-1",
            Some("  ".into()),
            Duration::from_secs(1),
        )
        .unwrap();
        let err = backend
            .transcribe(Path::new("/nonexistent/chunk_0000.mp3"))
            .await
            .unwrap_err();
        assert!(matches!(err, BackendError::Transient(_)));
    }

    #[test]
    fn invalid_endpoint_is_rejected() {
        let err = CloudWhisperBackend::new("not a url", "whisper-1", None, Duration::from_secs(1))
            .unwrap_err();
        assert!(matches!(
            err,
            ConfigError::Invalid {
                field: "backend.cloud.endpoint",
                ..
            }
        ));
    }
}
