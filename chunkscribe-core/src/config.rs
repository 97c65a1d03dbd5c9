use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::de::DeserializeOwned;
use serde::Deserialize;

use crate::error::{ConfigError, Result};

#[derive(Debug, Clone, Deserialize)]
#[serde(rename_all = "snake_case")]
pub struct ChunkscribeConfig {
    pub paths: PathsSection,
    pub pipeline: PipelineSection,
    pub limiter: LimiterSection,
    pub media: MediaSection,
    pub backend: BackendSection,
}

impl ChunkscribeConfig {
    /// Work directories live under `<temp_root>/<pipeline.name>`.
    pub fn pipeline_root(&self) -> PathBuf {
        Path::new(&self.paths.temp_root).join(&self.pipeline.name)
    }

    pub fn validate(&self) -> Result<()> {
        if self.pipeline.segment_seconds == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.segment_seconds",
                reason: "must be greater than zero".into(),
            });
        }
        if self.pipeline.max_attempts == 0 {
            return Err(ConfigError::Invalid {
                field: "pipeline.max_attempts",
                reason: "must be greater than zero".into(),
            });
        }
        if self.limiter.max_concurrent == 0 {
            return Err(ConfigError::Invalid {
                field: "limiter.max_concurrent",
                reason: "must be greater than zero".into(),
            });
        }
        match self.backend.kind {
            BackendKind::Cloud if self.backend.cloud.is_none() => Err(ConfigError::Invalid {
                field: "backend.cloud",
                reason: "section required when kind = \"cloud\"".into(),
            }),
            BackendKind::WhisperCpp if self.backend.whisper_cpp.is_none() => {
                Err(ConfigError::Invalid {
                    field: "backend.whisper_cpp",
                    reason: "section required when kind = \"whisper_cpp\"".into(),
                })
            }
            _ => Ok(()),
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct PathsSection {
    pub temp_root: String,
}

#[derive(Debug, Clone, Deserialize)]
pub struct PipelineSection {
    #[serde(default = "default_pipeline_name")]
    pub name: String,
    #[serde(default = "default_segment_seconds")]
    pub segment_seconds: u32,
    #[serde(default = "default_staleness_hours")]
    pub staleness_hours: u64,
    #[serde(default = "default_max_attempts")]
    pub max_attempts: u32,
}

#[derive(Debug, Clone, Deserialize)]
pub struct LimiterSection {
    #[serde(default = "default_limiter_name")]
    pub name: String,
    pub max_concurrent: usize,
}

#[derive(Debug, Clone, Deserialize)]
pub struct MediaSection {
    pub ffmpeg_binary: String,
    pub ffprobe_binary: String,
    pub probe_timeout_seconds: u64,
    pub split_timeout_seconds: u64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum BackendKind {
    Cloud,
    WhisperCpp,
}

#[derive(Debug, Clone, Deserialize)]
pub struct BackendSection {
    pub kind: BackendKind,
    pub cloud: Option<CloudBackendSection>,
    pub whisper_cpp: Option<WhisperCppSection>,
}

#[derive(Debug, Clone, Deserialize)]
pub struct CloudBackendSection {
    pub endpoint: String,
    pub model: String,
    pub api_key_env: String,
    pub timeout_seconds: u64,
}

#[derive(Debug, Clone, Deserialize)]
pub struct WhisperCppSection {
    pub executable: String,
    pub model_path: String,
    pub language: Option<String>,
    #[serde(default = "default_whisper_cpp_timeout_seconds")]
    pub timeout_seconds: u64,
}

fn default_pipeline_name() -> String {
    "whisper".into()
}

fn default_whisper_cpp_timeout_seconds() -> u64 {
    600
}

fn default_segment_seconds() -> u32 {
    60
}

fn default_staleness_hours() -> u64 {
    3
}

fn default_max_attempts() -> u32 {
    3
}

fn default_limiter_name() -> String {
    "whisper".into()
}

/// Runtime knobs of the pipeline, detached from the TOML layout.
#[derive(Debug, Clone)]
pub struct PipelineSettings {
    pub root: PathBuf,
    pub segment_seconds: u32,
    pub staleness: Duration,
    pub max_attempts: u32,
}

impl PipelineSettings {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self {
            root: root.into(),
            segment_seconds: default_segment_seconds(),
            staleness: Duration::from_secs(default_staleness_hours() * 60 * 60),
            max_attempts: default_max_attempts(),
        }
    }
}

impl From<&ChunkscribeConfig> for PipelineSettings {
    fn from(config: &ChunkscribeConfig) -> Self {
        Self {
            root: config.pipeline_root(),
            segment_seconds: config.pipeline.segment_seconds,
            staleness: Duration::from_secs(config.pipeline.staleness_hours * 60 * 60),
            max_attempts: config.pipeline.max_attempts,
        }
    }
}

pub fn load_config<P: AsRef<Path>>(path: P) -> Result<ChunkscribeConfig> {
    let config: ChunkscribeConfig = load_toml(path)?;
    config.validate()?;
    Ok(config)
}

fn load_toml<T, P>(path: P) -> Result<T>
where
    T: DeserializeOwned,
    P: AsRef<Path>,
{
    let path = path.as_ref();
    let content = std::fs::read_to_string(path).map_err(|source| ConfigError::Io {
        source,
        path: path.to_path_buf(),
    })?;
    toml::from_str(&content).map_err(|source| ConfigError::Parse {
        source,
        path: path.to_path_buf(),
    })
}
