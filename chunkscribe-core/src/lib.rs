pub mod backend;
pub mod config;
pub mod error;
pub mod media;
pub mod pipeline;
pub mod store;
pub mod subtitle;

pub use backend::{
    backend_from_config, BackendError, BackendResult, CloudWhisperBackend, TranscriptionBackend,
    WhisperCppBackend,
};
pub use config::{
    load_config, BackendKind, BackendSection, ChunkscribeConfig, CloudBackendSection,
    LimiterSection, MediaSection, PathsSection, PipelineSection, PipelineSettings,
    WhisperCppSection,
};
pub use error::{ConfigError, Result};
pub use media::{FfmpegToolkit, MediaError, MediaProbe, MediaResult, MediaToolkit};
pub use pipeline::{
    read_state, work_dir_for, ChannelProgressSink, Chunk, ChunkPlan, ChunkPlanner, ChunkTranscriber,
    ConcurrencyLimiter, ExpirationSweeper, LimiterClosed, LimiterPermit, PipelineError,
    PipelinePhase, PipelineResult, PipelineState, ProgressEvent, ProgressResult, ProgressSink,
    ProgressStatus, RebuildReason, SourceFingerprint, SweepReport, TracingProgressSink,
    TranscribeError, TranscribeResult, TranscriptResult, TranscriptSegment,
    TranscriptionOrchestrator, STATE_FILE_NAME,
};
pub use store::{JsonStore, JsonStoreBuilder, StoreError, StoreResult, Validate};
pub use subtitle::{assemble, format_timestamp, subtitle_path_for, to_srt, write_srt, SubtitleLine};
