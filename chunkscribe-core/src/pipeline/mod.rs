//! Chunked, resumable transcription of long media files.
//!
//! A run splits its source into fixed-length audio chunks, records them in
//! `info.json` inside a per-file work directory and transcribes every chunk
//! that has no result yet. Finished chunks survive failures and cancellation,
//! so the next run only sends the remainder to the backend.

mod error;
mod limiter;
mod models;
mod orchestrator;
mod planner;
mod progress;
mod sweeper;
mod transcriber;

pub use error::{PipelineError, PipelineResult, TranscribeError, TranscribeResult};
pub use limiter::{ConcurrencyLimiter, LimiterClosed, LimiterPermit};
pub use models::{
    Chunk, PipelinePhase, PipelineState, SourceFingerprint, TranscriptResult, TranscriptSegment,
};
pub use orchestrator::{read_state, work_dir_for, TranscriptionOrchestrator};
pub use planner::{ChunkPlan, ChunkPlanner, RebuildReason};
pub use progress::{
    ChannelProgressSink, ProgressEvent, ProgressResult, ProgressSink, ProgressStatus,
    TracingProgressSink,
};
pub use sweeper::{ExpirationSweeper, SweepReport};
pub use transcriber::ChunkTranscriber;

/// Name of the state document inside every work directory.
pub const STATE_FILE_NAME: &str = "info.json";
