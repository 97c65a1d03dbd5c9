use std::path::PathBuf;
use std::sync::atomic::{AtomicU8, Ordering};
use std::sync::Arc;

use serde::Serialize;
use tokio::sync::mpsc;
use tracing::info;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum ProgressStatus {
    Init,
    Processing,
    Completed,
    Cancelled,
    Failed,
}

impl ProgressStatus {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProgressStatus::Init => "init",
            ProgressStatus::Processing => "processing",
            ProgressStatus::Completed => "completed",
            ProgressStatus::Cancelled => "cancelled",
            ProgressStatus::Failed => "failed",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(untagged)]
pub enum ProgressResult {
    Subtitle { srt_path: PathBuf },
    Message { message: String },
}

#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(rename_all = "camelCase")]
pub struct ProgressEvent {
    pub file_id: String,
    pub status: ProgressStatus,
    /// Percent in `0..=100`.
    pub progress: u8,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub result: Option<ProgressResult>,
}

pub trait ProgressSink: Send + Sync {
    fn report(&self, event: ProgressEvent);
}

/// Logs every event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingProgressSink;

impl ProgressSink for TracingProgressSink {
    fn report(&self, event: ProgressEvent) {
        info!(
            file_id = %event.file_id,
            status = event.status.as_str(),
            progress = event.progress,
            "transcription progress"
        );
    }
}

/// Forwards events to a channel; sends after the receiver is gone are dropped.
#[derive(Debug, Clone)]
pub struct ChannelProgressSink {
    sender: mpsc::UnboundedSender<ProgressEvent>,
}

impl ChannelProgressSink {
    pub fn channel() -> (Self, mpsc::UnboundedReceiver<ProgressEvent>) {
        let (sender, receiver) = mpsc::unbounded_channel();
        (Self { sender }, receiver)
    }
}

impl ProgressSink for ChannelProgressSink {
    fn report(&self, event: ProgressEvent) {
        let _ = self.sender.send(event);
    }
}

/// Per-run reporter that keeps `processing` percentages from going backwards.
pub(crate) struct ProgressTracker {
    file_id: String,
    sink: Arc<dyn ProgressSink>,
    high_water: AtomicU8,
}

impl ProgressTracker {
    pub(crate) fn new(file_id: impl Into<String>, sink: Arc<dyn ProgressSink>) -> Self {
        Self {
            file_id: file_id.into(),
            sink,
            high_water: AtomicU8::new(0),
        }
    }

    pub(crate) fn init(&self) {
        self.emit(ProgressStatus::Init, 0, None);
    }

    pub(crate) fn processing(&self, progress: u8) {
        let progress = progress.min(100);
        let previous = self.high_water.fetch_max(progress, Ordering::SeqCst);
        self.emit(ProgressStatus::Processing, previous.max(progress), None);
    }

    pub(crate) fn completed(&self, srt_path: PathBuf) {
        self.high_water.store(100, Ordering::SeqCst);
        self.emit(
            ProgressStatus::Completed,
            100,
            Some(ProgressResult::Subtitle { srt_path }),
        );
    }

    pub(crate) fn cancelled(&self, message: impl Into<String>) {
        self.emit(
            ProgressStatus::Cancelled,
            0,
            Some(ProgressResult::Message {
                message: message.into(),
            }),
        );
    }

    pub(crate) fn failed(&self, message: impl Into<String>) {
        self.emit(
            ProgressStatus::Failed,
            0,
            Some(ProgressResult::Message {
                message: message.into(),
            }),
        );
    }

    fn emit(&self, status: ProgressStatus, progress: u8, result: Option<ProgressResult>) {
        self.sink.report(ProgressEvent {
            file_id: self.file_id.clone(),
            status,
            progress,
            result,
        });
    }
}

/// Maps `done` of `total` chunks onto the 40..=100 transcription band.
pub(crate) fn transcription_progress(done: usize, total: usize) -> u8 {
    if total == 0 {
        return 100;
    }
    let fraction = done.min(total) as f64 / total as f64;
    (40.0 + fraction * 60.0).round() as u8
}
