use std::collections::HashSet;
use std::path::PathBuf;
use std::sync::Arc;
use std::time::Duration;

use chunkscribe_core::{
    backend_from_config, ConcurrencyLimiter, FfmpegToolkit, PipelineResult, TracingProgressSink,
    TranscriptionOrchestrator,
};
use clap::Args;
use serde::Serialize;
use tracing::{info, warn};

use crate::{AppContext, DisplayFallback, Result};

#[derive(Args, Debug)]
pub struct TranscribeArgs {
    /// Media files to transcribe
    #[arg(required = true)]
    pub files: Vec<PathBuf>,
    /// Overrides limiter.max_concurrent
    #[arg(long)]
    pub max_concurrent: Option<usize>,
    /// Seconds to wait before retrying a failed chunk
    #[arg(long, default_value_t = 0)]
    pub retry_delay: u64,
    /// Fail instead of resetting a corrupt info.json
    #[arg(long, default_value_t = false)]
    pub no_repair: bool,
}

#[derive(Debug, Serialize)]
pub(crate) struct TranscribeReport {
    pub(crate) files: Vec<FileOutcome>,
}

impl TranscribeReport {
    pub(crate) fn failed(&self) -> usize {
        self.files
            .iter()
            .filter(|file| file.status != "completed")
            .count()
    }
}

#[derive(Debug, Serialize)]
pub(crate) struct FileOutcome {
    source: PathBuf,
    status: &'static str,
    #[serde(skip_serializing_if = "Option::is_none")]
    subtitle: Option<PathBuf>,
    #[serde(skip_serializing_if = "Option::is_none")]
    error: Option<String>,
}

impl FileOutcome {
    fn new(source: PathBuf, outcome: PipelineResult<PathBuf>) -> Self {
        match outcome {
            Ok(subtitle) => Self {
                source,
                status: "completed",
                subtitle: Some(subtitle),
                error: None,
            },
            Err(err) => Self {
                source,
                status: if err.is_cancelled() {
                    "cancelled"
                } else {
                    "failed"
                },
                subtitle: None,
                error: Some(err.to_string()),
            },
        }
    }
}

impl DisplayFallback for TranscribeReport {
    fn display(&self) -> String {
        let mut lines = Vec::new();
        for file in &self.files {
            let detail = match (&file.subtitle, &file.error) {
                (Some(subtitle), _) => subtitle.display().to_string(),
                (None, Some(error)) => error.clone(),
                (None, None) => "-".to_string(),
            };
            lines.push(format!(
                "{} | {} | {}",
                file.source.display(),
                file.status,
                detail
            ));
        }
        lines.join("\n")
    }
}

pub(crate) fn execute(context: &AppContext, args: &TranscribeArgs) -> Result<TranscribeReport> {
    let mut seen = HashSet::new();
    let mut sources = Vec::new();
    for file in &args.files {
        let source = file.canonicalize()?;
        if seen.insert(source.clone()) {
            sources.push(source);
        }
    }

    let media = Arc::new(FfmpegToolkit::new(&context.config.media));
    let backend = backend_from_config(&context.config.backend)?;
    let limiter = ConcurrencyLimiter::new(
        context.config.limiter.name.clone(),
        args.max_concurrent
            .unwrap_or(context.config.limiter.max_concurrent),
    );
    info!(
        limiter = limiter.name(),
        capacity = limiter.capacity(),
        backend = backend.name(),
        files = sources.len(),
        "starting transcription"
    );
    let orchestrator = Arc::new(
        TranscriptionOrchestrator::new(context.settings.clone(), media, backend, limiter)
            .with_progress_sink(Arc::new(TracingProgressSink))
            .with_auto_repair(!args.no_repair)
            .with_retry_delay(Duration::from_secs(args.retry_delay)),
    );

    let runtime = tokio::runtime::Builder::new_multi_thread()
        .enable_all()
        .build()?;
    runtime.block_on(transcribe_all(orchestrator, sources))
}

async fn transcribe_all(
    orchestrator: Arc<TranscriptionOrchestrator>,
    sources: Vec<PathBuf>,
) -> Result<TranscribeReport> {
    let ids: Vec<String> = sources
        .iter()
        .map(|source| source.display().to_string())
        .collect();

    let interrupt = {
        let orchestrator = Arc::clone(&orchestrator);
        let ids = ids.clone();
        tokio::spawn(async move {
            if tokio::signal::ctrl_c().await.is_ok() {
                warn!("interrupt received, cancelling running transcriptions");
                for id in &ids {
                    orchestrator.cancel(id);
                }
            }
        })
    };

    let handles: Vec<_> = sources
        .into_iter()
        .zip(ids)
        .map(|(source, id)| {
            let orchestrator = Arc::clone(&orchestrator);
            tokio::spawn(async move {
                let outcome = orchestrator.run(&id, &source).await;
                (source, outcome)
            })
        })
        .collect();

    let mut files = Vec::with_capacity(handles.len());
    for handle in handles {
        let (source, outcome) = handle
            .await
            .map_err(|err| std::io::Error::new(std::io::ErrorKind::Other, err))?;
        files.push(FileOutcome::new(source, outcome));
    }
    interrupt.abort();
    Ok(TranscribeReport { files })
}
