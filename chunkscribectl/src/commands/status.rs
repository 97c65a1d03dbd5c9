use std::path::PathBuf;

use chrono::{DateTime, Utc};
use chunkscribe_core::{read_state, work_dir_for};
use clap::Args;
use serde::Serialize;

use crate::{AppContext, DisplayFallback, Result};

#[derive(Args, Debug)]
pub struct StatusArgs {
    /// Source media file
    pub file: PathBuf,
}

#[derive(Debug, Serialize)]
pub(crate) struct StatusReport {
    source: PathBuf,
    work_dir: PathBuf,
    phase: Option<&'static str>,
    chunks: usize,
    transcribed: usize,
    last_updated: Option<DateTime<Utc>>,
    stale: bool,
}

impl DisplayFallback for StatusReport {
    fn display(&self) -> String {
        let Some(phase) = self.phase else {
            return format!("No state recorded for {}", self.source.display());
        };
        let mut lines = vec![
            format!("Source: {}", self.source.display()),
            format!("Work dir: {}", self.work_dir.display()),
            format!("Phase: {phase}"),
            format!("Chunks: {}/{} transcribed", self.transcribed, self.chunks),
        ];
        if let Some(updated) = self.last_updated {
            let suffix = if self.stale { " (stale)" } else { "" };
            lines.push(format!("Updated: {}{suffix}", updated.to_rfc3339()));
        }
        lines.join("\n")
    }
}

pub(crate) fn execute(context: &AppContext, args: &StatusArgs) -> Result<StatusReport> {
    let source = args
        .file
        .canonicalize()
        .unwrap_or_else(|_| args.file.clone());
    let work_dir = work_dir_for(&context.settings.root, &source);
    let state = read_state(&context.settings.root, &source)?;
    Ok(match state {
        Some(state) => StatusReport {
            phase: Some(state.phase.as_str()),
            chunks: state.chunks.len(),
            transcribed: state.transcribed_count(),
            last_updated: state.last_updated_at(),
            stale: state.is_stale(Utc::now(), context.settings.staleness),
            source,
            work_dir,
        },
        None => StatusReport {
            source,
            work_dir,
            phase: None,
            chunks: 0,
            transcribed: 0,
            last_updated: None,
            stale: false,
        },
    })
}
