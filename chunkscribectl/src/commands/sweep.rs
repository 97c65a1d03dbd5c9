use std::path::PathBuf;

use chunkscribe_core::ExpirationSweeper;
use serde::Serialize;

use crate::{AppContext, DisplayFallback};

#[derive(Debug, Serialize)]
pub(crate) struct SweepSummary {
    root: PathBuf,
    removed: Vec<PathBuf>,
    kept: usize,
    failures: Vec<String>,
}

impl DisplayFallback for SweepSummary {
    fn display(&self) -> String {
        let mut lines = vec![format!(
            "{}: removed {}, kept {}",
            self.root.display(),
            self.removed.len(),
            self.kept
        )];
        lines.extend(
            self.removed
                .iter()
                .map(|dir| format!("  - {}", dir.display())),
        );
        lines.extend(self.failures.iter().map(|failure| format!("  ! {failure}")));
        lines.join("\n")
    }
}

pub(crate) fn execute(context: &AppContext) -> SweepSummary {
    let sweeper = ExpirationSweeper::new(&context.settings.root, context.settings.staleness);
    let report = sweeper.sweep();
    SweepSummary {
        root: sweeper.root().to_path_buf(),
        removed: report.removed,
        kept: report.kept.len(),
        failures: report
            .failures
            .into_iter()
            .map(|(path, error)| format!("{}: {error}", path.display()))
            .collect(),
    }
}
