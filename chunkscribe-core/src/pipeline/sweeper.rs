use std::collections::HashSet;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde_json::Value;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};
use walkdir::WalkDir;

use super::STATE_FILE_NAME;

#[derive(Debug, Default, Clone, PartialEq)]
pub struct SweepReport {
    pub removed: Vec<PathBuf>,
    pub kept: Vec<PathBuf>,
    pub failures: Vec<(PathBuf, String)>,
}

/// Deletes work directories whose state document is missing, unreadable or
/// older than the staleness window.
#[derive(Debug, Clone)]
pub struct ExpirationSweeper {
    root: PathBuf,
    staleness: Duration,
}

impl ExpirationSweeper {
    pub fn new(root: impl Into<PathBuf>, staleness: Duration) -> Self {
        Self {
            root: root.into(),
            staleness,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    pub fn sweep(&self) -> SweepReport {
        self.sweep_at(Utc::now())
    }

    pub fn sweep_at(&self, now: DateTime<Utc>) -> SweepReport {
        self.sweep_skipping(now, &HashSet::new())
    }

    /// Like [`sweep_at`](Self::sweep_at), leaving the directories in `active` alone.
    pub fn sweep_skipping(&self, now: DateTime<Utc>, active: &HashSet<PathBuf>) -> SweepReport {
        let mut report = SweepReport::default();
        if !self.root.is_dir() {
            return report;
        }
        let walker = WalkDir::new(&self.root).min_depth(1).max_depth(1);
        for entry in walker {
            let entry = match entry {
                Ok(entry) => entry,
                Err(err) => {
                    let path = err.path().unwrap_or(self.root.as_path()).to_path_buf();
                    warn!(path = %path.display(), error = %err, "cannot inspect work directory");
                    report.failures.push((path, err.to_string()));
                    continue;
                }
            };
            if !entry.file_type().is_dir() {
                continue;
            }
            let dir = entry.into_path();
            if active.contains(&dir) {
                report.kept.push(dir);
                continue;
            }
            match self.expiry_reason(&dir, now) {
                None => report.kept.push(dir),
                Some(reason) => match std::fs::remove_dir_all(&dir) {
                    Ok(()) => {
                        info!(dir = %dir.display(), reason = %reason, "removed expired work directory");
                        report.removed.push(dir);
                    }
                    Err(err) => {
                        warn!(dir = %dir.display(), error = %err, "failed to remove work directory");
                        report.failures.push((dir, err.to_string()));
                    }
                },
            }
        }
        debug!(
            root = %self.root.display(),
            removed = report.removed.len(),
            kept = report.kept.len(),
            failures = report.failures.len(),
            "sweep finished"
        );
        report
    }

    /// Runs a sweep on the blocking pool without waiting for it.
    pub fn spawn(&self, active: HashSet<PathBuf>) -> JoinHandle<SweepReport> {
        let sweeper = self.clone();
        tokio::task::spawn_blocking(move || sweeper.sweep_skipping(Utc::now(), &active))
    }

    fn expiry_reason(&self, dir: &Path, now: DateTime<Utc>) -> Option<String> {
        let raw = match std::fs::read_to_string(dir.join(STATE_FILE_NAME)) {
            Ok(raw) => raw,
            Err(err) => return Some(format!("state unreadable: {err}")),
        };
        let document: Value = match serde_json::from_str(&raw) {
            Ok(document) => document,
            Err(err) => return Some(format!("state unparsable: {err}")),
        };
        let Some(last_updated) = document.get("lastUpdated").and_then(Value::as_f64) else {
            return Some("lastUpdated missing".into());
        };
        let age_ms = now.timestamp_millis() as f64 - last_updated;
        if age_ms > self.staleness.as_millis() as f64 {
            Some(format!("idle for {}s", (age_ms / 1000.0) as i64))
        } else {
            None
        }
    }
}
