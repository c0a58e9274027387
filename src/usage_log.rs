//! Append-only log of customer view events

use std::fs::OpenOptions;
use std::io::{self, Write};
use std::path::{Path, PathBuf};

use chrono::Local;
use tracing::warn;

/// Append-only log of customer views
#[derive(Debug, Clone)]
pub struct UsageLog {
    path: PathBuf,
}

impl UsageLog {
    /// Log writing to `path`; the file is created on first use.
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Append `[timestamp] Viewed: <id>`
    pub fn record_view(&self, customer_id: &str) -> io::Result<()> {
        let mut file = OpenOptions::new()
            .create(true)
            .append(true)
            .open(&self.path)?;
        writeln!(
            file,
            "[{}] Viewed: {}",
            Local::now().format("%Y-%m-%d %H:%M:%S%.6f"),
            customer_id
        )
    }

    /// Like [`record_view`](Self::record_view) but never fails; returns a
    /// warning for display instead.
    pub fn record_view_best_effort(&self, customer_id: &str) -> Option<String> {
        self.record_view(customer_id).err().map(|e| {
            warn!(path = %self.path.display(), error = %e, "Usage logging failed");
            format!("Logging failed: {e}")
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_views_are_appended() {
        let dir = tempfile::tempdir().unwrap();
        let log = UsageLog::new(dir.path().join("usage.log"));

        log.record_view("17850").unwrap();
        log.record_view("13047").unwrap();

        let text = std::fs::read_to_string(log.path()).unwrap();
        let lines: Vec<&str> = text.lines().collect();
        assert_eq!(lines.len(), 2);
        assert!(lines[0].starts_with('['));
        assert!(lines[0].ends_with("Viewed: 17850"));
        assert!(lines[1].ends_with("Viewed: 13047"));
    }

    #[test]
    fn test_failure_becomes_warning() {
        let dir = tempfile::tempdir().unwrap();
        // a directory cannot be opened for appending
        let log = UsageLog::new(dir.path());
        let warning = log.record_view_best_effort("1");
        assert!(warning.unwrap().starts_with("Logging failed"));
    }
}
