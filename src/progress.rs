//! Durable record of how many batches of an input have been committed.

use crate::error::PipelineResult;
use crate::persist;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ProgressRecord {
    pub processed_batches: usize,
    pub total_batches: usize,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub updated_at: Option<DateTime<Utc>>,
}

impl ProgressRecord {
    pub fn is_complete(&self) -> bool {
        self.total_batches > 0 && self.processed_batches >= self.total_batches
    }
}

#[derive(Debug, Clone)]
pub struct ProgressTracker {
    path: PathBuf,
}

impl ProgressTracker {
    pub fn new(path: impl Into<PathBuf>) -> Self {
        Self { path: path.into() }
    }

    /// Tracker for one input file, stored as `.<file name>.progress.json`
    /// under the output location.
    pub fn for_input(output_dir: &Path, input_file_name: &str) -> Self {
        Self::new(output_dir.join(format!(".{}.progress.json", input_file_name)))
    }

    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Current record; `{0, 0}` when absent or unparsable.
    pub fn load(&self) -> ProgressRecord {
        persist::read_json_lenient(&self.path).unwrap_or_default()
    }

    pub fn save(&self, processed_batches: usize, total_batches: usize) -> PipelineResult<()> {
        let record = ProgressRecord {
            processed_batches,
            total_batches,
            updated_at: Some(Utc::now()),
        };
        persist::write_json_atomic(&self.path, &record)
    }

    /// Load the record and bring `total_batches` in line with the current
    /// input, keeping whatever progress was already made.
    pub fn reconcile(&self, total_batches: usize) -> PipelineResult<ProgressRecord> {
        let mut record = self.load();
        if record.total_batches != total_batches {
            info!(
                "Input now has {} batches (was {}), keeping {} processed",
                total_batches, record.total_batches, record.processed_batches
            );
            self.save(record.processed_batches, total_batches)?;
            record.total_batches = total_batches;
        }
        Ok(record)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::fs;
    use tempfile::TempDir;

    #[test]
    fn test_missing_record_is_zero() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::for_input(dir.path(), "term_bank_1.json");
        assert_eq!(tracker.load(), ProgressRecord::default());
        assert_eq!(
            tracker.path(),
            dir.path().join(".term_bank_1.json.progress.json")
        );
    }

    #[test]
    fn test_unparsable_record_is_zero() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new(dir.path().join("progress.json"));
        fs::write(tracker.path(), "processed=3").unwrap();
        assert_eq!(tracker.load(), ProgressRecord::default());
    }

    #[test]
    fn test_save_then_load() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new(dir.path().join("progress.json"));

        tracker.save(2, 5).unwrap();
        let record = tracker.load();
        assert_eq!(record.processed_batches, 2);
        assert_eq!(record.total_batches, 5);
        assert!(record.updated_at.is_some());
        assert!(!record.is_complete());
    }

    #[test]
    fn test_reads_record_without_timestamp() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new(dir.path().join("progress.json"));
        fs::write(
            tracker.path(),
            r#"{"processed_batches": 4, "total_batches": 4}"#,
        )
        .unwrap();

        let record = tracker.load();
        assert!(record.is_complete());
        assert_eq!(record.updated_at, None);
    }

    #[test]
    fn test_reconcile_preserves_processed_batches() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new(dir.path().join("progress.json"));
        tracker.save(3, 10).unwrap();

        let record = tracker.reconcile(12).unwrap();
        assert_eq!(record.processed_batches, 3);
        assert_eq!(record.total_batches, 12);

        let persisted = tracker.load();
        assert_eq!(persisted.processed_batches, 3);
        assert_eq!(persisted.total_batches, 12);
    }

    #[test]
    fn test_reconcile_unchanged_total_does_not_write() {
        let dir = TempDir::new().unwrap();
        let tracker = ProgressTracker::new(dir.path().join("progress.json"));

        let record = tracker.reconcile(0).unwrap();
        assert_eq!(record, ProgressRecord::default());
        assert!(!tracker.path().exists());
    }
}
