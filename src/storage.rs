//! Where finished records go.

use std::fs;
use std::path::{Path, PathBuf};

use thiserror::Error;

use crate::analyzer::FileFailure;
use crate::record::ProcessingRecord;

#[derive(Error, Debug)]
pub enum StorageError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
    #[error("Database error: {0}")]
    Db(#[from] crate::db::DbError),
}

/// Receives each record once, after the file finished.
pub trait RecordSink {
    fn store(&mut self, record: &ProcessingRecord, sources: &[PathBuf]) -> Result<(), StorageError>;

    /// File-level failures. Ignored unless the sink keeps them.
    fn store_failure(&mut self, _failure: &FileFailure) -> Result<(), StorageError> {
        Ok(())
    }
}

/// Directory tree of `<root>/<dataset_id>/<file_id>/processing_results.json`
/// with copies of the source files next to each result.
pub struct JsonArchive {
    root: PathBuf,
}

pub const RESULTS_FILE: &str = "processing_results.json";

impl JsonArchive {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    pub fn record_dir(&self, dataset_id: &str, file_id: &str) -> PathBuf {
        self.root.join(dataset_id).join(file_id)
    }

    pub fn load(&self, dataset_id: &str, file_id: &str) -> Result<ProcessingRecord, StorageError> {
        let text = fs::read_to_string(self.record_dir(dataset_id, file_id).join(RESULTS_FILE))?;
        Ok(ProcessingRecord::from_json(&text)?)
    }
}

impl RecordSink for JsonArchive {
    fn store(&mut self, record: &ProcessingRecord, sources: &[PathBuf]) -> Result<(), StorageError> {
        let dir = self.record_dir(record.dataset_id(), record.file_id());
        fs::create_dir_all(&dir)?;

        // Readers never see a partially written result.
        let tmp = dir.join(format!("{RESULTS_FILE}.tmp"));
        fs::write(&tmp, record.to_json()?)?;
        fs::rename(&tmp, dir.join(RESULTS_FILE))?;

        for src in sources {
            if let Some(name) = src.file_name() {
                copy_if_changed(src, &dir.join(name))?;
            }
        }
        log::debug!("Archived {} to {}", record.file_id(), dir.display());
        Ok(())
    }
}

fn copy_if_changed(src: &Path, dst: &Path) -> std::io::Result<()> {
    if let (Ok(a), Ok(b)) = (fs::metadata(src), fs::metadata(dst)) {
        if a.len() == b.len() && a.modified().ok() <= b.modified().ok() {
            return Ok(());
        }
    }
    fs::copy(src, dst).map(|_| ())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::analyzer::tests::sample_record;

    #[test]
    fn test_archive_layout_and_reload() {
        let tmp = tempfile::tempdir().unwrap();
        let src = tmp.path().join("sub-01_task-rest_ieeg.tsv");
        fs::write(&src, "A\tB\n").unwrap();

        let record = sample_record();
        let mut archive = JsonArchive::new(tmp.path().join("out"));
        archive.store(&record, &[src]).unwrap();

        let dir = archive.record_dir(record.dataset_id(), record.file_id());
        assert!(dir.join(RESULTS_FILE).is_file());
        assert!(dir.join("sub-01_task-rest_ieeg.tsv").is_file());
        assert!(!dir.join(format!("{RESULTS_FILE}.tmp")).exists());

        let back = archive.load(record.dataset_id(), record.file_id()).unwrap();
        assert_eq!(back.spectral().keys().collect::<Vec<_>>(), record.spectral().keys().collect::<Vec<_>>());
        assert_eq!(back.parameters(), record.parameters());
    }

    #[test]
    fn test_archive_overwrites_previous_result() {
        let tmp = tempfile::tempdir().unwrap();
        let record = sample_record();
        let mut archive = JsonArchive::new(tmp.path());
        archive.store(&record, &[]).unwrap();
        archive.store(&record, &[]).unwrap();
        assert!(archive.load(record.dataset_id(), record.file_id()).is_ok());
    }
}
