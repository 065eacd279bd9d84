//! Plain-text log of units that could not be fetched.

use std::{
    io::Write,
    path::{Path, PathBuf},
    sync::Arc,
};

use tracing::info;

use crate::{
    error::{DispatchError, Result},
    unit::WorkUnit,
};

/// Writes the URL of every failed unit to a log file, one per line.
#[derive(Debug, Clone)]
pub struct FailureReporter {
    log_path: PathBuf,
}

impl FailureReporter {
    /// Creates a reporter writing to `log_path`.
    pub fn new(log_path: impl Into<PathBuf>) -> Self {
        Self { log_path: log_path.into() }
    }

    /// Destination file.
    pub fn log_path(&self) -> &Path {
        &self.log_path
    }

    /// Writes the report and returns the number of lines written.
    ///
    /// The file is created or truncated. No file is touched when `failed` is
    /// empty.
    ///
    /// # Errors
    ///
    /// Returns `DispatchError::StorageError` if the file cannot be written.
    pub fn report(&self, failed: &[Arc<WorkUnit>]) -> Result<usize> {
        if failed.is_empty() {
            return Ok(0);
        }

        let mut contents = Vec::new();
        for unit in failed {
            writeln!(contents, "{}", unit.url()).map_err(|e| self.storage_error(&e))?;
        }
        std::fs::write(&self.log_path, contents).map_err(|e| self.storage_error(&e))?;

        info!(path = %self.log_path.display(), failed = failed.len(), "failure report written");
        Ok(failed.len())
    }

    fn storage_error(&self, error: &std::io::Error) -> DispatchError {
        DispatchError::storage(self.log_path.clone(), error.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn writes_one_url_per_line() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = FailureReporter::new(dir.path().join("failed_request.txt"));

        let failed = vec![
            Arc::new(WorkUnit::page("https://dict.example/run_1", |_| {}).unwrap()),
            Arc::new(WorkUnit::download("https://audio.example/uk/run.mp3", dir.path()).unwrap()),
        ];

        assert_eq!(reporter.report(&failed).unwrap(), 2);

        let written = std::fs::read_to_string(reporter.log_path()).unwrap();
        assert_eq!(written, "https://dict.example/run_1\nhttps://audio.example/uk/run.mp3\n");
    }

    #[test]
    fn nothing_failed_writes_nothing() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = FailureReporter::new(dir.path().join("failed_request.txt"));

        assert_eq!(reporter.report(&[]).unwrap(), 0);
        assert!(!reporter.log_path().exists());
    }

    #[test]
    fn unwritable_destination_is_storage_error() {
        let dir = tempfile::tempdir().unwrap();
        let reporter = FailureReporter::new(dir.path().join("missing").join("failed.txt"));
        let failed = vec![Arc::new(WorkUnit::page("https://dict.example/run_1", |_| {}).unwrap())];

        assert!(matches!(reporter.report(&failed), Err(DispatchError::StorageError { .. })));
    }
}
