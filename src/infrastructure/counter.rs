//! Persistent run counter
//!
//! The host owns run numbering. The counter lives in a single file holding
//! the last issued number. Issuing a number holds an exclusive lock on a
//! sibling lock file for the whole read/increment/write, and the write goes
//! through a uniquely named temp file and a rename, so concurrent runs never
//! share a number and a crash never leaves a truncated counter behind.

use crate::pipeline::PipelineError;
use std::fs::{self, File, OpenOptions};
use std::io::Write;
use std::path::{Path, PathBuf};
use tempfile::NamedTempFile;

const COUNTER_FILE: &str = "build-number";
const LOCK_FILE: &str = "build-number.lock";

/// File-backed run number sequence
#[derive(Debug, Clone)]
pub struct RunCounter {
    path: PathBuf,
}

impl RunCounter {
    /// Counter stored under `state_dir`
    pub fn new(state_dir: impl AsRef<Path>) -> Self {
        Self {
            path: state_dir.as_ref().join(COUNTER_FILE),
        }
    }

    /// Location of the counter file
    #[must_use]
    pub fn path(&self) -> &Path {
        &self.path
    }

    /// Last issued number, 0 if none was issued yet
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Counter`] if the file exists but does not
    /// hold a number.
    pub fn current(&self) -> Result<u64, PipelineError> {
        match fs::read_to_string(&self.path) {
            Ok(text) => text.trim().parse().map_err(|_| self.error(format!(
                "expected a number, found '{}'",
                text.trim()
            ))),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(0),
            Err(e) => Err(self.error(e.to_string())),
        }
    }

    /// Issues the next run number and persists it
    ///
    /// # Errors
    ///
    /// Returns [`PipelineError::Counter`] if the counter cannot be read or
    /// written.
    pub fn next(&self) -> Result<u64, PipelineError> {
        let dir = self.dir();
        fs::create_dir_all(dir).map_err(|e| self.error(e.to_string()))?;

        // Released when dropped.
        let lock = self.lock(dir)?;

        let next = self
            .current()?
            .checked_add(1)
            .ok_or_else(|| self.error("counter overflow".to_string()))?;

        let mut tmp = NamedTempFile::new_in(dir).map_err(|e| self.error(e.to_string()))?;
        writeln!(tmp, "{next}").map_err(|e| self.error(e.to_string()))?;
        tmp.persist(&self.path)
            .map_err(|e| self.error(e.error.to_string()))?;
        drop(lock);

        tracing::debug!(run_number = next, path = %self.path.display(), "Issued run number");
        Ok(next)
    }

    fn dir(&self) -> &Path {
        match self.path.parent() {
            Some(dir) if !dir.as_os_str().is_empty() => dir,
            _ => Path::new("."),
        }
    }

    fn lock(&self, dir: &Path) -> Result<File, PipelineError> {
        let file = OpenOptions::new()
            .create(true)
            .truncate(false)
            .write(true)
            .open(dir.join(LOCK_FILE))
            .map_err(|e| self.error(format!("cannot open lock file: {e}")))?;
        file.lock()
            .map_err(|e| self.error(format!("cannot lock counter: {e}")))?;
        Ok(file)
    }

    fn error(&self, reason: String) -> PipelineError {
        PipelineError::Counter {
            path: self.path.display().to_string(),
            reason,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    #[test]
    fn test_counter_starts_at_one() {
        let dir = TempDir::new().unwrap();
        let counter = RunCounter::new(dir.path());

        assert_eq!(counter.current().unwrap(), 0);
        assert_eq!(counter.next().unwrap(), 1);
        assert_eq!(counter.next().unwrap(), 2);
        assert_eq!(counter.current().unwrap(), 2);
    }

    #[test]
    fn test_counter_creates_state_dir() {
        let dir = TempDir::new().unwrap();
        let counter = RunCounter::new(dir.path().join("nested").join(".shipline"));

        assert_eq!(counter.next().unwrap(), 1);
        assert!(counter.path().exists());
    }

    #[test]
    fn test_counter_resumes_from_file() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(COUNTER_FILE), "41\n").unwrap();

        assert_eq!(RunCounter::new(dir.path()).next().unwrap(), 42);
    }

    #[test]
    fn test_concurrent_next_issues_unique_numbers() {
        let dir = TempDir::new().unwrap();
        let state = dir.path().to_path_buf();

        let handles: Vec<_> = (0..16)
            .map(|_| {
                let state = state.clone();
                std::thread::spawn(move || RunCounter::new(&state).next())
            })
            .collect();
        let mut issued: Vec<u64> = handles
            .into_iter()
            .map(|h| h.join().unwrap().unwrap())
            .collect();
        issued.sort_unstable();

        assert_eq!(issued, (1..=16).collect::<Vec<_>>());
        assert_eq!(RunCounter::new(&state).current().unwrap(), 16);
    }

    #[test]
    fn test_counter_rejects_garbage() {
        let dir = TempDir::new().unwrap();
        fs::write(dir.path().join(COUNTER_FILE), "forty-two").unwrap();

        let err = RunCounter::new(dir.path()).next().unwrap_err();
        assert!(matches!(err, PipelineError::Counter { .. }));
        assert!(err.to_string().contains("forty-two"));
    }
}
