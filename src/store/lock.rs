//! Exclusive per-task file locking.
//!
//! Every mutating store operation holds an exclusive, non-blocking OS-level
//! lock on a per-task lock file: advisory `flock` on POSIX and a
//! `LockFileEx`-equivalent range lock on Windows, both behind the same
//! `fs2::FileExt` interface. Contention is retried on a constant backoff up to
//! a bounded budget, then fails with the `locked` kind. The lock is released
//! on every exit path via `Drop`.

use std::fs::{File, OpenOptions};
use std::path::{Path, PathBuf};
use std::time::Duration;

use backon::{BlockingRetryable, ConstantBuilder};
use fs2::FileExt;
use tracing::debug;

use crate::error::EngineError;

/// Retry budget for lock contention
#[derive(Debug, Clone, Copy)]
pub struct LockBudget {
    /// How many times to retry after the initial attempt
    pub max_retries: usize,
    /// Delay between attempts
    pub retry_delay: Duration,
}

impl Default for LockBudget {
    fn default() -> Self {
        Self {
            max_retries: 20,
            retry_delay: Duration::from_millis(50),
        }
    }
}

/// An exclusively held task lock; released when dropped
#[derive(Debug)]
pub struct TaskLock {
    file: File,
    path: PathBuf,
}

impl TaskLock {
    /// Acquire the lock at `path`, retrying on contention within `budget`.
    ///
    /// `task_id` only labels the `locked` error.
    pub fn acquire(path: &Path, task_id: &str, budget: LockBudget) -> Result<Self, EngineError> {
        let attempt = || Self::try_acquire(path, task_id);

        attempt
            .retry(
                ConstantBuilder::default()
                    .with_delay(budget.retry_delay)
                    .with_max_times(budget.max_retries),
            )
            .when(EngineError::is_locked)
            .notify(|_, dur: Duration| {
                debug!(task_id, ?dur, "task lock contended, retrying");
            })
            .call()
    }

    fn try_acquire(path: &Path, task_id: &str) -> Result<Self, EngineError> {
        // Avoid truncating: another process may hold the lock right now
        let file = OpenOptions::new()
            .write(true)
            .create(true)
            .truncate(false)
            .open(path)?;

        file.try_lock_exclusive()
            .map_err(|_| EngineError::Locked(task_id.to_string()))?;

        Ok(Self {
            file,
            path: path.to_path_buf(),
        })
    }

    /// Path of the underlying lock file
    pub fn path(&self) -> &Path {
        &self.path
    }
}

impl Drop for TaskLock {
    fn drop(&mut self) {
        let _ = fs2::FileExt::unlock(&self.file);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn tight_budget() -> LockBudget {
        LockBudget {
            max_retries: 2,
            retry_delay: Duration::from_millis(5),
        }
    }

    #[test]
    fn test_acquire_and_release() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("task-20250101-120000.lock");

        let lock = TaskLock::acquire(&path, "task-20250101-120000", tight_budget()).unwrap();
        assert!(path.exists());
        drop(lock);

        // Re-acquirable after release
        let again = TaskLock::acquire(&path, "task-20250101-120000", tight_budget());
        assert!(again.is_ok());
    }

    #[test]
    fn test_contention_fails_locked() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("task-20250101-120000.lock");

        let _held = TaskLock::acquire(&path, "task-20250101-120000", tight_budget()).unwrap();

        // fs2 locks are per-file-handle, so a second open handle contends
        let err = TaskLock::acquire(&path, "task-20250101-120000", tight_budget()).unwrap_err();
        assert!(matches!(err, EngineError::Locked(id) if id == "task-20250101-120000"));
    }

    #[test]
    fn test_waits_out_brief_contention() {
        let dir = TempDir::new().unwrap();
        let path = dir.path().join("task-20250101-120000.lock");
        let held = TaskLock::acquire(&path, "task-20250101-120000", tight_budget()).unwrap();

        let path_clone = path.clone();
        let handle = std::thread::spawn(move || {
            TaskLock::acquire(
                &path_clone,
                "task-20250101-120000",
                LockBudget {
                    max_retries: 100,
                    retry_delay: Duration::from_millis(10),
                },
            )
        });

        std::thread::sleep(Duration::from_millis(50));
        drop(held);

        assert!(handle.join().unwrap().is_ok());
    }
}
