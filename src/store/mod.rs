//! Durable per-task state on disk.
//!
//! Layout under the store root:
//!
//! ```text
//! workspaces/<workspace>/tasks/<task-id>/task.json    — the task document
//! workspaces/<workspace>/tasks/<task-id>/task.log     — append-only records
//! workspaces/<workspace>/tasks/<task-id>/artifacts/   — opaque named blobs
//! workspaces/<workspace>/tasks/<task-id>.lock         — per-task lock file
//! ```
//!
//! Documents are written atomically (sibling `.tmp` then rename) so no
//! partial JSON ever lands at the destination. All mutating operations hold
//! the task's exclusive file lock.

pub mod lock;

use std::fs;
use std::io::Write;
use std::path::{Path, PathBuf};

use chrono::Utc;
use tracing::warn;

use crate::error::EngineError;
use crate::task::{Task, SCHEMA_VERSION};

pub use lock::{LockBudget, TaskLock};

/// File mode for task documents, logs, and artifacts
#[cfg(unix)]
const FILE_MODE: u32 = 0o600;

/// Filesystem-backed task store
#[derive(Debug, Clone)]
pub struct TaskStore {
    /// Directory containing `workspaces/`
    root: PathBuf,
    lock_budget: LockBudget,
}

impl TaskStore {
    /// Create a store rooted at `state_root` (e.g., `~/.conductor`)
    pub fn new(state_root: impl Into<PathBuf>) -> Self {
        Self {
            root: state_root.into(),
            lock_budget: LockBudget::default(),
        }
    }

    /// Override the lock-contention retry budget
    pub fn with_lock_budget(mut self, budget: LockBudget) -> Self {
        self.lock_budget = budget;
        self
    }

    fn tasks_dir(&self, workspace: &str) -> PathBuf {
        self.root.join("workspaces").join(workspace).join("tasks")
    }

    fn task_dir(&self, workspace: &str, task_id: &str) -> PathBuf {
        self.tasks_dir(workspace).join(task_id)
    }

    fn lock_path(&self, workspace: &str, task_id: &str) -> PathBuf {
        self.tasks_dir(workspace).join(format!("{task_id}.lock"))
    }

    fn lock(&self, workspace: &str, task_id: &str) -> Result<TaskLock, EngineError> {
        let path = self.lock_path(workspace, task_id);
        if let Some(parent) = path.parent() {
            fs::create_dir_all(parent)?;
        }
        TaskLock::acquire(&path, task_id, self.lock_budget)
    }

    // ── task documents ───────────────────────────────────────────────────

    /// Create a new task directory and write the initial document.
    ///
    /// Fails if the task directory already exists. Sets `schema_version` if
    /// the caller left it unset.
    pub fn create(&self, task: &mut Task) -> Result<(), EngineError> {
        let dir = self.task_dir(&task.workspace_id, &task.id);
        if dir.exists() {
            return Err(EngineError::other(format!(
                "task '{}' already exists",
                task.id
            )));
        }

        if task.schema_version == 0 {
            task.schema_version = SCHEMA_VERSION;
        }

        let _lock = self.lock(&task.workspace_id, &task.id)?;
        fs::create_dir_all(dir.join("artifacts"))?;
        self.write_document(&dir, task)
    }

    /// Read and deserialize a task document
    pub fn get(&self, workspace: &str, task_id: &str) -> Result<Task, EngineError> {
        let path = self.task_dir(workspace, task_id).join("task.json");
        if !path.exists() {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }

        let contents = fs::read_to_string(&path)?;
        serde_json::from_str(&contents).map_err(|e| EngineError::CorruptedState {
            task_id: task_id.to_string(),
            detail: e.to_string(),
        })
    }

    /// Atomically rewrite an existing task document under the task lock.
    ///
    /// Stamps `updated_at` so successive updates are observably monotonic.
    pub fn update(&self, task: &mut Task) -> Result<(), EngineError> {
        let dir = self.task_dir(&task.workspace_id, &task.id);
        if !dir.join("task.json").exists() {
            return Err(EngineError::TaskNotFound(task.id.clone()));
        }

        let _lock = self.lock(&task.workspace_id, &task.id)?;
        task.updated_at = Utc::now();
        self.write_document(&dir, task)
    }

    /// Remove the entire task directory, logs and artifacts included
    pub fn delete(&self, workspace: &str, task_id: &str) -> Result<(), EngineError> {
        let dir = self.task_dir(workspace, task_id);
        if !dir.exists() {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }

        {
            let _lock = self.lock(workspace, task_id)?;
            fs::remove_dir_all(&dir)?;
        }
        // Lock released; drop the lock file too, best-effort
        let _ = fs::remove_file(self.lock_path(workspace, task_id));
        Ok(())
    }

    /// List tasks in a workspace, newest first.
    ///
    /// Corrupted documents are skipped with a warning; `get` still reports
    /// them as `corrupted-state`.
    pub fn list(&self, workspace: &str) -> Result<Vec<Task>, EngineError> {
        let dir = self.tasks_dir(workspace);
        if !dir.exists() {
            return Ok(Vec::new());
        }

        let mut tasks = Vec::new();
        for entry in fs::read_dir(&dir)? {
            let entry = entry?;
            if !entry.file_type()?.is_dir() {
                continue;
            }
            let task_id = entry.file_name().to_string_lossy().to_string();
            match self.get(workspace, &task_id) {
                Ok(task) => tasks.push(task),
                Err(EngineError::CorruptedState { task_id, detail }) => {
                    warn!(task_id = %task_id, detail = %detail, "skipping corrupted task document");
                }
                Err(EngineError::TaskNotFound(_)) => {
                    // Directory without a document (partial create); skip
                }
                Err(e) => return Err(e),
            }
        }

        tasks.sort_by(|a, b| b.created_at.cmp(&a.created_at));
        Ok(tasks)
    }

    // ── logs ─────────────────────────────────────────────────────────────

    /// Append bytes to the task log, ensuring a trailing newline
    pub fn append_log(
        &self,
        workspace: &str,
        task_id: &str,
        bytes: &[u8],
    ) -> Result<(), EngineError> {
        let dir = self.task_dir(workspace, task_id);
        if !dir.exists() {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }

        let _lock = self.lock(workspace, task_id)?;
        let path = dir.join("task.log");
        let mut file = fs::OpenOptions::new()
            .create(true)
            .append(true)
            .open(&path)?;
        set_file_mode(&path)?;

        file.write_all(bytes)?;
        if !bytes.ends_with(b"\n") {
            file.write_all(b"\n")?;
        }
        Ok(())
    }

    // ── artifacts ────────────────────────────────────────────────────────

    /// Write a named artifact atomically.
    ///
    /// Names containing path separators or `..` are rejected.
    pub fn save_artifact(
        &self,
        workspace: &str,
        task_id: &str,
        name: &str,
        bytes: &[u8],
    ) -> Result<(), EngineError> {
        validate_artifact_name(name)?;

        let dir = self.task_dir(workspace, task_id);
        if !dir.exists() {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }

        let _lock = self.lock(workspace, task_id)?;
        let artifacts = dir.join("artifacts");
        fs::create_dir_all(&artifacts)?;
        atomic_write(&artifacts.join(name), bytes)
    }

    /// Write an artifact under a fresh versioned name.
    ///
    /// For `report.json`, picks the smallest unused `N ≥ 1` and stores as
    /// `report.N.json`. Returns the chosen name.
    pub fn save_versioned_artifact(
        &self,
        workspace: &str,
        task_id: &str,
        base_name: &str,
        bytes: &[u8],
    ) -> Result<String, EngineError> {
        validate_artifact_name(base_name)?;

        let dir = self.task_dir(workspace, task_id);
        if !dir.exists() {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }

        let _lock = self.lock(workspace, task_id)?;
        let artifacts = dir.join("artifacts");
        fs::create_dir_all(&artifacts)?;

        let (stem, ext) = match base_name.rsplit_once('.') {
            Some((stem, ext)) if !stem.is_empty() => (stem, Some(ext)),
            _ => (base_name, None),
        };

        let mut n = 1u32;
        let name = loop {
            let candidate = match ext {
                Some(ext) => format!("{stem}.{n}.{ext}"),
                None => format!("{stem}.{n}"),
            };
            if !artifacts.join(&candidate).exists() {
                break candidate;
            }
            n += 1;
        };

        atomic_write(&artifacts.join(&name), bytes)?;
        Ok(name)
    }

    /// Read an artifact's bytes
    pub fn get_artifact(
        &self,
        workspace: &str,
        task_id: &str,
        name: &str,
    ) -> Result<Vec<u8>, EngineError> {
        validate_artifact_name(name)?;

        let path = self.task_dir(workspace, task_id).join("artifacts").join(name);
        if !path.exists() {
            return Err(EngineError::ArtifactNotFound {
                task_id: task_id.to_string(),
                name: name.to_string(),
            });
        }
        Ok(fs::read(&path)?)
    }

    /// List artifact names, sorted lexicographically
    pub fn list_artifacts(
        &self,
        workspace: &str,
        task_id: &str,
    ) -> Result<Vec<String>, EngineError> {
        let dir = self.task_dir(workspace, task_id);
        if !dir.exists() {
            return Err(EngineError::TaskNotFound(task_id.to_string()));
        }

        let artifacts = dir.join("artifacts");
        if !artifacts.exists() {
            return Ok(Vec::new());
        }

        let mut names = Vec::new();
        for entry in fs::read_dir(&artifacts)? {
            let entry = entry?;
            if entry.file_type()?.is_file() {
                names.push(entry.file_name().to_string_lossy().to_string());
            }
        }
        names.sort();
        Ok(names)
    }

    fn write_document(&self, dir: &Path, task: &Task) -> Result<(), EngineError> {
        let mut bytes = serde_json::to_vec_pretty(task)?;
        bytes.push(b'\n');
        atomic_write(&dir.join("task.json"), &bytes)
    }
}

/// Reject artifact names that could escape the artifacts directory
fn validate_artifact_name(name: &str) -> Result<(), EngineError> {
    if name.is_empty() {
        return Err(EngineError::EmptyValue("artifact name".to_string()));
    }
    if name.contains('/') || name.contains('\\') || name.contains("..") {
        return Err(EngineError::PathTraversal(name.to_string()));
    }
    Ok(())
}

/// Write to a sibling `.tmp` file, then rename over the destination.
/// On any error the temporary is removed; no partial file remains.
fn atomic_write(path: &Path, bytes: &[u8]) -> Result<(), EngineError> {
    let tmp_path = path.with_extension("tmp");

    let write = || -> Result<(), EngineError> {
        fs::write(&tmp_path, bytes)?;
        set_file_mode(&tmp_path)?;
        fs::rename(&tmp_path, path)?;
        Ok(())
    };

    write().map_err(|e| {
        let _ = fs::remove_file(&tmp_path);
        e
    })
}

#[cfg(unix)]
fn set_file_mode(path: &Path) -> Result<(), EngineError> {
    use std::os::unix::fs::PermissionsExt;
    let mut perms = fs::metadata(path)?.permissions();
    perms.set_mode(FILE_MODE);
    fs::set_permissions(path, perms)?;
    Ok(())
}

#[cfg(not(unix))]
fn set_file_mode(_path: &Path) -> Result<(), EngineError> {
    Ok(())
}
