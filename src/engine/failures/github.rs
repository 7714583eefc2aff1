//! GitHub-failure recovery.
//!
//! A push or PR operation that fails against the GitHub API parks the task
//! in `gh_failed` with the error stashed. Transient failures usually clear
//! on a plain retry; the rest need the user to fix credentials or remote
//! state first.

use tracing::info;

use crate::engine::failures::RecoveryOutcome;
use crate::error::EngineError;
use crate::store::TaskStore;
use crate::task::metadata::keys;
use crate::task::{state_machine, StepResult, Task, TaskStatus};

/// User recovery actions for a GitHub API failure
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GhFailureAction {
    /// Re-run the failed step as-is
    Retry,
    /// The user fixes something out-of-band first; the task stays parked
    FixAndRetry,
    Abandon,
}

/// Handles GitHub-failure recovery for parked tasks
#[derive(Debug, Clone, Copy, Default)]
pub struct GhFailureHandler;

impl GhFailureHandler {
    pub fn new() -> Self {
        Self
    }

    /// Park a task in `gh_failed` with the error stashed for later diagnosis
    pub(crate) fn handle_failure(
        &self,
        store: &TaskStore,
        task: &mut Task,
        result: &StepResult,
    ) -> Result<(), EngineError> {
        if let Some(error) = &result.error {
            task.metadata.set_last_error(error);
        }
        state_machine::transition(task, TaskStatus::GhFailed, "GitHub operation failed")?;
        store.update(task)
    }

    /// Apply a user recovery action to a task parked in `gh_failed`
    pub(crate) fn process_action(
        &self,
        store: &TaskStore,
        task: &mut Task,
        action: GhFailureAction,
    ) -> Result<RecoveryOutcome, EngineError> {
        match action {
            GhFailureAction::Retry => {
                // current_step stays put so the same operation re-runs
                state_machine::transition(
                    task,
                    TaskStatus::Running,
                    "retrying GitHub operation",
                )?;
                store.update(task)?;
                info!(task_id = %task.id, step = task.current_step, "retrying GitHub step");
                Ok(RecoveryOutcome {
                    status: TaskStatus::Running,
                    resume: true,
                })
            }

            GhFailureAction::FixAndRetry => {
                task.metadata
                    .insert(keys::AWAITING_MANUAL_FIX, serde_json::json!(true));
                store.update(task)?;
                Ok(RecoveryOutcome {
                    status: task.status,
                    resume: false,
                })
            }

            GhFailureAction::Abandon => {
                state_machine::transition(
                    task,
                    TaskStatus::Abandoned,
                    "abandoned after GitHub failure",
                )?;
                store.update(task)?;
                Ok(RecoveryOutcome {
                    status: TaskStatus::Abandoned,
                    resume: false,
                })
            }
        }
    }
}
