//! CI-timeout recovery.
//!
//! The CI watcher gave up before checks concluded. The user decides whether
//! to keep waiting with an extended window, rewind to the implementation,
//! fix things by hand, or abandon.

use tracing::info;

use crate::engine::failures::{find_implement_step_index, RecoveryOutcome};
use crate::error::EngineError;
use crate::store::TaskStore;
use crate::task::metadata::keys;
use crate::task::{state_machine, Task, TaskStatus};

/// User recovery actions for a CI timeout
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum CiTimeoutAction {
    /// Re-enter the CI watch with an extended timeout window
    ContinueWaiting,
    /// Rewind to the implementation step and re-run
    Retry,
    /// The user intervenes out-of-band; the task stays parked
    FixManually,
    Abandon,
}

/// Handles CI-timeout recovery for parked tasks
#[derive(Debug, Clone, Copy, Default)]
pub struct CiTimeoutHandler;

impl CiTimeoutHandler {
    pub fn new() -> Self {
        Self
    }

    /// Park a task in `ci_timeout`
    pub(crate) fn handle_failure(
        &self,
        store: &TaskStore,
        task: &mut Task,
    ) -> Result<(), EngineError> {
        state_machine::transition(task, TaskStatus::CiTimeout, "CI watch timed out")?;
        store.update(task)
    }

    /// Apply a user recovery action to a task parked in `ci_timeout`
    pub(crate) fn process_action(
        &self,
        store: &TaskStore,
        task: &mut Task,
        action: CiTimeoutAction,
    ) -> Result<RecoveryOutcome, EngineError> {
        match action {
            CiTimeoutAction::ContinueWaiting => {
                task.metadata
                    .insert(keys::EXTENDED_CI_TIMEOUT, serde_json::json!(true));
                state_machine::transition(
                    task,
                    TaskStatus::Running,
                    "continuing CI watch with extended timeout",
                )?;
                store.update(task)?;
                Ok(RecoveryOutcome {
                    status: TaskStatus::Running,
                    resume: true,
                })
            }

            CiTimeoutAction::Retry => {
                let index = find_implement_step_index(task);
                task.current_step = index;
                state_machine::transition(
                    task,
                    TaskStatus::Running,
                    "retrying implementation after CI timeout",
                )?;
                store.update(task)?;
                info!(task_id = %task.id, index, "rewound to implementation step");
                Ok(RecoveryOutcome {
                    status: TaskStatus::Running,
                    resume: true,
                })
            }

            CiTimeoutAction::FixManually => {
                task.metadata
                    .insert(keys::AWAITING_MANUAL_FIX, serde_json::json!(true));
                store.update(task)?;
                Ok(RecoveryOutcome {
                    status: task.status,
                    resume: false,
                })
            }

            CiTimeoutAction::Abandon => {
                state_machine::transition(
                    task,
                    TaskStatus::Abandoned,
                    "abandoned after CI timeout",
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
