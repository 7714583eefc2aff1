//! Task status transition graph and predicates.
//!
//! Every status change goes through [`transition`], which validates the pair
//! against the allowed graph, requires a non-empty reason, appends the audit
//! record, and stamps `updated_at`. Anything not enumerated here must fail.

use chrono::Utc;

use crate::error::EngineError;
use crate::task::{StepType, Task, TaskStatus, TransitionRecord};

impl TaskStatus {
    /// Terminal statuses freeze the task document
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            TaskStatus::Completed | TaskStatus::Rejected | TaskStatus::Abandoned
        )
    }

    /// Typed failure statuses a task can be resumed out of
    pub fn is_error(self) -> bool {
        matches!(
            self,
            TaskStatus::CiFailed
                | TaskStatus::CiTimeout
                | TaskStatus::GhFailed
                | TaskStatus::ValidationFailed
                | TaskStatus::AiFailed
                | TaskStatus::GitFailed
        )
    }
}

/// Check whether `(from, to)` is in the allowed transition graph
pub fn is_allowed(from: TaskStatus, to: TaskStatus) -> bool {
    use TaskStatus::{
        Abandoned, AwaitingApproval, Completed, Pending, Rejected, Running, Validating,
    };

    if from.is_error() {
        return matches!(to, Running | Abandoned);
    }

    matches!(
        (from, to),
        (Pending, Running)
            | (Pending, Abandoned)
            | (Running, Validating)
            | (Validating, AwaitingApproval)
            | (AwaitingApproval, Running)
            | (AwaitingApproval, Rejected)
            | (AwaitingApproval, Abandoned)
            | (Running, Completed)
            | (Running, Abandoned)
    ) || (from == Running && to.is_error())
}

/// Whether a task in `status` may be abandoned without force
pub fn can_abandon(status: TaskStatus) -> bool {
    status.is_error() || matches!(status, TaskStatus::Pending | TaskStatus::AwaitingApproval)
}

/// Whether a task in `status` may be abandoned when `force` is set.
/// Force additionally covers running tasks; terminal tasks never qualify.
pub fn can_force_abandon(status: TaskStatus) -> bool {
    can_abandon(status) || status == TaskStatus::Running
}

/// The error status a failing step of `step_type` sends the task to
pub fn error_status_for(step_type: StepType) -> TaskStatus {
    match step_type {
        StepType::Ai => TaskStatus::AiFailed,
        StepType::Validation | StepType::Human => TaskStatus::ValidationFailed,
        StepType::Git => TaskStatus::GitFailed,
        StepType::Ci => TaskStatus::CiFailed,
    }
}

/// Move `task` to `new_status`, recording the transition.
///
/// Fails with `invalid-transition` if the pair is not in the graph, and with
/// `empty-value` if no reason is given.
pub fn transition(task: &mut Task, new_status: TaskStatus, reason: &str) -> Result<(), EngineError> {
    if reason.trim().is_empty() {
        return Err(EngineError::EmptyValue("transition reason".to_string()));
    }

    let from = task.status;
    if !is_allowed(from, new_status) {
        return Err(EngineError::InvalidTransition {
            from: from.to_string(),
            to: new_status.to_string(),
            detail: "not in the allowed transition graph".to_string(),
        });
    }

    let now = Utc::now();
    task.transitions.push(TransitionRecord {
        from,
        to: new_status,
        reason: reason.to_string(),
        timestamp: now,
    });
    task.status = new_status;
    task.updated_at = now;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{StepDefinition, TaskConfig, TaskTemplate};

    fn sample_task() -> Task {
        let template = TaskTemplate {
            id: "feature".to_string(),
            steps: vec![StepDefinition::new("analyze", StepType::Ai)],
        };
        Task::new(
            "task-20250101-120000",
            "default",
            "desc",
            &template,
            TaskConfig::default(),
        )
    }

    #[test]
    fn test_happy_path_transitions() {
        let mut task = sample_task();
        transition(&mut task, TaskStatus::Running, "task started").unwrap();
        transition(&mut task, TaskStatus::Completed, "task finished").unwrap();

        assert_eq!(task.status, TaskStatus::Completed);
        assert_eq!(task.transitions.len(), 2);
        assert_eq!(task.transitions[0].from, TaskStatus::Pending);
        assert_eq!(task.transitions[0].to, TaskStatus::Running);
        assert_eq!(task.transitions[1].reason, "task finished");
    }

    #[test]
    fn test_approval_requires_validating_hop() {
        assert!(!is_allowed(TaskStatus::Running, TaskStatus::AwaitingApproval));
        assert!(is_allowed(TaskStatus::Running, TaskStatus::Validating));
        assert!(is_allowed(
            TaskStatus::Validating,
            TaskStatus::AwaitingApproval
        ));
    }

    #[test]
    fn test_error_statuses_resume_or_abandon() {
        for status in [
            TaskStatus::CiFailed,
            TaskStatus::CiTimeout,
            TaskStatus::GhFailed,
            TaskStatus::ValidationFailed,
            TaskStatus::AiFailed,
            TaskStatus::GitFailed,
        ] {
            assert!(is_allowed(TaskStatus::Running, status));
            assert!(is_allowed(status, TaskStatus::Running));
            assert!(is_allowed(status, TaskStatus::Abandoned));
            assert!(!is_allowed(status, TaskStatus::Completed));
        }
    }

    #[test]
    fn test_invalid_transition_rejected() {
        let mut task = sample_task();
        let err = transition(&mut task, TaskStatus::Completed, "skipping ahead").unwrap_err();
        assert!(matches!(err, EngineError::InvalidTransition { .. }));
        assert_eq!(task.status, TaskStatus::Pending);
        assert!(task.transitions.is_empty());
    }

    #[test]
    fn test_empty_reason_rejected() {
        let mut task = sample_task();
        let err = transition(&mut task, TaskStatus::Running, "  ").unwrap_err();
        assert!(matches!(err, EngineError::EmptyValue(_)));
        assert!(task.transitions.is_empty());
    }

    #[test]
    fn test_terminal_statuses_frozen() {
        for status in [
            TaskStatus::Completed,
            TaskStatus::Rejected,
            TaskStatus::Abandoned,
        ] {
            assert!(status.is_terminal());
            assert!(!is_allowed(status, TaskStatus::Running));
            assert!(!is_allowed(status, TaskStatus::Abandoned));
            assert!(!can_force_abandon(status));
        }
    }

    #[test]
    fn test_abandon_predicates() {
        assert!(can_abandon(TaskStatus::Pending));
        assert!(can_abandon(TaskStatus::AwaitingApproval));
        assert!(can_abandon(TaskStatus::CiFailed));
        assert!(!can_abandon(TaskStatus::Running));
        assert!(can_force_abandon(TaskStatus::Running));
        assert!(!can_abandon(TaskStatus::Completed));
    }

    #[test]
    fn test_error_status_for_step_types() {
        assert_eq!(error_status_for(StepType::Ai), TaskStatus::AiFailed);
        assert_eq!(
            error_status_for(StepType::Validation),
            TaskStatus::ValidationFailed
        );
        assert_eq!(error_status_for(StepType::Git), TaskStatus::GitFailed);
        assert_eq!(error_status_for(StepType::Ci), TaskStatus::CiFailed);
        assert_eq!(
            error_status_for(StepType::Human),
            TaskStatus::ValidationFailed
        );
    }

    #[test]
    fn test_updated_at_bumped() {
        let mut task = sample_task();
        let before = task.updated_at;
        transition(&mut task, TaskStatus::Running, "task started").unwrap();
        assert!(task.updated_at >= before);
    }
}
