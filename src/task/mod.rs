//! Task data model.
//!
//! A Task is a durable, resumable workflow instance: an ordered list of
//! heterogeneous steps (AI calls, validation pipelines, git operations, CI
//! monitoring, human-approval gates) plus the append-only execution history
//! needed to resume it after a pause, a typed failure, or a crash.

pub mod id;
pub mod metadata;
pub mod state_machine;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

pub use metadata::TaskMetadata;

/// Current on-disk schema version for `task.json`
pub const SCHEMA_VERSION: u32 = 1;

/// A durable, resumable workflow instance
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    /// Unique identifier (e.g., "task-20250101-120000")
    pub id: String,

    /// Workspace this task belongs to
    pub workspace_id: String,

    /// Template the step list was materialized from
    pub template_id: String,

    /// Human-readable description of the change being made
    pub description: String,

    /// Current lifecycle status
    pub status: TaskStatus,

    /// Index of the step being (or about to be) executed.
    /// Equals `steps.len()` only when the task is completed.
    pub current_step: usize,

    /// Ordered steps materialized from the template
    pub steps: Vec<Step>,

    /// Append-only history of step execution attempts
    #[serde(default)]
    pub step_results: Vec<StepResult>,

    /// Append-only audit log of status transitions
    #[serde(default)]
    pub transitions: Vec<TransitionRecord>,

    pub created_at: DateTime<Utc>,

    pub updated_at: DateTime<Utc>,

    /// Agent and model driving the AI steps
    pub config: TaskConfig,

    /// Set on create; never downgraded
    #[serde(default)]
    pub schema_version: u32,

    /// Dynamic string-to-value mapping (branch, worktree path, PR number,
    /// failure context, retry counters, user choices)
    #[serde(default)]
    pub metadata: TaskMetadata,

    /// Child process ids tracked for forced abandonment
    #[serde(default)]
    pub running_processes: Vec<i32>,
}

/// Agent configuration stamped on a task at creation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct TaskConfig {
    /// Which agent executes AI steps (e.g., "claude")
    pub agent: String,
    /// Model override (e.g., "claude-sonnet-4-20250514")
    pub model: String,
}

/// One unit of work within a task
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Step {
    /// Step name from the template (e.g., "implement", "validate", "push")
    pub name: String,

    #[serde(rename = "type")]
    pub step_type: StepType,

    pub status: StepStatus,

    /// Number of execution attempts so far
    #[serde(default)]
    pub attempts: u32,

    #[serde(default)]
    pub started_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    /// Last error text if the step failed
    #[serde(default)]
    pub error: Option<String>,
}

impl Step {
    /// Materialize a pending step from its template definition
    pub fn from_definition(def: &StepDefinition) -> Self {
        Self {
            name: def.name.clone(),
            step_type: def.step_type,
            status: StepStatus::Pending,
            attempts: 0,
            started_at: None,
            completed_at: None,
            error: None,
        }
    }
}

/// Read-only step declaration from a template. Not persisted in the task.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepDefinition {
    pub name: String,

    #[serde(rename = "type")]
    pub step_type: StepType,

    /// Step-specific configuration, opaque to the engine
    #[serde(default)]
    pub config: serde_json::Value,
}

impl StepDefinition {
    pub fn new(name: impl Into<String>, step_type: StepType) -> Self {
        Self {
            name: name.into(),
            step_type,
            config: serde_json::Value::Null,
        }
    }
}

/// The read-only declaration of a task's ordered step list
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskTemplate {
    pub id: String,
    pub steps: Vec<StepDefinition>,
}

/// The outcome record of one step execution attempt
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StepResult {
    pub step_index: usize,

    pub step_name: String,

    pub status: StepStatus,

    pub started_at: DateTime<Utc>,

    #[serde(default)]
    pub completed_at: Option<DateTime<Utc>>,

    #[serde(default)]
    pub duration_ms: u64,

    #[serde(default)]
    pub output: Option<String>,

    #[serde(default)]
    pub error: Option<String>,

    /// Files the step touched (for progress reporting and hooks)
    #[serde(default)]
    pub files_changed: Vec<String>,

    /// Result-scoped mapping; may carry `failure_type`, a typed failure
    /// payload, a pipeline result, or validation checks
    #[serde(default)]
    pub metadata: serde_json::Map<String, serde_json::Value>,
}

impl StepResult {
    /// Create a result with the given status, stamped now
    pub fn new(step_index: usize, step_name: impl Into<String>, status: StepStatus) -> Self {
        let now = Utc::now();
        Self {
            step_index,
            step_name: step_name.into(),
            status,
            started_at: now,
            completed_at: Some(now),
            duration_ms: 0,
            output: None,
            error: None,
            files_changed: Vec::new(),
            metadata: serde_json::Map::new(),
        }
    }

    /// Synthetic record for a step the engine skipped without executing
    pub fn skipped(step_index: usize, step_name: impl Into<String>) -> Self {
        Self::new(step_index, step_name, StepStatus::Skipped)
    }

    pub fn with_output(mut self, output: impl Into<String>) -> Self {
        self.output = Some(output.into());
        self
    }

    pub fn with_error(mut self, error: impl Into<String>) -> Self {
        self.error = Some(error.into());
        self
    }

    pub fn with_metadata(mut self, key: impl Into<String>, value: serde_json::Value) -> Self {
        self.metadata.insert(key.into(), value);
        self
    }

    /// Read the typed failure marker, if any
    pub fn failure_type(&self) -> Option<&str> {
        self.metadata.get("failure_type").and_then(|v| v.as_str())
    }
}

/// One entry in a task's transition audit log
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TransitionRecord {
    pub from: TaskStatus,
    pub to: TaskStatus,
    pub reason: String,
    pub timestamp: DateTime<Utc>,
}

/// Task lifecycle status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskStatus {
    /// Created but not started
    #[default]
    Pending,
    /// Step loop actively advancing
    Running,
    /// Validation or approval gate reached
    Validating,
    /// Paused for a human decision
    AwaitingApproval,
    /// All steps consumed
    Completed,
    /// Human rejected the work
    Rejected,
    /// Explicitly terminated
    Abandoned,
    /// CI reported failing checks
    CiFailed,
    /// CI did not conclude within the watch window
    CiTimeout,
    /// GitHub API operation failed
    GhFailed,
    /// Validation pipeline failed beyond retry
    ValidationFailed,
    /// AI step failed
    AiFailed,
    /// Git operation failed
    GitFailed,
}

impl std::fmt::Display for TaskStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            TaskStatus::Pending => "pending",
            TaskStatus::Running => "running",
            TaskStatus::Validating => "validating",
            TaskStatus::AwaitingApproval => "awaiting_approval",
            TaskStatus::Completed => "completed",
            TaskStatus::Rejected => "rejected",
            TaskStatus::Abandoned => "abandoned",
            TaskStatus::CiFailed => "ci_failed",
            TaskStatus::CiTimeout => "ci_timeout",
            TaskStatus::GhFailed => "gh_failed",
            TaskStatus::ValidationFailed => "validation_failed",
            TaskStatus::AiFailed => "ai_failed",
            TaskStatus::GitFailed => "git_failed",
        };
        write!(f, "{s}")
    }
}

/// Status of a single step
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum StepStatus {
    #[default]
    Pending,
    Running,
    Success,
    /// Step ran but produced no changes (downstream git steps get skipped)
    NoChanges,
    AwaitingApproval,
    Failed,
    Skipped,
}

impl std::fmt::Display for StepStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepStatus::Pending => "pending",
            StepStatus::Running => "running",
            StepStatus::Success => "success",
            StepStatus::NoChanges => "no_changes",
            StepStatus::AwaitingApproval => "awaiting_approval",
            StepStatus::Failed => "failed",
            StepStatus::Skipped => "skipped",
        };
        write!(f, "{s}")
    }
}

/// The nature of a step, which decides its executor and its error status
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum StepType {
    Ai,
    Validation,
    Git,
    Ci,
    Human,
}

impl std::fmt::Display for StepType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            StepType::Ai => "ai",
            StepType::Validation => "validation",
            StepType::Git => "git",
            StepType::Ci => "ci",
            StepType::Human => "human",
        };
        write!(f, "{s}")
    }
}

impl Task {
    /// Materialize a new pending task from a template
    pub fn new(
        id: impl Into<String>,
        workspace_id: impl Into<String>,
        description: impl Into<String>,
        template: &TaskTemplate,
        config: TaskConfig,
    ) -> Self {
        let now = Utc::now();
        Self {
            id: id.into(),
            workspace_id: workspace_id.into(),
            template_id: template.id.clone(),
            description: description.into(),
            status: TaskStatus::Pending,
            current_step: 0,
            steps: template.steps.iter().map(Step::from_definition).collect(),
            step_results: Vec::new(),
            transitions: Vec::new(),
            created_at: now,
            updated_at: now,
            config,
            schema_version: SCHEMA_VERSION,
            metadata: TaskMetadata::default(),
            running_processes: Vec::new(),
        }
    }

    /// Total number of steps in this task
    pub fn total_steps(&self) -> usize {
        self.steps.len()
    }

    /// The step at `current_step`, if the task is not yet complete
    pub fn current_step_mut(&mut self) -> Option<&mut Step> {
        let idx = self.current_step;
        self.steps.get_mut(idx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_template() -> TaskTemplate {
        TaskTemplate {
            id: "feature".to_string(),
            steps: vec![
                StepDefinition::new("analyze", StepType::Ai),
                StepDefinition::new("implement", StepType::Ai),
                StepDefinition::new("validate", StepType::Validation),
                StepDefinition::new("commit", StepType::Git),
            ],
        }
    }

    #[test]
    fn test_task_new_materializes_steps() {
        let task = Task::new(
            "task-20250101-120000",
            "default",
            "Add login flow",
            &sample_template(),
            TaskConfig {
                agent: "claude".to_string(),
                model: "sonnet".to_string(),
            },
        );

        assert_eq!(task.status, TaskStatus::Pending);
        assert_eq!(task.current_step, 0);
        assert_eq!(task.steps.len(), 4);
        assert_eq!(task.schema_version, SCHEMA_VERSION);
        assert!(task
            .steps
            .iter()
            .all(|s| s.status == StepStatus::Pending && s.attempts == 0));
        assert_eq!(task.steps[2].step_type, StepType::Validation);
    }

    #[test]
    fn test_status_wire_format() {
        let json = serde_json::to_string(&TaskStatus::AwaitingApproval).unwrap();
        assert_eq!(json, "\"awaiting_approval\"");
        let back: TaskStatus = serde_json::from_str("\"ci_failed\"").unwrap();
        assert_eq!(back, TaskStatus::CiFailed);
        assert_eq!(TaskStatus::ValidationFailed.to_string(), "validation_failed");
    }

    #[test]
    fn test_step_type_wire_format() {
        let json = serde_json::to_string(&StepType::Validation).unwrap();
        assert_eq!(json, "\"validation\"");
        assert_eq!(StepType::Ci.to_string(), "ci");
    }

    #[test]
    fn test_step_result_failure_type() {
        let result = StepResult::new(0, "ci_wait", StepStatus::Failed)
            .with_metadata("failure_type", serde_json::json!("ci_failed"));
        assert_eq!(result.failure_type(), Some("ci_failed"));

        let plain = StepResult::new(0, "analyze", StepStatus::Success);
        assert_eq!(plain.failure_type(), None);
    }

    #[test]
    fn test_task_roundtrip() {
        let task = Task::new(
            "task-20250101-120000",
            "default",
            "desc",
            &sample_template(),
            TaskConfig::default(),
        );
        let json = serde_json::to_string_pretty(&task).unwrap();
        let back: Task = serde_json::from_str(&json).unwrap();
        assert_eq!(back.id, task.id);
        assert_eq!(back.steps.len(), 4);
        assert_eq!(back.status, TaskStatus::Pending);
    }
}
