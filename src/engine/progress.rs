//! Step progress events and the metrics capability.
//!
//! The progress callback lets a caller (CLI, TUI, daemon) render live step
//! activity without coupling to engine internals. The metrics sink is the
//! same idea for counters and timings; a no-op implementation ships here.

use std::sync::Arc;
use std::time::Duration;

use crate::task::{StepStatus, StepType, Task, TaskStatus};

/// What kind of progress event this is
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProgressEventType {
    Start,
    Complete,
    Retry,
}

impl std::fmt::Display for ProgressEventType {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ProgressEventType::Start => "start",
            ProgressEventType::Complete => "complete",
            ProgressEventType::Retry => "retry",
        };
        write!(f, "{s}")
    }
}

/// A step lifecycle event emitted to the progress callback
#[derive(Debug, Clone)]
pub struct StepProgressEvent {
    pub event_type: ProgressEventType,
    pub task_id: String,
    pub workspace: String,
    pub step_index: usize,
    pub total_steps: usize,
    pub step_name: String,
    pub step_type: StepType,
    pub agent: String,
    pub model: String,
    /// Set on `complete` events
    pub duration_ms: Option<u64>,
    /// Conversation turns reported by AI executors
    pub num_turns: Option<u32>,
    pub files_changed_count: Option<usize>,
    pub status: Option<StepStatus>,
    pub output: Option<String>,
}

impl StepProgressEvent {
    /// Build the common fields for a step at `step_index` of `task`
    pub fn for_step(
        event_type: ProgressEventType,
        task: &Task,
        step_index: usize,
        step_name: &str,
        step_type: StepType,
    ) -> Self {
        Self {
            event_type,
            task_id: task.id.clone(),
            workspace: task.workspace_id.clone(),
            step_index,
            total_steps: task.total_steps(),
            step_name: step_name.to_string(),
            step_type,
            agent: task.config.agent.clone(),
            model: task.config.model.clone(),
            duration_ms: None,
            num_turns: None,
            files_changed_count: None,
            status: None,
            output: None,
        }
    }
}

/// Callback invoked with every progress event
pub type ProgressCallback = Arc<dyn Fn(StepProgressEvent) + Send + Sync>;

/// Capability for recording engine metrics
pub trait MetricsSink: Send + Sync {
    fn task_started(&self, task: &Task);
    fn task_completed(&self, duration: Duration, status: TaskStatus);
    fn step_executed(&self, name: &str, step_type: StepType, duration: Duration, success: bool);
    fn loop_iteration(&self, name: &str, iteration: u32, duration: Duration);
}

/// Metrics sink that records nothing
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopMetrics;

impl MetricsSink for NoopMetrics {
    fn task_started(&self, _task: &Task) {}
    fn task_completed(&self, _duration: Duration, _status: TaskStatus) {}
    fn step_executed(&self, _name: &str, _step_type: StepType, _duration: Duration, _success: bool) {
    }
    fn loop_iteration(&self, _name: &str, _iteration: u32, _duration: Duration) {}
}
