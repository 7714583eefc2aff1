//! Engine orchestrator.
//!
//! Drives a task's declared step sequence: resolves each step to its
//! executor, applies the result disposition, validates every status change
//! through the state machine, and persists the document after each
//! transition and checkpoint. Supports three forms of interruption:
//! cancellation (save-and-exit), pausing (awaiting human approval), and
//! abandonment (explicit termination, optionally killing tracked
//! subprocesses).

pub mod executor;
pub mod failures;
pub mod hooks;
pub mod progress;
pub mod retry;

use std::collections::HashSet;
use std::sync::Arc;
use std::time::Instant;

use async_trait::async_trait;
use chrono::Utc;
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, instrument, warn};

use crate::config::EngineConfig;
use crate::error::EngineError;
use crate::process::ProcessManager;
use crate::store::TaskStore;
use crate::task::metadata::{keys, ApprovalChoice};
use crate::task::{
    id, state_machine, StepDefinition, StepResult, StepStatus, StepType, Task, TaskConfig,
    TaskStatus, TaskTemplate,
};

pub use executor::{ExecutionFailure, ExecutorRegistry, StepExecutor};
pub use failures::{
    CiFailureAction, CiFailureHandler, CiTimeoutAction, CiTimeoutHandler, FailureType,
    GhFailureAction, GhFailureHandler, PrClient, RecoveryOutcome,
};
pub use hooks::{HookStepState, RecoveryHooks, ValidationReceipt};
pub use progress::{
    MetricsSink, NoopMetrics, ProgressCallback, ProgressEventType, StepProgressEvent,
};
pub use retry::{
    PipelineResult, RetryOutcome, StageResult, ValidationCheck, ValidationRetryHandler,
};

/// Capability notified when a task's status changes in a user-visible way
#[async_trait]
pub trait StateChangeNotifier: Send + Sync {
    async fn state_changed(&self, task: &Task, from: TaskStatus, to: TaskStatus);
}

/// Capability for mirroring task completion back to a backlog item
#[async_trait]
pub trait BacklogSync: Send + Sync {
    async fn update_status(&self, backlog_id: &str, status: &str) -> Result<(), EngineError>;
}

/// Everything needed to start a new task
#[derive(Debug, Clone)]
pub struct StartRequest {
    pub workspace: String,
    pub description: String,
    pub template: TaskTemplate,
    pub config: TaskConfig,
    /// Git branch the task's changes land on
    pub branch: String,
    /// Worktree directory the changes are produced in
    pub worktree_dir: String,
    /// Backlog item this task was created from, if any
    pub from_backlog_id: Option<String>,
}

/// An option mutates a draft engine during construction
pub type EngineOption = Box<dyn FnOnce(&mut Engine) + Send>;

pub fn with_hooks(hooks: Arc<dyn RecoveryHooks>) -> EngineOption {
    Box::new(move |e| e.hooks = Some(hooks))
}

pub fn with_validation_retry(handler: Arc<dyn ValidationRetryHandler>) -> EngineOption {
    Box::new(move |e| e.retry_handler = Some(handler))
}

pub fn with_metrics(metrics: Arc<dyn MetricsSink>) -> EngineOption {
    Box::new(move |e| e.metrics = metrics)
}

pub fn with_progress_callback(callback: ProgressCallback) -> EngineOption {
    Box::new(move |e| e.progress = Some(callback))
}

pub fn with_notifier(notifier: Arc<dyn StateChangeNotifier>) -> EngineOption {
    Box::new(move |e| e.notifier = Some(notifier))
}

pub fn with_backlog_sync(backlog: Arc<dyn BacklogSync>) -> EngineOption {
    Box::new(move |e| e.backlog = Some(backlog))
}

pub fn with_ci_failure_handler(handler: CiFailureHandler) -> EngineOption {
    Box::new(move |e| e.ci_failure_handler = Some(handler))
}

pub fn with_gh_failure_handler(handler: GhFailureHandler) -> EngineOption {
    Box::new(move |e| e.gh_failure_handler = Some(handler))
}

pub fn with_ci_timeout_handler(handler: CiTimeoutHandler) -> EngineOption {
    Box::new(move |e| e.ci_timeout_handler = Some(handler))
}

pub fn with_process_manager(manager: ProcessManager) -> EngineOption {
    Box::new(move |e| e.process_manager = manager)
}

/// What the step loop should do after a result disposition
enum Disposition {
    /// Advance past the step; `files_changed` feeds the hook record
    Continue { files_changed: Vec<String> },
    /// Stop the loop; the task is parked awaiting a user decision
    Pause,
}

/// The task execution engine.
///
/// Stateless across tasks: one engine instance can drive many tasks, but a
/// single task document must never be processed concurrently.
pub struct Engine {
    config: EngineConfig,
    store: Arc<TaskStore>,
    registry: ExecutorRegistry,
    process_manager: ProcessManager,
    metrics: Arc<dyn MetricsSink>,
    hooks: Option<Arc<dyn RecoveryHooks>>,
    retry_handler: Option<Arc<dyn ValidationRetryHandler>>,
    ci_failure_handler: Option<CiFailureHandler>,
    gh_failure_handler: Option<GhFailureHandler>,
    ci_timeout_handler: Option<CiTimeoutHandler>,
    notifier: Option<Arc<dyn StateChangeNotifier>>,
    backlog: Option<Arc<dyn BacklogSync>>,
    progress: Option<ProgressCallback>,
}

impl Engine {
    /// Build an engine from its required collaborators plus options.
    ///
    /// Store and executor registry are positional; everything else composes
    /// through [`EngineOption`] functions.
    pub fn new(
        config: EngineConfig,
        store: Arc<TaskStore>,
        registry: ExecutorRegistry,
        options: Vec<EngineOption>,
    ) -> Self {
        let mut engine = Self {
            process_manager: ProcessManager::new(config.graceful_wait()),
            config,
            store,
            registry,
            metrics: Arc::new(NoopMetrics),
            hooks: None,
            retry_handler: None,
            ci_failure_handler: None,
            gh_failure_handler: None,
            ci_timeout_handler: None,
            notifier: None,
            backlog: None,
            progress: None,
        };
        for option in options {
            option(&mut engine);
        }
        engine
    }

    pub fn store(&self) -> &Arc<TaskStore> {
        &self.store
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    // ── lifecycle entry points ───────────────────────────────────────────

    /// Create a task from a template and drive it until it completes,
    /// pauses, or fails.
    #[instrument(skip_all, fields(workspace = %request.workspace, template = %request.template.id))]
    pub async fn start(
        &self,
        ctx: &CancellationToken,
        request: StartRequest,
    ) -> Result<Task, EngineError> {
        let existing: HashSet<String> = self
            .store
            .list(&request.workspace)?
            .into_iter()
            .map(|t| t.id)
            .collect();
        let task_id = id::generate_unique_task_id(&existing);

        let mut task = Task::new(
            &task_id,
            &request.workspace,
            &request.description,
            &request.template,
            request.config.clone(),
        );
        task.metadata
            .insert(keys::BRANCH, serde_json::json!(request.branch));
        task.metadata
            .insert(keys::WORKTREE_DIR, serde_json::json!(request.worktree_dir));
        if let Some(backlog_id) = &request.from_backlog_id {
            task.metadata
                .insert(keys::FROM_BACKLOG_ID, serde_json::json!(backlog_id));
        }

        self.store.create(&mut task)?;
        state_machine::transition(&mut task, TaskStatus::Running, "task started")?;
        self.persist(&mut task)?;

        info!(task_id = %task.id, steps = task.total_steps(), "task started");
        self.hook_create(&task).await;
        self.metrics.task_started(&task);

        self.run_steps(ctx, &mut task, &request.template).await?;
        Ok(task)
    }

    /// Continue a paused or failed task from its checkpointed step.
    #[instrument(skip_all, fields(task_id = %task.id))]
    pub async fn resume(
        &self,
        ctx: &CancellationToken,
        task: &mut Task,
        template: &TaskTemplate,
    ) -> Result<(), EngineError> {
        if task.status.is_terminal() {
            return Err(EngineError::InvalidTransition {
                from: task.status.to_string(),
                to: TaskStatus::Running.to_string(),
                detail: "task is terminal".to_string(),
            });
        }

        if let Some(choice) = task.metadata.take_step_approval_choice() {
            self.apply_approval_choice(task, choice);
        }

        if task.status.is_error()
            || matches!(
                task.status,
                TaskStatus::AwaitingApproval | TaskStatus::Pending
            )
        {
            state_machine::transition(task, TaskStatus::Running, "resumed by user")?;
            self.persist(task)?;
        }

        info!(task_id = %task.id, step = task.current_step, "task resumed");
        self.run_steps(ctx, task, template).await
    }

    /// Explicitly terminate a task.
    ///
    /// Forcing a running task first terminates its tracked subprocesses and
    /// clears the PID list. Persistence errors are fatal to the call.
    #[instrument(skip_all, fields(task_id = %task.id, force))]
    pub async fn abandon(
        &self,
        task: &mut Task,
        reason: &str,
        force: bool,
    ) -> Result<(), EngineError> {
        if reason.trim().is_empty() {
            return Err(EngineError::EmptyValue("abandon reason".to_string()));
        }

        let prior = task.status;
        let allowed = if force {
            state_machine::can_force_abandon(prior)
        } else {
            state_machine::can_abandon(prior)
        };
        if !allowed {
            let detail = if !force && state_machine::can_force_abandon(prior) {
                "abandoning a running task requires force"
            } else {
                "task can never be abandoned from this status"
            };
            return Err(EngineError::InvalidTransition {
                from: prior.to_string(),
                to: TaskStatus::Abandoned.to_string(),
                detail: detail.to_string(),
            });
        }

        if force && prior == TaskStatus::Running && !task.running_processes.is_empty() {
            let report = self
                .process_manager
                .terminate_all(&task.running_processes)
                .await;
            info!(
                task_id = %task.id,
                terminated = report.terminated,
                errors = report.errors.len(),
                "terminated tracked subprocesses"
            );
            task.running_processes.clear();
        }

        state_machine::transition(task, TaskStatus::Abandoned, reason)?;
        self.hook_fail_task(task, reason).await;
        self.persist(task)?;
        self.backlog_update(task, "abandoned").await;
        self.notify(task, prior, TaskStatus::Abandoned).await;
        Ok(())
    }

    // ── failure action entry points ──────────────────────────────────────

    /// Apply a user recovery action to a task parked in `ci_failed`
    pub async fn process_ci_failure_action(
        &self,
        task: &mut Task,
        action: CiFailureAction,
    ) -> Result<RecoveryOutcome, EngineError> {
        let Some(handler) = &self.ci_failure_handler else {
            return Err(EngineError::other(
                "cannot process CI failure action: no CI failure handler configured",
            ));
        };
        handler.process_action(&self.store, task, action).await
    }

    /// Apply a user recovery action to a task parked in `gh_failed`
    pub async fn process_gh_failure_action(
        &self,
        task: &mut Task,
        action: GhFailureAction,
    ) -> Result<RecoveryOutcome, EngineError> {
        let Some(handler) = &self.gh_failure_handler else {
            return Err(EngineError::other(
                "cannot process GitHub failure action: no GitHub failure handler configured",
            ));
        };
        handler.process_action(&self.store, task, action)
    }

    /// Apply a user recovery action to a task parked in `ci_timeout`
    pub async fn process_ci_timeout_action(
        &self,
        task: &mut Task,
        action: CiTimeoutAction,
    ) -> Result<RecoveryOutcome, EngineError> {
        let Some(handler) = &self.ci_timeout_handler else {
            return Err(EngineError::other(
                "cannot process CI timeout action: no CI timeout handler configured",
            ));
        };
        handler.process_action(&self.store, task, action)
    }

    // ── the step loop ────────────────────────────────────────────────────

    async fn run_steps(
        &self,
        ctx: &CancellationToken,
        task: &mut Task,
        template: &TaskTemplate,
    ) -> Result<(), EngineError> {
        let total = template.steps.len();
        self.hook_ready(task).await;

        while task.current_step < total {
            let iteration_started = Instant::now();

            if ctx.is_cancelled() {
                // Save under a non-cancellable derivation so the pause is
                // durable, then surface the cancellation unchanged
                self.hook_fail_task(task, "canceled by user").await;
                if let Err(e) = self.persist(task) {
                    warn!(task_id = %task.id, error = %e, "checkpoint after cancellation failed");
                }
                return Err(EngineError::Canceled);
            }

            let index = task.current_step;
            let def = &template.steps[index];

            if self.should_skip(task, def) {
                debug!(task_id = %task.id, step = %def.name, "skipping step by policy");
                if let Some(step) = task.steps.get_mut(index) {
                    step.status = StepStatus::Skipped;
                    step.completed_at = Some(Utc::now());
                }
                task.step_results.push(StepResult::skipped(index, &def.name));
                task.current_step += 1;
                self.persist(task)?;
                continue;
            }

            self.emit_progress(StepProgressEvent::for_step(
                ProgressEventType::Start,
                task,
                index,
                &def.name,
                def.step_type,
            ));
            self.hook_transition_step(task, index, HookStepState::Running)
                .await;

            if let Some(step) = task.steps.get_mut(index) {
                step.status = StepStatus::Running;
                step.started_at = Some(Utc::now());
                step.attempts += 1;
                step.error = None;
            }
            self.persist(task)?;

            let Some(step_executor) = self.registry.get(def.step_type) else {
                let error = EngineError::other(format!(
                    "no executor registered for step type '{}'",
                    def.step_type
                ));
                return self.fail_step(task, index, def, error).await;
            };

            let exec_started = Instant::now();
            let outcome = step_executor.execute(ctx, task, def).await;
            let outcome = match outcome {
                Ok(result) => Ok(result),
                Err(failure) => self.try_validation_retry(ctx, task, index, def, failure).await,
            };

            match outcome {
                Err(failure) => {
                    self.metrics.step_executed(
                        &def.name,
                        def.step_type,
                        exec_started.elapsed(),
                        false,
                    );
                    if let Some(partial) = failure.partial_result {
                        task.step_results.push(partial);
                    }
                    return self.fail_step(task, index, def, failure.error).await;
                }

                Ok(result) => {
                    let duration = exec_started.elapsed();
                    self.metrics.step_executed(
                        &def.name,
                        def.step_type,
                        duration,
                        !matches!(result.status, StepStatus::Failed),
                    );

                    let mut event = StepProgressEvent::for_step(
                        ProgressEventType::Complete,
                        task,
                        index,
                        &def.name,
                        def.step_type,
                    );
                    event.duration_ms = Some(duration.as_millis() as u64);
                    event.status = Some(result.status);
                    event.files_changed_count = Some(result.files_changed.len());
                    event.output = result.output.clone();
                    self.emit_progress(event);

                    match self.apply_disposition(task, index, def, result).await {
                        Ok(Disposition::Continue { files_changed }) => {
                            self.hook_complete_step(task, index, &files_changed).await;
                            task.current_step += 1;
                            self.persist(task)?;
                        }
                        Ok(Disposition::Pause) => {
                            self.persist(task)?;
                            return Ok(());
                        }
                        Err(e) => {
                            self.hook_transition_step(task, index, HookStepState::Failed)
                                .await;
                            if let Err(persist_err) = self.persist(task) {
                                warn!(
                                    task_id = %task.id,
                                    error = %persist_err,
                                    "checkpoint after disposition error failed"
                                );
                            }
                            return Err(e);
                        }
                    }
                }
            }

            let attempts = task.steps.get(index).map_or(0, |s| s.attempts);
            self.metrics
                .loop_iteration(&def.name, attempts, iteration_started.elapsed());
        }

        state_machine::transition(task, TaskStatus::Completed, "task finished")?;
        self.persist(task)?;
        self.hook_complete_task(task).await;

        let elapsed = (Utc::now() - task.created_at).to_std().unwrap_or_default();
        self.metrics.task_completed(elapsed, task.status);
        self.backlog_update(task, "completed").await;
        self.notify(task, TaskStatus::Running, TaskStatus::Completed)
            .await;
        info!(task_id = %task.id, "task completed");
        Ok(())
    }

    /// Classify an executor error into the step type's error status,
    /// persist, and surface the original error.
    async fn fail_step(
        &self,
        task: &mut Task,
        index: usize,
        def: &StepDefinition,
        error: EngineError,
    ) -> Result<(), EngineError> {
        let error_text = error.to_string();
        if let Some(step) = task.steps.get_mut(index) {
            step.status = StepStatus::Failed;
            step.completed_at = Some(Utc::now());
            step.error = Some(error_text.clone());
        }
        task.metadata.set_last_error(&error_text);
        self.hook_fail_step(task, index, &error_text).await;

        if error.is_canceled() {
            // Cancellation surfaces unchanged after a best-effort save
            if let Err(e) = self.persist(task) {
                warn!(task_id = %task.id, error = %e, "save after cancellation failed");
            }
            return Err(error);
        }

        let error_status = state_machine::error_status_for(def.step_type);
        state_machine::transition(
            task,
            error_status,
            &format!("step '{}' failed: {error_text}", def.name),
        )?;
        self.persist(task)?;
        Err(error)
    }

    /// Route an executor failure through the AI-assisted validation retry
    /// loop when eligible; otherwise pass it through.
    async fn try_validation_retry(
        &self,
        ctx: &CancellationToken,
        task: &mut Task,
        index: usize,
        def: &StepDefinition,
        failure: ExecutionFailure,
    ) -> Result<StepResult, ExecutionFailure> {
        if def.step_type != StepType::Validation {
            return Err(failure);
        }
        let Some(handler) = self.retry_handler.clone() else {
            return Err(failure);
        };
        if !retry::retry_eligible(Some(&handler), failure.partial_result.as_ref()) {
            return Err(failure);
        }
        let Some(failed_result) = failure.partial_result.clone() else {
            return Err(failure);
        };

        match retry::run_validation_retry(
            &handler,
            ctx,
            task,
            index,
            &def.name,
            &failed_result,
            self.progress.as_ref(),
        )
        .await
        {
            Ok(result) => {
                info!(task_id = %task.id, step = %def.name, "validation recovered via AI retry");
                Ok(result)
            }
            Err(retry_error) => {
                warn!(task_id = %task.id, error = %retry_error, "AI-assisted validation retry failed");
                Err(ExecutionFailure::with_partial(retry_error, failed_result))
            }
        }
    }

    /// Apply the per-status result disposition table
    async fn apply_disposition(
        &self,
        task: &mut Task,
        index: usize,
        def: &StepDefinition,
        result: StepResult,
    ) -> Result<Disposition, EngineError> {
        match result.status {
            StepStatus::Success | StepStatus::NoChanges => {
                if result.status == StepStatus::NoChanges {
                    task.metadata
                        .insert(keys::SKIP_GIT_STEPS, serde_json::json!(true));
                    debug!(task_id = %task.id, "no changes produced, remote git steps will be skipped");
                }

                let detect_only = result
                    .metadata
                    .get("detect_only")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                let issues_found = result
                    .metadata
                    .get("issues_found")
                    .and_then(|v| v.as_bool())
                    .unwrap_or(false);
                if detect_only && !issues_found {
                    task.metadata
                        .insert(keys::NO_ISSUES_DETECTED, serde_json::json!(true));
                }

                if let Some(step) = task.steps.get_mut(index) {
                    step.status = result.status;
                    step.completed_at = Some(Utc::now());
                    step.error = None;
                }

                if def.step_type == StepType::Validation && result.status == StepStatus::Success {
                    self.issue_validation_receipt(task, index, &result).await;
                }

                let files_changed = result.files_changed.clone();
                task.step_results.push(result);
                Ok(Disposition::Continue { files_changed })
            }

            StepStatus::AwaitingApproval => {
                if let Some(step) = task.steps.get_mut(index) {
                    step.status = StepStatus::AwaitingApproval;
                }
                task.step_results.push(result);
                state_machine::transition(task, TaskStatus::Validating, "step awaiting approval")?;
                state_machine::transition(
                    task,
                    TaskStatus::AwaitingApproval,
                    "paused for human approval",
                )?;
                self.notify(task, TaskStatus::Running, TaskStatus::AwaitingApproval)
                    .await;
                Ok(Disposition::Pause)
            }

            StepStatus::Failed => {
                if let Some(step) = task.steps.get_mut(index) {
                    step.status = StepStatus::Failed;
                    step.completed_at = Some(Utc::now());
                    step.error = result.error.clone();
                }
                if let Some(error) = &result.error {
                    task.metadata.set_last_error(error);
                }
                task.step_results.push(result.clone());

                let handled = self.dispatch_typed_failure(task, &result).await?;
                if !handled {
                    let error_status = state_machine::error_status_for(def.step_type);
                    state_machine::transition(
                        task,
                        error_status,
                        &format!("step '{}' failed", def.name),
                    )?;
                }
                Ok(Disposition::Pause)
            }

            StepStatus::Skipped => {
                if let Some(step) = task.steps.get_mut(index) {
                    step.status = StepStatus::Skipped;
                    step.completed_at = Some(Utc::now());
                }
                task.step_results.push(result);
                Ok(Disposition::Continue {
                    files_changed: Vec::new(),
                })
            }

            StepStatus::Pending | StepStatus::Running => Err(
                EngineError::UnknownStepResultStatus(result.status.to_string()),
            ),
        }
    }

    /// Route a typed failure marker to its handler.
    ///
    /// Returns whether the failure was handled; an unhandled failure falls
    /// back to the default step-type error classification. When a marker is
    /// recognized but its handler is not configured, the task still parks in
    /// the marker's status.
    async fn dispatch_typed_failure(
        &self,
        task: &mut Task,
        result: &StepResult,
    ) -> Result<bool, EngineError> {
        let Some(marker) = result.failure_type() else {
            return Ok(false);
        };
        let Some(failure_type) = FailureType::parse(marker) else {
            return Ok(false);
        };
        task.metadata.set_failure_type(failure_type.as_str());

        match failure_type {
            FailureType::CiFailed => {
                if let Some(handler) = &self.ci_failure_handler {
                    handler.handle_failure(&self.store, task, result)?;
                } else {
                    state_machine::transition(task, TaskStatus::CiFailed, "CI checks failed")?;
                    self.persist(task)?;
                }
            }
            FailureType::CiTimeout => {
                if let Some(handler) = &self.ci_timeout_handler {
                    handler.handle_failure(&self.store, task)?;
                } else {
                    state_machine::transition(task, TaskStatus::CiTimeout, "CI watch timed out")?;
                    self.persist(task)?;
                }
            }
            FailureType::GhFailed => {
                if let Some(handler) = &self.gh_failure_handler {
                    handler.handle_failure(&self.store, task, result)?;
                } else {
                    state_machine::transition(
                        task,
                        TaskStatus::GhFailed,
                        "GitHub operation failed",
                    )?;
                    self.persist(task)?;
                }
            }
        }
        Ok(true)
    }

    // ── policies ─────────────────────────────────────────────────────────

    fn should_skip(&self, task: &Task, def: &StepDefinition) -> bool {
        if task.metadata.skip_steps().iter().any(|s| s == &def.name) {
            return true;
        }
        if task.metadata.skip_git_steps()
            && def.step_type == StepType::Git
            && is_publish_step(&def.name)
        {
            return true;
        }
        if task.metadata.no_issues_detected() && is_fix_step(&def.name) {
            return true;
        }
        false
    }

    fn apply_approval_choice(&self, task: &mut Task, choice: ApprovalChoice) {
        match choice {
            ApprovalChoice::Rewind => {
                task.current_step = task.current_step.saturating_sub(1);
                if let Some(step) = task.current_step_mut() {
                    step.status = StepStatus::Pending;
                    step.started_at = None;
                    step.completed_at = None;
                    step.error = None;
                }
                info!(task_id = %task.id, step = task.current_step, "rewound one step");
            }
            ApprovalChoice::Skip => {
                let index = task.current_step;
                let name = task
                    .steps
                    .get(index)
                    .map(|s| s.name.clone())
                    .unwrap_or_default();
                if let Some(step) = task.steps.get_mut(index) {
                    step.status = StepStatus::Skipped;
                    step.completed_at = Some(Utc::now());
                }
                task.step_results.push(StepResult::skipped(index, name));
                task.current_step += 1;
                info!(task_id = %task.id, step = index, "skipped step by user choice");
            }
            ApprovalChoice::Accept => {}
        }
    }

    // ── collaborators, all best-effort ───────────────────────────────────

    fn persist(&self, task: &mut Task) -> Result<(), EngineError> {
        self.store.update(task)
    }

    fn emit_progress(&self, event: StepProgressEvent) {
        if let Some(callback) = &self.progress {
            callback(event);
        }
    }

    async fn notify(&self, task: &Task, from: TaskStatus, to: TaskStatus) {
        if let Some(notifier) = &self.notifier {
            notifier.state_changed(task, from, to).await;
        }
    }

    async fn backlog_update(&self, task: &Task, status: &str) {
        let Some(backlog) = &self.backlog else {
            return;
        };
        let Some(backlog_id) = task.metadata.from_backlog_id() else {
            return;
        };
        if let Err(e) = backlog.update_status(backlog_id, status).await {
            warn!(task_id = %task.id, backlog_id, error = %e, "backlog status update failed");
        }
    }

    async fn issue_validation_receipt(&self, task: &Task, index: usize, result: &StepResult) {
        let Some(hooks) = &self.hooks else {
            return;
        };

        let checks: Vec<ValidationCheck> = result
            .metadata
            .get("validation_checks")
            .and_then(|v| serde_json::from_value(v.clone()).ok())
            .unwrap_or_else(|| {
                retry::VALIDATION_STAGES
                    .iter()
                    .map(|&name| ValidationCheck::passed(name))
                    .collect()
            });

        let receipt = ValidationReceipt::new(&task.id, index, checks);
        if let Err(e) = hooks.create_validation_receipt(&receipt).await {
            warn!(task_id = %task.id, error = %e, "validation receipt creation failed");
        }
    }

    async fn hook_create(&self, task: &Task) {
        let Some(hooks) = &self.hooks else {
            return;
        };
        if let Err(e) = hooks.create_hook(task).await {
            warn!(task_id = %task.id, error = %e, "hook create failed");
        }
        if let Err(e) = hooks.start_interval_checkpointing(task).await {
            warn!(task_id = %task.id, error = %e, "interval checkpointing start failed");
        }
    }

    async fn hook_ready(&self, task: &Task) {
        if let Some(hooks) = &self.hooks {
            if let Err(e) = hooks.ready_hook(task).await {
                warn!(task_id = %task.id, error = %e, "hook ready failed");
            }
        }
    }

    async fn hook_transition_step(&self, task: &Task, index: usize, state: HookStepState) {
        if let Some(hooks) = &self.hooks {
            if let Err(e) = hooks.transition_step(task, index, state).await {
                warn!(task_id = %task.id, error = %e, "hook step transition failed");
            }
        }
    }

    async fn hook_complete_step(&self, task: &Task, index: usize, files_changed: &[String]) {
        if let Some(hooks) = &self.hooks {
            if let Err(e) = hooks.complete_step(task, index, files_changed).await {
                warn!(task_id = %task.id, error = %e, "hook step completion failed");
            }
        }
    }

    async fn hook_fail_step(&self, task: &Task, index: usize, error: &str) {
        if let Some(hooks) = &self.hooks {
            if let Err(e) = hooks.fail_step(task, index, error).await {
                warn!(task_id = %task.id, error = %e, "hook step failure record failed");
            }
        }
    }

    async fn hook_complete_task(&self, task: &Task) {
        let Some(hooks) = &self.hooks else {
            return;
        };
        if let Err(e) = hooks.complete_task(task).await {
            warn!(task_id = %task.id, error = %e, "hook task completion failed");
        }
        if let Err(e) = hooks.stop_interval_checkpointing(&task.id).await {
            warn!(task_id = %task.id, error = %e, "interval checkpointing stop failed");
        }
    }

    async fn hook_fail_task(&self, task: &Task, reason: &str) {
        let Some(hooks) = &self.hooks else {
            return;
        };
        if let Err(e) = hooks.fail_task(task, reason).await {
            warn!(task_id = %task.id, error = %e, "hook task failure record failed");
        }
        if let Err(e) = hooks.stop_interval_checkpointing(&task.id).await {
            warn!(task_id = %task.id, error = %e, "interval checkpointing stop failed");
        }
    }
}

/// Git steps whose name implies remote publishing
fn is_publish_step(name: &str) -> bool {
    let name = name.to_lowercase();
    name.contains("push") || name.contains("pr")
}

/// Follow-up steps skipped when detection found nothing to fix
fn is_fix_step(name: &str) -> bool {
    name.to_lowercase().starts_with("fix")
}
