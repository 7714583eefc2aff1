//! AI-assisted retry of failed validation pipelines.
//!
//! When a validation step fails with a structured pipeline result attached,
//! the engine can hand the failure to a retry handler that asks the AI agent
//! to fix the worktree and re-run the pipeline, bounded by an attempt count.

use std::path::Path;
use std::sync::Arc;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use tokio_util::sync::CancellationToken;
use tracing::{debug, info, warn};

use crate::engine::progress::{ProgressCallback, ProgressEventType, StepProgressEvent};
use crate::error::EngineError;
use crate::task::{StepResult, StepStatus, Task, TaskConfig};

/// The standard validation pipeline stages, in order
pub const VALIDATION_STAGES: [&str; 4] = ["Format", "Lint", "Test", "Pre-commit"];

/// The structured verdict of a validation run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct PipelineResult {
    pub success: bool,
    #[serde(default)]
    pub stages: Vec<StageResult>,
    #[serde(default)]
    pub output: Option<String>,
}

/// One stage of a validation pipeline run
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StageResult {
    pub name: String,
    pub passed: bool,
    #[serde(default)]
    pub skipped: bool,
    #[serde(default)]
    pub output: Option<String>,
}

/// A passed/skipped record for one validation check.
/// The `skipped` key is omitted from the wire format when false.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ValidationCheck {
    pub name: String,
    pub passed: bool,
    #[serde(default, skip_serializing_if = "is_false")]
    pub skipped: bool,
}

fn is_false(b: &bool) -> bool {
    !b
}

impl ValidationCheck {
    pub fn passed(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: true,
            skipped: false,
        }
    }

    pub fn skipped(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            passed: false,
            skipped: true,
        }
    }
}

/// What one AI-assisted retry attempt produced
#[derive(Debug, Clone, Default)]
pub struct RetryOutcome {
    pub success: bool,
    pub files_changed: Vec<String>,
    /// Pipeline verdict of the re-run, if one happened
    pub pipeline_result: Option<PipelineResult>,
    pub output: Option<String>,
}

/// Capability for AI-assisted validation retry
#[async_trait]
pub trait ValidationRetryHandler: Send + Sync {
    fn is_enabled(&self) -> bool;

    fn max_attempts(&self) -> u32;

    /// Whether another attempt should run at this attempt number
    fn can_retry(&self, attempt: u32) -> bool;

    async fn retry_with_ai(
        &self,
        ctx: &CancellationToken,
        pipeline_result: &PipelineResult,
        work_dir: &Path,
        attempt: u32,
        config: &TaskConfig,
    ) -> Result<RetryOutcome, EngineError>;
}

/// Extract the pipeline result payload from a failed step result
pub(crate) fn pipeline_result_from(result: &StepResult) -> Option<PipelineResult> {
    result
        .metadata
        .get("pipeline_result")
        .and_then(|v| serde_json::from_value(v.clone()).ok())
}

/// Whether a failed validation step qualifies for the retry loop
pub(crate) fn retry_eligible(
    handler: Option<&Arc<dyn ValidationRetryHandler>>,
    failed_result: Option<&StepResult>,
) -> bool {
    let Some(handler) = handler else {
        return false;
    };
    if !handler.is_enabled() {
        return false;
    }
    failed_result.is_some_and(|r| pipeline_result_from(r).is_some())
}

/// Run the bounded AI-assisted retry loop for a failed validation step.
///
/// On success returns a synthetic success result carrying the check list and
/// retry bookkeeping, and records the winning attempt in task metadata. When
/// every attempt fails, the last error is returned.
pub(crate) async fn run_validation_retry(
    handler: &Arc<dyn ValidationRetryHandler>,
    ctx: &CancellationToken,
    task: &mut Task,
    step_index: usize,
    step_name: &str,
    failed_result: &StepResult,
    progress: Option<&ProgressCallback>,
) -> Result<StepResult, EngineError> {
    let mut pipeline =
        pipeline_result_from(failed_result).ok_or(EngineError::PipelineResultNotFound)?;

    let work_dir = task
        .metadata
        .worktree_dir()
        .map(ToString::to_string)
        .ok_or_else(|| EngineError::WorkDirNotFound("<unset>".to_string()))?;
    let work_dir = Path::new(&work_dir);
    if !work_dir.exists() {
        return Err(EngineError::WorkDirNotFound(
            work_dir.display().to_string(),
        ));
    }

    let max_attempts = handler.max_attempts();
    let start_attempt = task.metadata.validation_attempt() + 1;
    let mut last_error: Option<EngineError> = None;

    for attempt in start_attempt..=max_attempts {
        if ctx.is_cancelled() {
            return Err(EngineError::Canceled);
        }
        if !handler.can_retry(attempt) {
            debug!(attempt, "retry handler declined further attempts");
            break;
        }

        if let Some(callback) = progress {
            let mut event = StepProgressEvent::for_step(
                ProgressEventType::Retry,
                task,
                step_index,
                step_name,
                crate::task::StepType::Validation,
            );
            event.output = Some(format!("validation retry attempt {attempt}/{max_attempts}"));
            callback(event);
        }

        info!(task_id = %task.id, attempt, max_attempts, "retrying validation with AI");
        match handler
            .retry_with_ai(ctx, &pipeline, work_dir, attempt, &task.config)
            .await
        {
            Ok(outcome) if outcome.success => {
                task.metadata.set_validation_attempt(attempt);
                return Ok(success_result(step_index, step_name, attempt, &outcome));
            }
            Ok(outcome) => {
                debug!(attempt, "validation retry did not pass");
                if let Some(updated) = outcome.pipeline_result {
                    pipeline = updated;
                }
            }
            Err(e) => {
                warn!(attempt, error = %e, "validation retry attempt errored");
                last_error = Some(e);
            }
        }
    }

    Err(last_error.unwrap_or_else(|| {
        EngineError::other(format!(
            "validation failed after {max_attempts} AI-assisted retry attempts"
        ))
    }))
}

/// Build the synthetic success result for a winning retry attempt
fn success_result(
    step_index: usize,
    step_name: &str,
    attempt: u32,
    outcome: &RetryOutcome,
) -> StepResult {
    let checks: Vec<ValidationCheck> = VALIDATION_STAGES
        .iter()
        .map(|&stage| {
            let skipped = outcome
                .pipeline_result
                .as_ref()
                .and_then(|p| p.stages.iter().find(|s| s.name.eq_ignore_ascii_case(stage)))
                .is_some_and(|s| s.skipped);
            if skipped {
                ValidationCheck::skipped(stage)
            } else {
                ValidationCheck::passed(stage)
            }
        })
        .collect();

    let mut result = StepResult::new(step_index, step_name, StepStatus::Success)
        .with_metadata(
            "validation_checks",
            serde_json::to_value(&checks).unwrap_or_default(),
        )
        .with_metadata("retry_attempt", serde_json::json!(attempt))
        .with_metadata(
            "ai_files_changed",
            serde_json::json!(outcome.files_changed.len()),
        );
    result.files_changed = outcome.files_changed.clone();
    result.output = outcome.output.clone();
    result
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::{StepDefinition, StepType, TaskTemplate};
    use std::sync::atomic::{AtomicU32, Ordering};

    struct ScriptedRetry {
        succeed_on: u32,
        calls: AtomicU32,
    }

    #[async_trait]
    impl ValidationRetryHandler for ScriptedRetry {
        fn is_enabled(&self) -> bool {
            true
        }

        fn max_attempts(&self) -> u32 {
            3
        }

        fn can_retry(&self, attempt: u32) -> bool {
            attempt <= self.max_attempts()
        }

        async fn retry_with_ai(
            &self,
            _ctx: &CancellationToken,
            _pipeline_result: &PipelineResult,
            _work_dir: &Path,
            attempt: u32,
            _config: &TaskConfig,
        ) -> Result<RetryOutcome, EngineError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            Ok(RetryOutcome {
                success: attempt >= self.succeed_on,
                files_changed: vec!["fixed.go".to_string()],
                pipeline_result: None,
                output: None,
            })
        }
    }

    fn failed_validation_result() -> StepResult {
        StepResult::new(2, "validate", StepStatus::Failed).with_metadata(
            "pipeline_result",
            serde_json::json!({
                "success": false,
                "stages": [
                    {"name": "Format", "passed": true},
                    {"name": "Test", "passed": false}
                ]
            }),
        )
    }

    fn sample_task(worktree: &Path) -> Task {
        let template = TaskTemplate {
            id: "feature".to_string(),
            steps: vec![StepDefinition::new("validate", StepType::Validation)],
        };
        let mut task = Task::new(
            "task-20250101-120000",
            "default",
            "desc",
            &template,
            TaskConfig::default(),
        );
        task.metadata.insert(
            crate::task::metadata::keys::WORKTREE_DIR,
            serde_json::json!(worktree.display().to_string()),
        );
        task
    }

    #[test]
    fn test_check_wire_format_omits_false_skipped() {
        let json = serde_json::to_string(&ValidationCheck::passed("Format")).unwrap();
        assert_eq!(json, r#"{"name":"Format","passed":true}"#);

        let json = serde_json::to_string(&ValidationCheck::skipped("Pre-commit")).unwrap();
        assert_eq!(json, r#"{"name":"Pre-commit","passed":false,"skipped":true}"#);
    }

    #[test]
    fn test_eligibility_requires_payload() {
        let handler: Arc<dyn ValidationRetryHandler> = Arc::new(ScriptedRetry {
            succeed_on: 1,
            calls: AtomicU32::new(0),
        });

        let with_payload = failed_validation_result();
        let without_payload = StepResult::new(2, "validate", StepStatus::Failed);

        assert!(retry_eligible(Some(&handler), Some(&with_payload)));
        assert!(!retry_eligible(Some(&handler), Some(&without_payload)));
        assert!(!retry_eligible(None, Some(&with_payload)));
        assert!(!retry_eligible(Some(&handler), None));
    }

    #[tokio::test]
    async fn test_retry_succeeds_on_third_attempt() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut task = sample_task(dir.path());
        let handler: Arc<dyn ValidationRetryHandler> = Arc::new(ScriptedRetry {
            succeed_on: 3,
            calls: AtomicU32::new(0),
        });

        let ctx = CancellationToken::new();
        let result = run_validation_retry(
            &handler,
            &ctx,
            &mut task,
            2,
            "validate",
            &failed_validation_result(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(result.status, StepStatus::Success);
        assert_eq!(task.metadata.validation_attempt(), 3);
        assert_eq!(
            result.metadata.get("retry_attempt"),
            Some(&serde_json::json!(3))
        );
        assert_eq!(
            result.metadata.get("ai_files_changed"),
            Some(&serde_json::json!(1))
        );

        let checks: Vec<ValidationCheck> =
            serde_json::from_value(result.metadata.get("validation_checks").unwrap().clone())
                .unwrap();
        let names: Vec<&str> = checks.iter().map(|c| c.name.as_str()).collect();
        assert_eq!(names, vec!["Format", "Lint", "Test", "Pre-commit"]);
    }

    #[tokio::test]
    async fn test_retry_exhausts_attempts() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut task = sample_task(dir.path());
        let handler: Arc<dyn ValidationRetryHandler> = Arc::new(ScriptedRetry {
            succeed_on: 99,
            calls: AtomicU32::new(0),
        });

        let ctx = CancellationToken::new();
        let err = run_validation_retry(
            &handler,
            &ctx,
            &mut task,
            2,
            "validate",
            &failed_validation_result(),
            None,
        )
        .await
        .unwrap_err();

        assert!(err.to_string().contains("after 3"));
        // Attempt counter only advances on success
        assert_eq!(task.metadata.validation_attempt(), 0);
    }

    #[tokio::test]
    async fn test_retry_resumes_from_recorded_attempt() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut task = sample_task(dir.path());
        task.metadata.set_validation_attempt(2);

        let scripted = Arc::new(ScriptedRetry {
            succeed_on: 1,
            calls: AtomicU32::new(0),
        });
        let handler: Arc<dyn ValidationRetryHandler> = scripted.clone();

        let ctx = CancellationToken::new();
        run_validation_retry(
            &handler,
            &ctx,
            &mut task,
            2,
            "validate",
            &failed_validation_result(),
            None,
        )
        .await
        .unwrap();

        assert_eq!(task.metadata.validation_attempt(), 3);
        // Only the single remaining attempt ran
        assert_eq!(scripted.calls.load(Ordering::SeqCst), 1);
    }

    #[tokio::test]
    async fn test_missing_worktree_fails_preflight() {
        let mut task = sample_task(Path::new("/nonexistent/worktree/path"));
        let handler: Arc<dyn ValidationRetryHandler> = Arc::new(ScriptedRetry {
            succeed_on: 1,
            calls: AtomicU32::new(0),
        });

        let ctx = CancellationToken::new();
        let err = run_validation_retry(
            &handler,
            &ctx,
            &mut task,
            2,
            "validate",
            &failed_validation_result(),
            None,
        )
        .await
        .unwrap_err();
        assert!(matches!(err, EngineError::WorkDirNotFound(_)));
    }

    #[tokio::test]
    async fn test_cancellation_checked_before_attempts() {
        let dir = tempfile::TempDir::new().unwrap();
        let mut task = sample_task(dir.path());
        let handler: Arc<dyn ValidationRetryHandler> = Arc::new(ScriptedRetry {
            succeed_on: 1,
            calls: AtomicU32::new(0),
        });

        let ctx = CancellationToken::new();
        ctx.cancel();
        let err = run_validation_retry(
            &handler,
            &ctx,
            &mut task,
            2,
            "validate",
            &failed_validation_result(),
            None,
        )
        .await
        .unwrap_err();
        assert!(err.is_canceled());
    }
}
