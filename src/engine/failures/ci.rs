//! CI-failure recovery.
//!
//! When a CI watch step reports failing checks, the task parks in
//! `ci_failed` with the watcher's report stashed in metadata, and the user
//! picks one of a bounded set of recovery actions.

use std::sync::Arc;

use chrono::Utc;
use tracing::{info, warn};

use crate::browser::{SystemUrlOpener, UrlOpener};
use crate::engine::failures::{
    best_check_url, find_implement_step_index, CiWatchReport, PrClient, RecoveryOutcome,
};
use crate::error::EngineError;
use crate::store::TaskStore;
use crate::task::metadata::keys;
use crate::task::{state_machine, StepResult, Task, TaskStatus};

/// User recovery actions for a CI failure
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum CiFailureAction {
    /// Open the most useful failing check URL in the browser
    ViewLogs,
    /// Rewind to the implementation step and re-run with failure context
    RetryImplement,
    /// Record instructions for a manual fix; the task stays parked
    FixManually(String),
    /// Give up: convert the PR to draft (best-effort) and abandon
    Abandon,
}

/// Handles CI-failure recovery for parked tasks
pub struct CiFailureHandler {
    url_opener: Arc<dyn UrlOpener>,
    pr_client: Option<Arc<dyn PrClient>>,
}

impl Default for CiFailureHandler {
    fn default() -> Self {
        Self::new()
    }
}

impl CiFailureHandler {
    pub fn new() -> Self {
        Self {
            url_opener: Arc::new(SystemUrlOpener),
            pr_client: None,
        }
    }

    pub fn with_url_opener(mut self, opener: Arc<dyn UrlOpener>) -> Self {
        self.url_opener = opener;
        self
    }

    pub fn with_pr_client(mut self, client: Arc<dyn PrClient>) -> Self {
        self.pr_client = Some(client);
        self
    }

    /// Park a task in `ci_failed`: stash the watcher's report, persist a
    /// `ci-result.json` artifact (best-effort), and transition.
    pub(crate) fn handle_failure(
        &self,
        store: &TaskStore,
        task: &mut Task,
        result: &StepResult,
    ) -> Result<(), EngineError> {
        if let Some(report_value) = result.metadata.get(keys::CI_FAILURE_RESULT) {
            task.metadata
                .insert(keys::CI_FAILURE_RESULT, report_value.clone());

            if let Ok(report) = serde_json::from_value::<CiWatchReport>(report_value.clone()) {
                self.save_report_artifact(store, task, &report);
            }
        }

        state_machine::transition(task, TaskStatus::CiFailed, "CI checks failed")?;
        store.update(task)
    }

    /// Apply a user recovery action to a task parked in `ci_failed`
    pub(crate) async fn process_action(
        &self,
        store: &TaskStore,
        task: &mut Task,
        action: CiFailureAction,
    ) -> Result<RecoveryOutcome, EngineError> {
        match action {
            CiFailureAction::ViewLogs => {
                let report = self.stashed_report(task)?;
                let url = best_check_url(&report)?;
                self.url_opener.open(url)?;
                Ok(RecoveryOutcome {
                    status: task.status,
                    resume: false,
                })
            }

            CiFailureAction::RetryImplement => {
                let index = find_implement_step_index(task);
                task.current_step = index;

                if let Ok(report) = self.stashed_report(task) {
                    task.metadata
                        .insert(keys::RETRY_CONTEXT, serde_json::json!(retry_context(&report)));
                }

                state_machine::transition(
                    task,
                    TaskStatus::Running,
                    "retrying implementation after CI failure",
                )?;
                store.update(task)?;
                info!(task_id = %task.id, index, "rewound to implementation step");
                Ok(RecoveryOutcome {
                    status: TaskStatus::Running,
                    resume: true,
                })
            }

            CiFailureAction::FixManually(instructions) => {
                task.metadata
                    .insert(keys::MANUAL_FIX_INSTRUCTIONS, serde_json::json!(instructions));
                store.update(task)?;
                Ok(RecoveryOutcome {
                    status: task.status,
                    resume: false,
                })
            }

            CiFailureAction::Abandon => {
                self.convert_pr_to_draft(task).await;
                state_machine::transition(task, TaskStatus::Abandoned, "abandoned after CI failure")?;
                store.update(task)?;
                Ok(RecoveryOutcome {
                    status: TaskStatus::Abandoned,
                    resume: false,
                })
            }
        }
    }

    fn stashed_report(&self, task: &Task) -> Result<CiWatchReport, EngineError> {
        let value = task
            .metadata
            .get(keys::CI_FAILURE_RESULT)
            .ok_or_else(|| EngineError::EmptyValue("stashed CI failure report".to_string()))?;
        serde_json::from_value(value.clone()).map_err(EngineError::from)
    }

    fn save_report_artifact(&self, store: &TaskStore, task: &Task, report: &CiWatchReport) {
        let artifact = serde_json::json!({
            "status": report.status,
            "elapsed_secs": report.elapsed_secs,
            "timestamp": Utc::now(),
            "checks": report.checks,
            "failed_checks": report.failed_checks(),
        });

        let bytes = match serde_json::to_vec_pretty(&artifact) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!(task_id = %task.id, error = %e, "could not serialize CI report artifact");
                return;
            }
        };

        if let Err(e) = store.save_artifact(&task.workspace_id, &task.id, "ci-result.json", &bytes)
        {
            warn!(task_id = %task.id, error = %e, "could not save CI report artifact");
        }
    }

    /// Best-effort: a failed PR stays open but reviewers should not look at it
    async fn convert_pr_to_draft(&self, task: &Task) {
        let Some(client) = &self.pr_client else {
            return;
        };
        let pr_number = task.metadata.pr_number();
        if pr_number == 0 {
            return;
        }
        if let Err(e) = client.convert_to_draft(pr_number).await {
            warn!(task_id = %task.id, pr_number, error = %e, "could not convert PR to draft");
        }
    }
}

/// Render AI-readable failure context for the implementation retry
fn retry_context(report: &CiWatchReport) -> String {
    let mut out = String::from("## CI Failure Context\n\n");
    out.push_str(
        "The previous implementation passed local validation but failed CI. \
         Address the failing checks below before making further changes.\n\n",
    );

    if let Some(error) = &report.error {
        out.push_str(&format!("Watcher error: {error}\n\n"));
    }

    let failed = report.failed_checks();
    if failed.is_empty() {
        out.push_str("No individual check details were reported.\n");
    } else {
        out.push_str("Failing checks:\n");
        for check in failed {
            out.push_str(&format!("- {} ({})", check.name, check.workflow));
            if !check.url.is_empty() {
                out.push_str(&format!(" — {}", check.url));
            }
            out.push('\n');
        }
    }
    out
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::failures::{CiCheck, CiOverallStatus};
    use crate::task::{StepDefinition, StepStatus, StepType, TaskConfig, TaskTemplate};
    use async_trait::async_trait;
    use std::sync::atomic::{AtomicBool, Ordering};
    use std::sync::Mutex;
    use tempfile::TempDir;

    struct RecordingOpener {
        opened: Mutex<Vec<String>>,
    }

    impl UrlOpener for RecordingOpener {
        fn open(&self, url: &str) -> Result<(), EngineError> {
            self.opened.lock().unwrap().push(url.to_string());
            Ok(())
        }
    }

    struct RecordingPrClient {
        drafted: AtomicBool,
    }

    #[async_trait]
    impl PrClient for RecordingPrClient {
        async fn convert_to_draft(&self, _pr_number: u64) -> Result<(), EngineError> {
            self.drafted.store(true, Ordering::SeqCst);
            Ok(())
        }
    }

    fn sample_report() -> CiWatchReport {
        CiWatchReport {
            status: CiOverallStatus::Failure,
            elapsed_secs: 300,
            error: None,
            checks: vec![CiCheck {
                name: "test".to_string(),
                state: "completed".to_string(),
                bucket: "fail".to_string(),
                url: "https://ci.example/run/1".to_string(),
                workflow: "ci".to_string(),
                duration_secs: 120,
            }],
        }
    }

    fn parked_task(store: &TaskStore) -> Task {
        let template = TaskTemplate {
            id: "feature".to_string(),
            steps: vec![
                StepDefinition::new("analyze", StepType::Ai),
                StepDefinition::new("implement", StepType::Ai),
                StepDefinition::new("validate", StepType::Validation),
                StepDefinition::new("push", StepType::Git),
                StepDefinition::new("ci_wait", StepType::Ci),
            ],
        };
        let mut task = Task::new(
            "task-20250101-120000",
            "default",
            "desc",
            &template,
            TaskConfig::default(),
        );
        store.create(&mut task).unwrap();
        state_machine::transition(&mut task, TaskStatus::Running, "task started").unwrap();
        task.current_step = 4;
        task.metadata.insert(
            keys::CI_FAILURE_RESULT,
            serde_json::to_value(sample_report()).unwrap(),
        );
        state_machine::transition(&mut task, TaskStatus::CiFailed, "CI checks failed").unwrap();
        store.update(&mut task).unwrap();
        task
    }

    #[tokio::test]
    async fn test_retry_implement_rewinds_to_implement() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        let mut task = parked_task(&store);

        let handler = CiFailureHandler::new();
        let outcome = handler
            .process_action(&store, &mut task, CiFailureAction::RetryImplement)
            .await
            .unwrap();

        assert_eq!(outcome.status, TaskStatus::Running);
        assert!(outcome.resume);
        assert_eq!(task.current_step, 1);
        assert_eq!(task.status, TaskStatus::Running);

        let context = task.metadata.get_str(keys::RETRY_CONTEXT).unwrap();
        assert!(context.starts_with("## CI Failure Context"));
        assert!(context.contains("https://ci.example/run/1"));
    }

    #[tokio::test]
    async fn test_view_logs_opens_best_url() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        let mut task = parked_task(&store);

        let opener = Arc::new(RecordingOpener {
            opened: Mutex::new(Vec::new()),
        });
        let handler = CiFailureHandler::new().with_url_opener(opener.clone());

        handler
            .process_action(&store, &mut task, CiFailureAction::ViewLogs)
            .await
            .unwrap();

        assert_eq!(
            *opener.opened.lock().unwrap(),
            vec!["https://ci.example/run/1".to_string()]
        );
        assert_eq!(task.status, TaskStatus::CiFailed);
    }

    #[tokio::test]
    async fn test_fix_manually_stays_parked() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        let mut task = parked_task(&store);

        let handler = CiFailureHandler::new();
        let outcome = handler
            .process_action(
                &store,
                &mut task,
                CiFailureAction::FixManually("bump the fixture\nthen rerun".to_string()),
            )
            .await
            .unwrap();

        assert_eq!(outcome.status, TaskStatus::CiFailed);
        assert!(!outcome.resume);
        assert_eq!(
            task.metadata.get_str(keys::MANUAL_FIX_INSTRUCTIONS),
            Some("bump the fixture\nthen rerun")
        );
    }

    #[tokio::test]
    async fn test_abandon_converts_pr_to_draft() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());
        let mut task = parked_task(&store);
        task.metadata.insert(keys::PR_NUMBER, serde_json::json!(77));

        let pr_client = Arc::new(RecordingPrClient {
            drafted: AtomicBool::new(false),
        });
        let handler = CiFailureHandler::new().with_pr_client(pr_client.clone());

        let outcome = handler
            .process_action(&store, &mut task, CiFailureAction::Abandon)
            .await
            .unwrap();

        assert_eq!(outcome.status, TaskStatus::Abandoned);
        assert_eq!(task.status, TaskStatus::Abandoned);
        assert!(pr_client.drafted.load(Ordering::SeqCst));
    }

    #[tokio::test]
    async fn test_handle_failure_stashes_report_and_artifact() {
        let dir = TempDir::new().unwrap();
        let store = TaskStore::new(dir.path());

        let template = TaskTemplate {
            id: "feature".to_string(),
            steps: vec![StepDefinition::new("ci_wait", StepType::Ci)],
        };
        let mut task = Task::new(
            "task-20250101-120000",
            "default",
            "desc",
            &template,
            TaskConfig::default(),
        );
        store.create(&mut task).unwrap();
        state_machine::transition(&mut task, TaskStatus::Running, "task started").unwrap();

        let result = StepResult::new(0, "ci_wait", StepStatus::Failed).with_metadata(
            keys::CI_FAILURE_RESULT,
            serde_json::to_value(sample_report()).unwrap(),
        );

        let handler = CiFailureHandler::new();
        handler.handle_failure(&store, &mut task, &result).unwrap();

        assert_eq!(task.status, TaskStatus::CiFailed);
        assert!(task.metadata.contains(keys::CI_FAILURE_RESULT));

        let artifacts = store.list_artifacts("default", &task.id).unwrap();
        assert_eq!(artifacts, vec!["ci-result.json"]);
        let bytes = store
            .get_artifact("default", &task.id, "ci-result.json")
            .unwrap();
        let parsed: serde_json::Value = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(parsed["status"], "failure");
        assert_eq!(parsed["failed_checks"].as_array().unwrap().len(), 1);
    }

    #[test]
    fn test_implement_index_falls_back_to_first_ai() {
        let template = TaskTemplate {
            id: "hotfix".to_string(),
            steps: vec![
                StepDefinition::new("commit", StepType::Git),
                StepDefinition::new("patch", StepType::Ai),
            ],
        };
        let task = Task::new(
            "task-20250101-120000",
            "default",
            "desc",
            &template,
            TaskConfig::default(),
        );
        assert_eq!(find_implement_step_index(&task), 1);

        let template = TaskTemplate {
            id: "gitonly".to_string(),
            steps: vec![StepDefinition::new("commit", StepType::Git)],
        };
        let task = Task::new(
            "task-20250101-130000",
            "default",
            "desc",
            &template,
            TaskConfig::default(),
        );
        assert_eq!(find_implement_step_index(&task), 0);
    }
}
