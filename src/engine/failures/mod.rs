//! Typed failure routing.
//!
//! A failed step result may carry a `failure_type` marker in its metadata.
//! The dispatcher routes the three specialized markers to dedicated recovery
//! handlers, each exposing a bounded set of user actions; anything else falls
//! through to the default step-type error classification.

pub mod ci;
pub mod github;
pub mod timeout;

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

use crate::error::EngineError;
use crate::task::TaskStatus;

pub use ci::{CiFailureAction, CiFailureHandler};
pub use github::{GhFailureAction, GhFailureHandler};
pub use timeout::{CiTimeoutAction, CiTimeoutHandler};

/// The typed failure markers the dispatcher understands
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureType {
    CiFailed,
    CiTimeout,
    GhFailed,
}

impl FailureType {
    /// Parse a metadata marker. Absent, empty, and unknown markers all map
    /// to `None` (the dispatcher then reports the failure as unhandled).
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "ci_failed" => Some(FailureType::CiFailed),
            "ci_timeout" => Some(FailureType::CiTimeout),
            "gh_failed" => Some(FailureType::GhFailed),
            _ => None,
        }
    }

    pub fn as_str(self) -> &'static str {
        match self {
            FailureType::CiFailed => "ci_failed",
            FailureType::CiTimeout => "ci_timeout",
            FailureType::GhFailed => "gh_failed",
        }
    }
}

/// What a recovery action did to the task
#[derive(Debug, Clone)]
pub struct RecoveryOutcome {
    /// Task status after the action
    pub status: TaskStatus,
    /// Whether the caller should now call `resume` to continue the task
    pub resume: bool,
}

/// Pull-request capability consumed by abandon-after-CI-failure
#[async_trait]
pub trait PrClient: Send + Sync {
    async fn convert_to_draft(&self, pr_number: u64) -> Result<(), EngineError>;
}

/// Overall outcome of a CI watch
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum CiOverallStatus {
    Success,
    Failure,
    Timeout,
}

/// The CI watcher's report, stashed in task metadata on failure
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiWatchReport {
    pub status: CiOverallStatus,
    /// How long the watcher observed CI before concluding
    #[serde(default)]
    pub elapsed_secs: u64,
    #[serde(default)]
    pub error: Option<String>,
    #[serde(default)]
    pub checks: Vec<CiCheck>,
}

impl CiWatchReport {
    /// The subset of checks in a failing bucket
    pub fn failed_checks(&self) -> Vec<&CiCheck> {
        self.checks.iter().filter(|c| c.is_failed()).collect()
    }
}

/// One CI check observed by the watcher
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct CiCheck {
    pub name: String,
    #[serde(default)]
    pub state: String,
    /// Coarse state: pass, fail, cancel, pending
    #[serde(default)]
    pub bucket: String,
    #[serde(default)]
    pub url: String,
    #[serde(default)]
    pub workflow: String,
    #[serde(default)]
    pub duration_secs: u64,
}

impl CiCheck {
    /// Buckets `fail` and `cancel` (case-insensitive) denote failures
    pub fn is_failed(&self) -> bool {
        self.bucket.eq_ignore_ascii_case("fail") || self.bucket.eq_ignore_ascii_case("cancel")
    }
}

/// The step index a retry-implementation action rewinds to: the step named
/// `implement`, falling back to the first AI step, then to 0.
pub(crate) fn find_implement_step_index(task: &crate::task::Task) -> usize {
    task.steps
        .iter()
        .position(|s| s.name == "implement")
        .or_else(|| {
            task.steps
                .iter()
                .position(|s| s.step_type == crate::task::StepType::Ai)
        })
        .unwrap_or(0)
}

/// Pick the most useful check URL for the user to open.
///
/// Prefers a failing check with a URL, falls back to any check with a URL,
/// and fails `empty-value` when no check carries one.
pub fn best_check_url(report: &CiWatchReport) -> Result<&str, EngineError> {
    if let Some(check) = report
        .checks
        .iter()
        .find(|c| c.is_failed() && !c.url.is_empty())
    {
        return Ok(&check.url);
    }
    if let Some(check) = report.checks.iter().find(|c| !c.url.is_empty()) {
        return Ok(&check.url);
    }
    Err(EngineError::EmptyValue("CI check URL".to_string()))
}

#[cfg(test)]
mod tests {
    use super::*;

    fn check(name: &str, bucket: &str, url: &str) -> CiCheck {
        CiCheck {
            name: name.to_string(),
            state: String::new(),
            bucket: bucket.to_string(),
            url: url.to_string(),
            workflow: "ci".to_string(),
            duration_secs: 10,
        }
    }

    fn report(checks: Vec<CiCheck>) -> CiWatchReport {
        CiWatchReport {
            status: CiOverallStatus::Failure,
            elapsed_secs: 120,
            error: None,
            checks,
        }
    }

    #[test]
    fn test_failure_type_parse() {
        assert_eq!(FailureType::parse("ci_failed"), Some(FailureType::CiFailed));
        assert_eq!(FailureType::parse("ci_timeout"), Some(FailureType::CiTimeout));
        assert_eq!(FailureType::parse("gh_failed"), Some(FailureType::GhFailed));
        assert_eq!(FailureType::parse(""), None);
        assert_eq!(FailureType::parse("validation_failed"), None);
    }

    #[test]
    fn test_bucket_classification_case_insensitive() {
        assert!(check("a", "fail", "").is_failed());
        assert!(check("a", "FAIL", "").is_failed());
        assert!(check("a", "Cancel", "").is_failed());
        assert!(!check("a", "pass", "").is_failed());
        assert!(!check("a", "pending", "").is_failed());
    }

    #[test]
    fn test_best_url_prefers_failed_check() {
        let r = report(vec![
            check("lint", "pass", "https://ci.example/lint"),
            check("test", "fail", "https://ci.example/test"),
        ]);
        assert_eq!(best_check_url(&r).unwrap(), "https://ci.example/test");
    }

    #[test]
    fn test_best_url_falls_back_to_any() {
        let r = report(vec![
            check("test", "fail", ""),
            check("lint", "pass", "https://ci.example/lint"),
        ]);
        assert_eq!(best_check_url(&r).unwrap(), "https://ci.example/lint");
    }

    #[test]
    fn test_best_url_empty_when_no_urls() {
        let r = report(vec![check("test", "fail", "")]);
        assert!(matches!(
            best_check_url(&r).unwrap_err(),
            EngineError::EmptyValue(_)
        ));
    }

    #[test]
    fn test_failed_checks_subset() {
        let r = report(vec![
            check("lint", "pass", ""),
            check("test", "fail", ""),
            check("build", "cancel", ""),
        ]);
        let failed: Vec<&str> = r.failed_checks().iter().map(|c| c.name.as_str()).collect();
        assert_eq!(failed, vec!["test", "build"]);
    }
}
