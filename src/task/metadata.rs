//! Typed accessor layer over the task's dynamic metadata map.
//!
//! Metadata is a heterogeneous string-to-value mapping persisted as JSON.
//! Well-known keys get typed accessors here; everything else goes through the
//! untyped escape hatch. PR numbers need lenient numeric decoding because the
//! persisted map does not preserve integer width.

use serde::{Deserialize, Serialize};

/// Well-known metadata keys
pub mod keys {
    pub const BRANCH: &str = "branch";
    pub const WORKTREE_DIR: &str = "worktree_dir";
    pub const FROM_BACKLOG_ID: &str = "from_backlog_id";
    pub const PR_NUMBER: &str = "pr_number";
    pub const FAILURE_TYPE: &str = "failure_type";
    pub const LAST_ERROR: &str = "last_error";
    pub const CI_FAILURE_RESULT: &str = "ci_failure_result";
    pub const RETRY_CONTEXT: &str = "retry_context";
    pub const VALIDATION_ATTEMPT: &str = "validation_attempt";
    pub const STEP_APPROVAL_CHOICE: &str = "step_approval_choice";
    pub const SKIP_GIT_STEPS: &str = "skip_git_steps";
    pub const NO_ISSUES_DETECTED: &str = "no_issues_detected";
    pub const SKIP_STEPS: &str = "skip_steps";
    pub const MANUAL_FIX_INSTRUCTIONS: &str = "manual_fix_instructions";
    pub const AWAITING_MANUAL_FIX: &str = "awaiting_manual_fix";
    pub const EXTENDED_CI_TIMEOUT: &str = "extended_ci_timeout";
}

/// What the user chose for a step awaiting approval
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ApprovalChoice {
    /// Go back one step and redo it
    Rewind,
    /// Mark the current step skipped and move on
    Skip,
    /// Approve as-is and continue
    Accept,
}

impl ApprovalChoice {
    pub fn parse(value: &str) -> Option<Self> {
        match value {
            "rewind" => Some(ApprovalChoice::Rewind),
            "skip" => Some(ApprovalChoice::Skip),
            "accept" => Some(ApprovalChoice::Accept),
            _ => None,
        }
    }
}

/// The task's dynamic metadata mapping
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
#[serde(transparent)]
pub struct TaskMetadata(serde_json::Map<String, serde_json::Value>);

impl TaskMetadata {
    pub fn new() -> Self {
        Self::default()
    }

    // ── untyped escape hatch ─────────────────────────────────────────────

    pub fn get(&self, key: &str) -> Option<&serde_json::Value> {
        self.0.get(key)
    }

    pub fn insert(&mut self, key: impl Into<String>, value: serde_json::Value) {
        self.0.insert(key.into(), value);
    }

    pub fn remove(&mut self, key: &str) -> Option<serde_json::Value> {
        self.0.remove(key)
    }

    pub fn contains(&self, key: &str) -> bool {
        self.0.contains_key(key)
    }

    pub fn is_empty(&self) -> bool {
        self.0.is_empty()
    }

    // ── typed readers ────────────────────────────────────────────────────

    pub fn get_str(&self, key: &str) -> Option<&str> {
        self.0.get(key).and_then(|v| v.as_str())
    }

    pub fn get_bool(&self, key: &str) -> bool {
        self.0.get(key).and_then(|v| v.as_bool()).unwrap_or(false)
    }

    pub fn get_u32(&self, key: &str) -> Option<u32> {
        self.0.get(key).and_then(|v| v.as_u64()).map(|n| n as u32)
    }

    /// Read `pr_number` leniently: integer-wide, large-integer, and
    /// floating-point encodings are accepted; strings are rejected
    /// (treated as 0).
    pub fn pr_number(&self) -> u64 {
        match self.0.get(keys::PR_NUMBER) {
            Some(serde_json::Value::Number(n)) => {
                if let Some(u) = n.as_u64() {
                    u
                } else if let Some(i) = n.as_i64() {
                    if i > 0 {
                        i as u64
                    } else {
                        0
                    }
                } else if let Some(f) = n.as_f64() {
                    if f > 0.0 {
                        f as u64
                    } else {
                        0
                    }
                } else {
                    0
                }
            }
            _ => 0,
        }
    }

    // ── well-known keys ──────────────────────────────────────────────────

    pub fn branch(&self) -> Option<&str> {
        self.get_str(keys::BRANCH)
    }

    pub fn worktree_dir(&self) -> Option<&str> {
        self.get_str(keys::WORKTREE_DIR)
    }

    pub fn from_backlog_id(&self) -> Option<&str> {
        self.get_str(keys::FROM_BACKLOG_ID)
    }

    pub fn failure_type(&self) -> Option<&str> {
        self.get_str(keys::FAILURE_TYPE)
    }

    pub fn skip_git_steps(&self) -> bool {
        self.get_bool(keys::SKIP_GIT_STEPS)
    }

    pub fn no_issues_detected(&self) -> bool {
        self.get_bool(keys::NO_ISSUES_DETECTED)
    }

    /// Step names explicitly marked for skipping by prior handlers
    pub fn skip_steps(&self) -> Vec<String> {
        self.0
            .get(keys::SKIP_STEPS)
            .and_then(|v| v.as_array())
            .map(|arr| {
                arr.iter()
                    .filter_map(|v| v.as_str().map(str::to_string))
                    .collect()
            })
            .unwrap_or_default()
    }

    /// Add a step name to the explicit skip list (deduplicated)
    pub fn add_skip_step(&mut self, name: &str) {
        let mut steps = self.skip_steps();
        if !steps.iter().any(|s| s == name) {
            steps.push(name.to_string());
        }
        self.insert(keys::SKIP_STEPS, serde_json::json!(steps));
    }

    /// Validation retry attempt counter; absent means no retries yet
    pub fn validation_attempt(&self) -> u32 {
        self.get_u32(keys::VALIDATION_ATTEMPT).unwrap_or(0)
    }

    pub fn set_validation_attempt(&mut self, attempt: u32) {
        self.insert(keys::VALIDATION_ATTEMPT, serde_json::json!(attempt));
    }

    pub fn set_last_error(&mut self, error: &str) {
        self.insert(keys::LAST_ERROR, serde_json::json!(error));
    }

    pub fn set_failure_type(&mut self, failure_type: &str) {
        self.insert(keys::FAILURE_TYPE, serde_json::json!(failure_type));
    }

    /// The pending approval choice, if one was recorded for the next resume
    pub fn step_approval_choice(&self) -> Option<ApprovalChoice> {
        self.get_str(keys::STEP_APPROVAL_CHOICE)
            .and_then(ApprovalChoice::parse)
    }

    /// Consume the approval choice (deleted on apply)
    pub fn take_step_approval_choice(&mut self) -> Option<ApprovalChoice> {
        let choice = self.step_approval_choice();
        if choice.is_some() {
            self.0.remove(keys::STEP_APPROVAL_CHOICE);
        }
        choice
    }
}
