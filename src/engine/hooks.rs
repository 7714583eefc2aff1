//! Crash-recovery hook capability.
//!
//! A hook is a sidecar record mirroring task progress for an external
//! watcher, so an out-of-process monitor can detect crashed tasks and offer
//! recovery. Every hook call the engine makes is best-effort: failures are
//! logged as warnings and never fail the owning task operation.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use uuid::Uuid;

use crate::engine::retry::ValidationCheck;
use crate::error::EngineError;
use crate::task::Task;

/// Step state mirrored to the hook record
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum HookStepState {
    Running,
    Complete,
    Failed,
}

impl std::fmt::Display for HookStepState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            HookStepState::Running => "step_running",
            HookStepState::Complete => "step_complete",
            HookStepState::Failed => "step_failed",
        };
        write!(f, "{s}")
    }
}

/// Capability set for the crash-recovery sidecar.
///
/// Implementers may satisfy the lifecycle, step, checkpoint, and receipt
/// groups independently; the engine only ever calls them best-effort.
#[async_trait]
pub trait RecoveryHooks: Send + Sync {
    /// Record that a task now exists
    async fn create_hook(&self, task: &Task) -> Result<(), EngineError>;

    /// Mark the hook ready: the task entered its step loop
    async fn ready_hook(&self, task: &Task) -> Result<(), EngineError>;

    /// Mirror a step state change
    async fn transition_step(
        &self,
        task: &Task,
        step_index: usize,
        state: HookStepState,
    ) -> Result<(), EngineError>;

    /// Record a completed step and the files it changed
    async fn complete_step(
        &self,
        task: &Task,
        step_index: usize,
        files_changed: &[String],
    ) -> Result<(), EngineError>;

    /// Record a failed step
    async fn fail_step(
        &self,
        task: &Task,
        step_index: usize,
        error: &str,
    ) -> Result<(), EngineError>;

    /// Mark the whole task complete
    async fn complete_task(&self, task: &Task) -> Result<(), EngineError>;

    /// Mark the whole task failed or interrupted
    async fn fail_task(&self, task: &Task, reason: &str) -> Result<(), EngineError>;

    /// Begin periodic checkpointing for a long-running task
    async fn start_interval_checkpointing(&self, task: &Task) -> Result<(), EngineError>;

    /// Stop periodic checkpointing
    async fn stop_interval_checkpointing(&self, task_id: &str) -> Result<(), EngineError>;

    /// Store a signed assertion that a validation step passed
    async fn create_validation_receipt(
        &self,
        receipt: &ValidationReceipt,
    ) -> Result<(), EngineError>;
}

/// A signed assertion that a validation step passed
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ValidationReceipt {
    pub task_id: String,
    pub step_index: usize,
    pub checks: Vec<ValidationCheck>,
    pub created_at: DateTime<Utc>,
    /// One-shot token making every receipt unique
    pub nonce: String,
    /// Hex-encoded SHA-256 over the canonical payload
    pub signature: String,
}

impl ValidationReceipt {
    /// Build and sign a receipt for the given checks
    pub fn new(task_id: impl Into<String>, step_index: usize, checks: Vec<ValidationCheck>) -> Self {
        let mut receipt = Self {
            task_id: task_id.into(),
            step_index,
            checks,
            created_at: Utc::now(),
            nonce: Uuid::new_v4().to_string(),
            signature: String::new(),
        };
        receipt.signature = receipt.compute_signature();
        receipt
    }

    /// Deterministic payload the signature covers
    fn canonical_payload(&self) -> String {
        let checks = self
            .checks
            .iter()
            .map(|c| format!("{}:{}", c.name, c.passed))
            .collect::<Vec<_>>()
            .join(",");
        format!(
            "{}|{}|{}|{}|{}",
            self.task_id,
            self.step_index,
            checks,
            self.created_at.to_rfc3339(),
            self.nonce
        )
    }

    fn compute_signature(&self) -> String {
        let mut hasher = Sha256::new();
        hasher.update(self.canonical_payload().as_bytes());
        hex::encode(hasher.finalize())
    }

    /// Check the signature against the receipt's own payload
    pub fn verify(&self) -> bool {
        self.signature == self.compute_signature()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample_checks() -> Vec<ValidationCheck> {
        vec![
            ValidationCheck::passed("Format"),
            ValidationCheck::passed("Lint"),
            ValidationCheck::passed("Test"),
            ValidationCheck::passed("Pre-commit"),
        ]
    }

    #[test]
    fn test_receipt_verifies() {
        let receipt = ValidationReceipt::new("task-20250101-120000", 2, sample_checks());
        assert!(!receipt.signature.is_empty());
        assert!(receipt.verify());
    }

    #[test]
    fn test_tampered_receipt_fails_verification() {
        let mut receipt = ValidationReceipt::new("task-20250101-120000", 2, sample_checks());
        receipt.step_index = 3;
        assert!(!receipt.verify());
    }

    #[test]
    fn test_receipts_have_unique_nonces() {
        let a = ValidationReceipt::new("task-20250101-120000", 0, sample_checks());
        let b = ValidationReceipt::new("task-20250101-120000", 0, sample_checks());
        assert_ne!(a.nonce, b.nonce);
        assert_ne!(a.signature, b.signature);
    }

    #[test]
    fn test_hook_step_state_display() {
        assert_eq!(HookStepState::Running.to_string(), "step_running");
        assert_eq!(HookStepState::Complete.to_string(), "step_complete");
        assert_eq!(HookStepState::Failed.to_string(), "step_failed");
    }
}
