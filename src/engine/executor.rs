//! Step executor capability and registry.
//!
//! The engine resolves the current step's type to an executor capability and
//! owns updating `task.steps[current_step]`; the executor owns producing the
//! `StepResult`. Executors live outside this crate (AI agent runners,
//! validation runners, git operations, CI watchers, approval gates).

use std::collections::HashMap;
use std::sync::Arc;

use async_trait::async_trait;
use tokio_util::sync::CancellationToken;

use crate::error::EngineError;
use crate::task::{StepDefinition, StepResult, StepType, Task};

/// A step execution error, optionally carrying the partial result the
/// executor produced before failing. The partial result's metadata may hold
/// a pipeline result that makes the step eligible for AI-assisted retry.
#[derive(Debug)]
pub struct ExecutionFailure {
    pub error: EngineError,
    pub partial_result: Option<StepResult>,
}

impl ExecutionFailure {
    pub fn new(error: EngineError) -> Self {
        Self {
            error,
            partial_result: None,
        }
    }

    pub fn with_partial(error: EngineError, partial_result: StepResult) -> Self {
        Self {
            error,
            partial_result: Some(partial_result),
        }
    }
}

impl From<EngineError> for ExecutionFailure {
    fn from(error: EngineError) -> Self {
        Self::new(error)
    }
}

/// Capability to execute one step of a task
#[async_trait]
pub trait StepExecutor: Send + Sync {
    async fn execute(
        &self,
        ctx: &CancellationToken,
        task: &Task,
        step_def: &StepDefinition,
    ) -> Result<StepResult, ExecutionFailure>;
}

/// Maps step types to their executor capability
#[derive(Default, Clone)]
pub struct ExecutorRegistry {
    executors: HashMap<StepType, Arc<dyn StepExecutor>>,
}

impl ExecutorRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the executor for a step type, replacing any previous one
    pub fn register(&mut self, step_type: StepType, executor: Arc<dyn StepExecutor>) {
        self.executors.insert(step_type, executor);
    }

    /// Builder-style registration
    pub fn with_executor(mut self, step_type: StepType, executor: Arc<dyn StepExecutor>) -> Self {
        self.register(step_type, executor);
        self
    }

    /// Look up the executor for a step type
    pub fn get(&self, step_type: StepType) -> Option<Arc<dyn StepExecutor>> {
        self.executors.get(&step_type).cloned()
    }

    pub fn is_empty(&self) -> bool {
        self.executors.is_empty()
    }
}

impl std::fmt::Debug for ExecutorRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ExecutorRegistry")
            .field("step_types", &self.executors.keys().collect::<Vec<_>>())
            .finish()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::task::StepStatus;

    struct AlwaysSuccess;

    #[async_trait]
    impl StepExecutor for AlwaysSuccess {
        async fn execute(
            &self,
            _ctx: &CancellationToken,
            _task: &Task,
            step_def: &StepDefinition,
        ) -> Result<StepResult, ExecutionFailure> {
            Ok(StepResult::new(0, &step_def.name, StepStatus::Success))
        }
    }

    #[test]
    fn test_register_and_lookup() {
        let mut registry = ExecutorRegistry::new();
        assert!(registry.is_empty());
        assert!(registry.get(StepType::Ai).is_none());

        registry.register(StepType::Ai, Arc::new(AlwaysSuccess));
        assert!(registry.get(StepType::Ai).is_some());
        assert!(registry.get(StepType::Git).is_none());
    }

    #[test]
    fn test_builder_registration() {
        let executor: Arc<dyn StepExecutor> = Arc::new(AlwaysSuccess);
        let registry = ExecutorRegistry::new()
            .with_executor(StepType::Ai, executor.clone())
            .with_executor(StepType::Validation, executor);
        assert!(registry.get(StepType::Ai).is_some());
        assert!(registry.get(StepType::Validation).is_some());
        assert!(registry.get(StepType::Human).is_none());
    }
}
