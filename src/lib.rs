//! Conductor - durable task execution engine for AI-assisted
//! software-change workflows.
//!
//! A task progresses through a declared sequence of heterogeneous steps
//! (AI calls, validation pipelines, git operations, CI monitoring,
//! human-approval gates). The engine orchestrates those steps, validates
//! every status change against the task state machine, persists state
//! atomically after each transition, routes typed failures to dedicated
//! recovery handlers, and supports cancellation, pausing, and abandonment.
//!
//! External collaborators (agent runners, validation runners, git/PR/CI
//! clients, notifiers, backlog sync) are consumed as capability traits; this
//! crate never talks to the network itself.

pub mod browser;
pub mod config;
pub mod engine;
pub mod error;
pub mod logging;
pub mod process;
pub mod store;
pub mod task;

pub use config::EngineConfig;
pub use engine::{
    BacklogSync, CiFailureAction, CiFailureHandler, CiTimeoutAction, CiTimeoutHandler, Engine,
    EngineOption, ExecutionFailure, ExecutorRegistry, FailureType, GhFailureAction,
    GhFailureHandler, MetricsSink, NoopMetrics, PrClient, ProgressCallback, ProgressEventType,
    RecoveryHooks, RecoveryOutcome, StartRequest, StateChangeNotifier, StepExecutor,
    StepProgressEvent, ValidationReceipt, ValidationRetryHandler,
};
pub use error::EngineError;
pub use process::ProcessManager;
pub use store::TaskStore;
pub use task::{
    Step, StepDefinition, StepResult, StepStatus, StepType, Task, TaskConfig, TaskStatus,
    TaskTemplate, TransitionRecord,
};
