//! # convergio-engine — workflow execution and task decomposition
//!
//! Two executors live here:
//!
//! - [`engine::WorkflowEngine`] walks a workflow graph: per-node-type
//!   execution, conditional routing, exponential-backoff retries on
//!   transient errors, pause/resume/cancel, and append-only checkpoints
//!   persisted through `convergio-store`;
//! - [`decomposer::TaskDecomposer`] asks the model to break a goal into a
//!   DAG of role-tagged subtasks, validates the payload defensively,
//!   rejects cycles, and executes ready tasks in parallel waves.
//!
//! Both record usage through the cost controller and honor the process-wide
//! cancellation token.

pub mod decomposer;
pub mod engine;
pub mod error;
pub mod retry;

pub use decomposer::{
    get_ready, parse_tasks, resolve_dependencies, topological_sort, DecomposedStatus,
    DecomposedTask, TaskDecomposer,
};
pub use engine::{EngineConfig, WorkflowEngine, NODE_TIMEOUT_KEY};
pub use error::{EngineError, Result};
pub use retry::{with_retry, RetryPolicy, MAX_DELAY_SECS};
