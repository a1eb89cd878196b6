//! Engine error type

use convergio_core::{CoreError, ErrorKind};
use convergio_store::StoreError;
use thiserror::Error;
use uuid::Uuid;

pub type Result<T> = std::result::Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("workflow has no entry node")]
    NoEntryNode,

    #[error("invalid control transition: {0}")]
    Control(String),

    #[error("node type {0} is not supported by this engine")]
    UnsupportedNode(&'static str),

    #[error("agent not found for node {node}")]
    AgentNotFound { node: u64 },

    #[error("budget exceeded")]
    BudgetExceeded,

    #[error("checkpoint {checkpoint} does not belong to workflow {workflow}")]
    CheckpointMismatch { checkpoint: Uuid, workflow: Uuid },

    #[error("operation denied by human review: {0}")]
    Denied(String),

    #[error("task decomposition failed: {0}")]
    Decompose(String),

    #[error("task graph contains a cycle through task {0}")]
    CycleDetected(usize),

    #[error("cancelled")]
    Cancelled,

    #[error(transparent)]
    Core(#[from] CoreError),

    #[error(transparent)]
    Store(#[from] StoreError),
}

impl EngineError {
    /// Taxonomy kind used by the retry policy
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Core(e) => e.kind(),
            Self::AgentNotFound { .. } => ErrorKind::AgentNotFound,
            Self::BudgetExceeded => ErrorKind::CreditExhausted,
            Self::Store(_) => ErrorKind::FileIo,
            Self::Cancelled => ErrorKind::Unknown,
            _ => ErrorKind::Unknown,
        }
    }

    /// Whether the retry policy may retry this error
    pub fn is_retryable(&self) -> bool {
        self.kind().is_retryable()
    }
}
