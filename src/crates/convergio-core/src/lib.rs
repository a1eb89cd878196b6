//! # convergio-core — workflow graphs, state and the collaborator traits
//!
//! Foundation crate of the Convergio orchestration workspace. It owns:
//!
//! - the engine-facing **error taxonomy** and message classification
//!   ([`error`]),
//! - validated **workflow state** with sanitized values ([`state`]),
//! - the **workflow graph** of typed nodes with id-based (non-owning) edges
//!   and the routing rules ([`graph`]),
//! - **Mermaid export** of graphs ([`visualization`]),
//! - the **ethical guardrails** classifier and approval gating
//!   ([`guardrails`]),
//! - the **provider and tool traits** external collaborators implement
//!   ([`provider`]),
//! - **telemetry** counters, provider statistics and audit helpers
//!   ([`telemetry`]),
//! - the cooperative **cancellation token** ([`cancel`]).
//!
//! Higher layers (`convergio-agents`, `convergio-store`, `convergio-engine`,
//! `convergio`) build the registry, persistence, workflow engine and the
//! chief orchestrator on top of these types.

pub mod agent_id;
pub mod cancel;
pub mod error;
pub mod graph;
pub mod guardrails;
pub mod provider;
pub mod state;
pub mod telemetry;
pub mod visualization;

pub use agent_id::{AgentId, BROADCAST, CHIEF};
pub use cancel::CancelToken;
pub use error::{CoreError, ErrorKind, Result};
pub use graph::{NodeId, NodeType, Workflow, WorkflowNode, WorkflowStatus};
pub use guardrails::{Classification, Guardrails, SensitiveCategory, Verdict};
pub use provider::{
    ChatProvider, ChatTurn, ChatUsage, ProviderKind, StreamCallback, Tool, ToolRegistry, ToolSpec,
    ToolUse,
};
pub use state::{StateEntry, StateSnapshotEntry, WorkflowState};
pub use telemetry::{ProviderStats, Telemetry, TelemetrySnapshot};
