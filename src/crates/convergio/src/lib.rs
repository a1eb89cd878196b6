//! # convergio — the chief orchestrator
//!
//! Application crate of the Convergio workspace. A user request enters
//! [`orchestrator::Orchestrator::process`], which assembles conversation
//! context (project, memories, semantic recall, recent turns), iterates the
//! provider tool-use loop, parses `[DELEGATE: name] reason` markers, fans
//! out to specialist agents under a bounded executor, and synthesizes their
//! responses into one reply. Responses are persisted to the session, the
//! message bus history and the attached plan.
//!
//! Provider transport, concrete tools and semantic memory are external
//! collaborators plugged in through the `convergio-core` traits.

pub mod cli;
pub mod config;
pub mod constitution;
pub mod error;
pub mod memory;
pub mod orchestrator;
pub mod usage_sink;

pub use config::Config;
pub use constitution::{chief_system_prompt, ALI_CONSTITUTION};
pub use error::{ConvergioError, Result};
pub use memory::{MemoryHit, ProjectContext, SemanticMemory, SessionHistory, SessionTurn};
pub use orchestrator::delegation::{parse_delegations, Delegation};
pub use orchestrator::{Orchestrator, OrchestratorConfig};
pub use usage_sink::StoreUsageSink;
