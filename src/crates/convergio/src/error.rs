//! Error types for the orchestrator application
//!
//! Provides a unified error type over the core, agents, store and engine
//! layers.

use std::fmt;

/// Result type alias for orchestrator operations
pub type Result<T> = std::result::Result<T, ConvergioError>;

/// Main error type for orchestrator operations
#[derive(Debug)]
pub enum ConvergioError {
    /// Configuration error
    Config(String),

    /// Provider call failed; the message is surfaced verbatim to the user
    Llm(String),

    /// Spending reached the configured limit; new work is refused
    BudgetExceeded,

    /// Fan-out finished but the synthesis call failed
    DelegationFailed,

    /// Agent pool error
    Agents(convergio_agents::AgentsError),

    /// Core layer error
    Core(convergio_core::CoreError),

    /// Persistence error
    Store(convergio_store::StoreError),

    /// Workflow engine error
    Engine(convergio_engine::EngineError),

    /// IO error
    Io(std::io::Error),

    /// Serialization error
    Serde(serde_json::Error),

    /// Generic error with message
    Other(String),
}

impl fmt::Display for ConvergioError {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Config(msg) => write!(f, "Configuration error: {}", msg),
            Self::Llm(msg) => write!(f, "LLM error: {}", msg),
            Self::BudgetExceeded => {
                write!(f, "Budget exceeded. Use 'cost set <amount>' to increase budget.")
            }
            Self::DelegationFailed => write!(f, "Delegation failed"),
            Self::Agents(err) => write!(f, "{}", err),
            Self::Core(err) => write!(f, "{}", err),
            Self::Store(err) => write!(f, "{}", err),
            Self::Engine(err) => write!(f, "{}", err),
            Self::Io(err) => write!(f, "IO error: {}", err),
            Self::Serde(err) => write!(f, "Serialization error: {}", err),
            Self::Other(msg) => write!(f, "{}", msg),
        }
    }
}

impl std::error::Error for ConvergioError {
    fn source(&self) -> Option<&(dyn std::error::Error + 'static)> {
        match self {
            Self::Agents(err) => Some(err),
            Self::Core(err) => Some(err),
            Self::Store(err) => Some(err),
            Self::Engine(err) => Some(err),
            Self::Io(err) => Some(err),
            Self::Serde(err) => Some(err),
            _ => None,
        }
    }
}

impl From<convergio_agents::AgentsError> for ConvergioError {
    fn from(err: convergio_agents::AgentsError) -> Self {
        Self::Agents(err)
    }
}

impl From<convergio_core::CoreError> for ConvergioError {
    fn from(err: convergio_core::CoreError) -> Self {
        Self::Core(err)
    }
}

impl From<convergio_store::StoreError> for ConvergioError {
    fn from(err: convergio_store::StoreError) -> Self {
        Self::Store(err)
    }
}

impl From<convergio_engine::EngineError> for ConvergioError {
    fn from(err: convergio_engine::EngineError) -> Self {
        Self::Engine(err)
    }
}

impl From<std::io::Error> for ConvergioError {
    fn from(err: std::io::Error) -> Self {
        Self::Io(err)
    }
}

impl From<serde_json::Error> for ConvergioError {
    fn from(err: serde_json::Error) -> Self {
        Self::Serde(err)
    }
}

impl From<String> for ConvergioError {
    fn from(msg: String) -> Self {
        Self::Other(msg)
    }
}
