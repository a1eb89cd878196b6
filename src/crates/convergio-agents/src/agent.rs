//! Agent model: roles, work state and the agent record itself

use convergio_core::AgentId;
use serde::{Deserialize, Serialize};

/// Functional role of an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum AgentRole {
    Orchestrator,
    Analyst,
    Coder,
    Writer,
    Critic,
    Planner,
    Executor,
    Memory,
}

impl AgentRole {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Orchestrator => "orchestrator",
            Self::Analyst => "analyst",
            Self::Coder => "coder",
            Self::Writer => "writer",
            Self::Critic => "critic",
            Self::Planner => "planner",
            Self::Executor => "executor",
            Self::Memory => "memory",
        }
    }

    /// Parse a role name; unknown names fall back to `Executor`
    pub fn parse_or_executor(value: &str) -> Self {
        match value.trim().to_lowercase().as_str() {
            "orchestrator" => Self::Orchestrator,
            "analyst" => Self::Analyst,
            "coder" => Self::Coder,
            "writer" => Self::Writer,
            "critic" => Self::Critic,
            "planner" => Self::Planner,
            "executor" => Self::Executor,
            "memory" => Self::Memory,
            _ => Self::Executor,
        }
    }
}

impl std::fmt::Display for AgentRole {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// What an agent is doing right now
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkState {
    Idle,
    Thinking,
    /// Working with another agent
    Collaborating(AgentId),
}

/// One agent in the pool
///
/// `system_prompt` is immutable after creation; everything an agent does is
/// derived from it plus the optional specialized context. Mutable fields
/// (`is_active`, `work_state`, token counters) are only touched through the
/// registry, under its lock.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Agent {
    pub id: AgentId,
    /// Display name; uniqueness is enforced on the lowercase form
    pub name: String,
    pub role: AgentRole,
    pub system_prompt: String,
    pub specialized_context: Option<String>,
    pub is_active: bool,
    pub work_state: WorkState,
    pub input_tokens: u64,
    pub output_tokens: u64,
}

impl Agent {
    pub fn new(
        id: AgentId,
        name: impl Into<String>,
        role: AgentRole,
        system_prompt: impl Into<String>,
        specialized_context: Option<String>,
    ) -> Self {
        Self {
            id,
            name: name.into(),
            role,
            system_prompt: system_prompt.into(),
            specialized_context,
            is_active: true,
            work_state: WorkState::Idle,
            input_tokens: 0,
            output_tokens: 0,
        }
    }

    /// Canonical lookup key for this agent's name
    pub fn canonical_name(&self) -> String {
        self.name.trim().to_lowercase()
    }

    /// Display name with an uppercased first letter, used in synthesis headers
    pub fn display_name(&self) -> String {
        let mut chars = self.name.chars();
        match chars.next() {
            Some(first) => first.to_uppercase().collect::<String>() + chars.as_str(),
            None => String::new(),
        }
    }
}
