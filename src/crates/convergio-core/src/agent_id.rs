//! Agent identifiers
//!
//! Identifiers are opaque 64-bit values allocated monotonically by the
//! registry and stable for the process lifetime. Id 1 is reserved for the
//! chief orchestrator; id 0 addresses a broadcast.

use serde::{Deserialize, Serialize};

/// Opaque identifier for an agent
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct AgentId(pub u64);

/// Recipient id that addresses every active agent except the sender
pub const BROADCAST: AgentId = AgentId(0);

/// Reserved id of the chief orchestrator agent
pub const CHIEF: AgentId = AgentId(1);

impl AgentId {
    pub fn as_u64(self) -> u64 {
        self.0
    }

    pub fn is_broadcast(self) -> bool {
        self == BROADCAST
    }
}

impl std::fmt::Display for AgentId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "agent-{}", self.0)
    }
}
