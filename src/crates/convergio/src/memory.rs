//! Conversation memory surfaces
//!
//! The semantic memory itself (vector search over past material) is an
//! external collaborator; the orchestrator only consumes the [`SemanticMemory`]
//! trait. Session history and project context are plain in-process state.

use async_trait::async_trait;
use serde::{Deserialize, Serialize};

/// One semantic recall hit
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryHit {
    pub text: String,
    /// Cosine-style similarity in `[0, 1]`
    pub score: f32,
}

/// External semantic memory searched during context assembly
#[async_trait]
pub trait SemanticMemory: Send + Sync {
    /// Top matches for a query at or above `min_score`, best first
    async fn search(&self, query: &str, limit: usize, min_score: f32) -> Vec<MemoryHit>;
}

/// One completed user/assistant exchange
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SessionTurn {
    pub user: String,
    pub assistant: String,
}

/// In-process history of the current session
#[derive(Debug, Clone, Default)]
pub struct SessionHistory {
    turns: Vec<SessionTurn>,
    important_memories: Vec<String>,
}

impl SessionHistory {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push_turn(&mut self, user: impl Into<String>, assistant: impl Into<String>) {
        self.turns.push(SessionTurn {
            user: user.into(),
            assistant: assistant.into(),
        });
    }

    /// The most recent `limit` turns, oldest first
    pub fn recent_turns(&self, limit: usize) -> &[SessionTurn] {
        let start = self.turns.len().saturating_sub(limit);
        &self.turns[start..]
    }

    pub fn turn_count(&self) -> usize {
        self.turns.len()
    }

    /// Pin a memory string that should surface in every prompt
    pub fn add_important_memory(&mut self, memory: impl Into<String>) {
        self.important_memories.push(memory.into());
    }

    /// Up to `limit` pinned memories, most recently added first
    pub fn important_memories(&self, limit: usize) -> Vec<&str> {
        self.important_memories
            .iter()
            .rev()
            .take(limit)
            .map(String::as_str)
            .collect()
    }
}

/// The active project's context, folded into every conversation
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ProjectContext {
    pub name: String,
    pub purpose: Option<String>,
    pub current_focus: Option<String>,
    /// Agent names allowed to be addressed from this project; out-of-team
    /// delegations still run but are logged
    pub team: Vec<String>,
    pub key_decisions: Vec<String>,
}

impl ProjectContext {
    pub fn new(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            ..Default::default()
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_recent_turns_window() {
        let mut history = SessionHistory::new();
        for i in 0..15 {
            history.push_turn(format!("q{i}"), format!("a{i}"));
        }
        let recent = history.recent_turns(10);
        assert_eq!(recent.len(), 10);
        assert_eq!(recent[0].user, "q5");
        assert_eq!(recent[9].user, "q14");
        assert_eq!(history.recent_turns(100).len(), 15);
    }

    #[test]
    fn test_important_memories_newest_first() {
        let mut history = SessionHistory::new();
        for i in 0..7 {
            history.add_important_memory(format!("m{i}"));
        }
        let top = history.important_memories(5);
        assert_eq!(top, vec!["m6", "m5", "m4", "m3", "m2"]);
    }
}
