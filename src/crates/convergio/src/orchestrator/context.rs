//! Conversation assembly
//!
//! The conversation handed to the provider is one string, composed in a
//! fixed order with fixed headers — the headers are part of the contract
//! with the prompt templates:
//!
//! 1. `## Active Project: <name>` (when a project is active)
//! 2. `## Important Memories` (up to 5)
//! 3. `## Relevant Context` (up to 3 semantic recalls)
//! 4. `## Recent Conversation (this session)` (up to 10 turns)
//! 5. `## Current Request`

use crate::memory::{MemoryHit, ProjectContext, SessionTurn};

/// Caps applied during assembly
pub const MAX_IMPORTANT_MEMORIES: usize = 5;
pub const MAX_RECALLS: usize = 3;
pub const MAX_RECENT_TURNS: usize = 10;
pub const MAX_KEY_DECISIONS: usize = 5;

/// Minimum similarity for a recall to be included
pub const RECALL_MIN_SCORE: f32 = 0.3;

/// Compose the full conversation string for one request
pub fn assemble_conversation(
    project: Option<&ProjectContext>,
    important_memories: &[&str],
    recalls: &[MemoryHit],
    recent_turns: &[SessionTurn],
    input: &str,
) -> String {
    let mut out = String::new();

    if let Some(project) = project {
        out.push_str(&format!("## Active Project: {}\n", project.name));
        if let Some(purpose) = &project.purpose {
            out.push_str(&format!("Purpose: {purpose}\n"));
        }
        if let Some(focus) = &project.current_focus {
            out.push_str(&format!("Current focus: {focus}\n"));
        }
        if !project.team.is_empty() {
            out.push_str(&format!("Team: {}\n", project.team.join(", ")));
        }
        if !project.key_decisions.is_empty() {
            out.push_str("Key decisions:\n");
            for decision in project.key_decisions.iter().take(MAX_KEY_DECISIONS) {
                out.push_str(&format!("- {decision}\n"));
            }
        }
        out.push('\n');
    }

    if !important_memories.is_empty() {
        out.push_str("## Important Memories\n");
        for memory in important_memories.iter().take(MAX_IMPORTANT_MEMORIES) {
            out.push_str(&format!("- {memory}\n"));
        }
        out.push('\n');
    }

    let relevant: Vec<&MemoryHit> = recalls
        .iter()
        .filter(|hit| hit.score >= RECALL_MIN_SCORE)
        .take(MAX_RECALLS)
        .collect();
    if !relevant.is_empty() {
        out.push_str("## Relevant Context\n");
        for hit in relevant {
            out.push_str(&format!("- ({:.2}) {}\n", hit.score, hit.text));
        }
        out.push('\n');
    }

    if !recent_turns.is_empty() {
        out.push_str("## Recent Conversation (this session)\n");
        let start = recent_turns.len().saturating_sub(MAX_RECENT_TURNS);
        for turn in &recent_turns[start..] {
            out.push_str(&format!("User: {}\n", turn.user));
            out.push_str(&format!("Assistant: {}\n", turn.assistant));
        }
        out.push('\n');
    }

    out.push_str("## Current Request\n");
    out.push_str(input);
    out
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_section_order_and_headers() {
        let mut project = ProjectContext::new("apollo");
        project.purpose = Some("land safely".to_string());
        project.team = vec!["baccio".to_string(), "luca".to_string()];
        project.key_decisions = (0..7).map(|i| format!("d{i}")).collect();

        let turns = vec![SessionTurn {
            user: "hello".to_string(),
            assistant: "hi".to_string(),
        }];
        let recalls = vec![
            MemoryHit {
                text: "relevant fact".to_string(),
                score: 0.9,
            },
            MemoryHit {
                text: "irrelevant fact".to_string(),
                score: 0.1,
            },
        ];

        let conversation = assemble_conversation(
            Some(&project),
            &["remember this"],
            &recalls,
            &turns,
            "what now?",
        );

        let project_pos = conversation.find("## Active Project: apollo").unwrap();
        let memories_pos = conversation.find("## Important Memories").unwrap();
        let context_pos = conversation.find("## Relevant Context").unwrap();
        let recent_pos = conversation
            .find("## Recent Conversation (this session)")
            .unwrap();
        let request_pos = conversation.find("## Current Request").unwrap();
        assert!(project_pos < memories_pos);
        assert!(memories_pos < context_pos);
        assert!(context_pos < recent_pos);
        assert!(recent_pos < request_pos);

        // Request text is verbatim at the end
        assert!(conversation.ends_with("## Current Request\nwhat now?"));
        // Low-scoring recall filtered out
        assert!(conversation.contains("relevant fact"));
        assert!(!conversation.contains("irrelevant fact"));
        // Key decisions capped at five
        assert!(conversation.contains("- d4"));
        assert!(!conversation.contains("- d5"));
    }

    #[test]
    fn test_empty_sections_are_omitted() {
        let conversation = assemble_conversation(None, &[], &[], &[], "just this");
        assert_eq!(conversation, "## Current Request\njust this");
    }

    #[test]
    fn test_turns_capped_at_ten() {
        let turns: Vec<SessionTurn> = (0..15)
            .map(|i| SessionTurn {
                user: format!("q{i}"),
                assistant: format!("a{i}"),
            })
            .collect();
        let conversation = assemble_conversation(None, &[], &[], &turns, "x");
        assert!(!conversation.contains("User: q4\n"));
        assert!(conversation.contains("User: q5\n"));
        assert!(conversation.contains("User: q14\n"));
    }
}
