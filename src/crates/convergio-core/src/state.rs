//! Workflow state: a validated, sanitized key/value map
//!
//! Every workflow owns one [`WorkflowState`]. Nodes read their input from it
//! and write their output back into it, and checkpoints snapshot it wholesale.
//! All writes go through validation: keys must match a fixed alphabet, values
//! are size-capped and sanitized before storage, so anything read back out of
//! the state is safe to embed in prompts and exports.
//!
//! # Validation rules
//!
//! | Item | Rule |
//! |------|------|
//! | workflow / node name | 1..=256 chars; alphanumeric, space, `-`, `_`, `.` |
//! | state key | 1..=128 chars; alphanumeric, `_`, `.`, `-` |
//! | state value | <= 10 KiB; control chars other than `\n` `\r` `\t` stripped; `\` `"` `'` escaped |
//! | condition expression | <= 1 KiB; code-injection tokens rejected |

use crate::error::{CoreError, Result};
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;

/// Maximum stored value size in bytes (10 KiB)
pub const MAX_STATE_VALUE_BYTES: usize = 10 * 1024;

/// Maximum state key length in characters
pub const MAX_STATE_KEY_CHARS: usize = 128;

/// Maximum workflow / node name length in characters
pub const MAX_NAME_CHARS: usize = 256;

/// Maximum condition expression length in bytes (1 KiB)
pub const MAX_CONDITION_BYTES: usize = 1024;

/// Tokens that disqualify a condition expression outright
const CONDITION_DENYLIST: &[&str] = &[
    "exec(",
    "eval(",
    "system(",
    "popen(",
    "fork(",
    "execve(",
    "import ",
    "require ",
    "include ",
    "#include",
    "<script",
    "javascript:",
    "onerror=",
    "onload=",
];

/// Validate a workflow or node name
pub fn validate_name(name: &str) -> Result<()> {
    let len = name.chars().count();
    if len == 0 || len > MAX_NAME_CHARS {
        return Err(CoreError::Validation(format!(
            "name must be 1..={MAX_NAME_CHARS} characters, got {len}"
        )));
    }
    if let Some(bad) = name
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, ' ' | '-' | '_' | '.')))
    {
        return Err(CoreError::Validation(format!(
            "name contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// Validate a state key
pub fn validate_state_key(key: &str) -> Result<()> {
    let len = key.chars().count();
    if len == 0 || len > MAX_STATE_KEY_CHARS {
        return Err(CoreError::Validation(format!(
            "state key must be 1..={MAX_STATE_KEY_CHARS} characters, got {len}"
        )));
    }
    if let Some(bad) = key
        .chars()
        .find(|c| !(c.is_alphanumeric() || matches!(c, '_' | '.' | '-')))
    {
        return Err(CoreError::Validation(format!(
            "state key contains invalid character {bad:?}"
        )));
    }
    Ok(())
}

/// Sanitize a state value for storage
///
/// Strips control characters (keeping `\n`, `\r`, `\t`) and escapes
/// backslash and both quote characters. The result is what `get` returns.
pub fn sanitize_state_value(value: &str) -> String {
    let mut out = String::with_capacity(value.len());
    for c in value.chars() {
        if c.is_control() && !matches!(c, '\n' | '\r' | '\t') {
            continue;
        }
        match c {
            '\\' => out.push_str("\\\\"),
            '"' => out.push_str("\\\""),
            '\'' => out.push_str("\\'"),
            _ => out.push(c),
        }
    }
    out
}

/// Validate a routing condition expression
///
/// The condition language is deliberately tiny (`key == value`,
/// `key != value`); anything that smells like host-language code is refused
/// before it gets near an evaluator.
pub fn validate_condition(expr: &str) -> Result<()> {
    if expr.len() > MAX_CONDITION_BYTES {
        return Err(CoreError::Validation(format!(
            "condition expression exceeds {MAX_CONDITION_BYTES} bytes"
        )));
    }
    let lower = expr.to_lowercase();
    for token in CONDITION_DENYLIST {
        if lower.contains(token) {
            return Err(CoreError::Validation(format!(
                "condition expression contains forbidden token {token:?}"
            )));
        }
    }
    Ok(())
}

/// One stored state value with its last-write timestamp
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateEntry {
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

/// The mutable key/value state of a workflow
///
/// Keys are unique; insertion order is irrelevant. Cloning is cheap enough
/// for checkpointing (values are capped at 10 KiB each).
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct WorkflowState {
    entries: HashMap<String, StateEntry>,
}

impl WorkflowState {
    pub fn new() -> Self {
        Self::default()
    }

    /// Set a value, validating the key and sanitizing the value
    ///
    /// Rejected keys and oversized values leave the state untouched.
    pub fn set(&mut self, key: &str, value: &str) -> Result<()> {
        validate_state_key(key)?;
        if value.len() > MAX_STATE_VALUE_BYTES {
            return Err(CoreError::Validation(format!(
                "state value for {key:?} exceeds {MAX_STATE_VALUE_BYTES} bytes"
            )));
        }
        self.entries.insert(
            key.to_string(),
            StateEntry {
                value: sanitize_state_value(value),
                updated_at: Utc::now(),
            },
        );
        Ok(())
    }

    /// Get a value by key
    pub fn get(&self, key: &str) -> Option<&str> {
        self.entries.get(key).map(|e| e.value.as_str())
    }

    /// Get the full entry (value + timestamp) by key
    pub fn entry(&self, key: &str) -> Option<&StateEntry> {
        self.entries.get(key)
    }

    /// Remove a key, returning its previous value
    pub fn remove(&mut self, key: &str) -> Option<String> {
        self.entries.remove(key).map(|e| e.value)
    }

    /// Number of stored keys
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    /// Drop every entry
    pub fn clear(&mut self) {
        self.entries.clear();
    }

    /// Iterate over `(key, entry)` pairs in unspecified order
    pub fn iter(&self) -> impl Iterator<Item = (&str, &StateEntry)> {
        self.entries.iter().map(|(k, e)| (k.as_str(), e))
    }

    /// Snapshot the state as a list of `{key, value, updated_at}` records
    ///
    /// Sorted by key so the serialized form is deterministic. This is the
    /// shape persisted by checkpoints.
    pub fn snapshot(&self) -> Vec<StateSnapshotEntry> {
        let mut entries: Vec<StateSnapshotEntry> = self
            .entries
            .iter()
            .map(|(k, e)| StateSnapshotEntry {
                key: k.clone(),
                value: e.value.clone(),
                updated_at: e.updated_at,
            })
            .collect();
        entries.sort_by(|a, b| a.key.cmp(&b.key));
        entries
    }

    /// Replay a snapshot into this state, replacing current contents
    ///
    /// Values in a snapshot were sanitized when first written, so they are
    /// restored verbatim with their original timestamps.
    pub fn replay(&mut self, snapshot: Vec<StateSnapshotEntry>) -> Result<()> {
        self.entries.clear();
        for entry in snapshot {
            validate_state_key(&entry.key)?;
            self.entries.insert(
                entry.key,
                StateEntry {
                    value: entry.value,
                    updated_at: entry.updated_at,
                },
            );
        }
        Ok(())
    }
}

/// One entry of a serialized state snapshot
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct StateSnapshotEntry {
    pub key: String,
    pub value: String,
    pub updated_at: DateTime<Utc>,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_validate_name() {
        assert!(validate_name("my workflow-1.2_final").is_ok());
        assert!(validate_name("").is_err());
        assert!(validate_name(&"x".repeat(257)).is_err());
        assert!(validate_name("bad/name").is_err());
        assert!(validate_name("no\nnewlines").is_err());
    }

    #[test]
    fn test_validate_state_key() {
        assert!(validate_state_key("node_42.result").is_ok());
        assert!(validate_state_key("").is_err());
        assert!(validate_state_key(&"k".repeat(129)).is_err());
        assert!(validate_state_key("has space").is_err());
    }

    #[test]
    fn test_sanitize_strips_and_escapes() {
        let input = "line1\nline2\ttabbed\u{0007}bell \"quoted\" back\\slash 'single'";
        let out = sanitize_state_value(input);
        assert!(!out.contains('\u{0007}'));
        assert!(out.contains("line1\nline2\ttabbed"));
        assert!(out.contains("\\\"quoted\\\""));
        assert!(out.contains("back\\\\slash"));
        assert!(out.contains("\\'single\\'"));
    }

    #[test]
    fn test_set_get_roundtrip_is_sanitized() {
        let mut state = WorkflowState::new();
        state.set("k1", "plain value").unwrap();
        assert_eq!(state.get("k1"), Some("plain value"));

        state.set("k2", "say \"hi\"").unwrap();
        assert_eq!(state.get("k2"), Some("say \\\"hi\\\""));
    }

    #[test]
    fn test_invalid_key_does_not_mutate() {
        let mut state = WorkflowState::new();
        state.set("good", "v").unwrap();
        assert!(state.set("bad key", "v").is_err());
        assert_eq!(state.len(), 1);
    }

    #[test]
    fn test_oversized_value_rejected() {
        let mut state = WorkflowState::new();
        let big = "v".repeat(MAX_STATE_VALUE_BYTES + 1);
        assert!(state.set("k", &big).is_err());
        assert!(state.get("k").is_none());
    }

    #[test]
    fn test_snapshot_replay_roundtrip() {
        let mut state = WorkflowState::new();
        state.set("k1", "v1").unwrap();
        state.set("k2", "v2").unwrap();

        let snap = state.snapshot();
        assert_eq!(snap.len(), 2);

        let mut restored = WorkflowState::new();
        restored.replay(snap.clone()).unwrap();
        assert_eq!(restored.get("k1"), Some("v1"));
        assert_eq!(restored.get("k2"), Some("v2"));
        // Timestamps survive the roundtrip
        assert_eq!(restored.snapshot(), snap);
    }

    #[test]
    fn test_validate_condition() {
        assert!(validate_condition("mode == fast").is_ok());
        assert!(validate_condition("status != done").is_ok());
        assert!(validate_condition(&"x".repeat(1025)).is_err());
        for expr in [
            "exec(rm)",
            "eval(x)",
            "system('ls')",
            "import os",
            "<script>alert(1)</script>",
            "javascript:void(0)",
        ] {
            assert!(validate_condition(expr).is_err(), "{expr} should be rejected");
        }
    }
}
