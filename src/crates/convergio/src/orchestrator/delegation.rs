//! Delegation marker parsing
//!
//! The chief requests fan-out with literal markers in its response text:
//!
//! ```text
//! [DELEGATE: <name>] <reason>
//! ```
//!
//! Names are trimmed and lowercased; empty names and names over 256
//! characters are dropped. A reason runs until the next marker, the next
//! newline, or end of input. Marker order is preserved — convergence later
//! renders responses in parse order, not completion order. Parse problems
//! are silent: the chief's text is still delivered even when no marker
//! survives.

const MARKER: &str = "[DELEGATE:";
const MAX_NAME_LEN: usize = 256;

/// One parsed delegation request
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Delegation {
    /// Canonical (lowercased) specialist name
    pub name: String,
    pub reason: String,
}

/// Extract all delegation markers from a chief response, in order
pub fn parse_delegations(text: &str) -> Vec<Delegation> {
    let mut delegations = Vec::new();
    let mut rest = text;

    while let Some(start) = rest.find(MARKER) {
        let after_marker = &rest[start + MARKER.len()..];
        let Some(close) = after_marker.find(']') else {
            // Unterminated marker: nothing further can parse
            break;
        };

        let name = after_marker[..close].trim().to_lowercase();
        let after_name = &after_marker[close + 1..];

        // Reason extends to the next marker, newline, or end of input
        let reason_end = [after_name.find(MARKER), after_name.find('\n')]
            .into_iter()
            .flatten()
            .min()
            .unwrap_or(after_name.len());
        let reason = after_name[..reason_end].trim().to_string();

        if !name.is_empty() && name.len() <= MAX_NAME_LEN {
            delegations.push(Delegation { name, reason });
        }

        rest = after_name;
    }

    delegations
}
