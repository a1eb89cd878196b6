//! Ethical guardrails: content classification and approval gating
//!
//! The classifier is pure and synchronous: case-insensitive substring
//! matching against curated phrase lists, evaluated in a fixed precedence so
//! every input maps to exactly one verdict. Blocking categories are checked
//! first (most severe first), then the review and warn categories, then OK.
//!
//! Separately from content, operations carry a set of sensitive-category
//! flags. Operations flagged financial, personal-data, data-delete or legal
//! always require approval through the registered hook; with no hook
//! registered the answer is always "deny".

use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::warn;

/// Classification verdict for a piece of content
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Verdict {
    Ok,
    Warn,
    HumanReview,
    Block,
}

/// Result of classifying content: the verdict plus which list fired
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Classification {
    pub verdict: Verdict,
    /// Name of the category whose phrase list matched, if any
    pub category: Option<&'static str>,
}

impl Classification {
    fn ok() -> Self {
        Self {
            verdict: Verdict::Ok,
            category: None,
        }
    }
}

// Blocking lists, most severe first. Order here IS the precedence.
const SELF_HARM: &[&str] = &[
    "kill myself",
    "suicide",
    "self-harm",
    "self harm",
    "hurt myself",
    "end my life",
];

const VIOLENCE: &[&str] = &[
    "how to kill",
    "how to hurt someone",
    "make a weapon",
    "build a bomb",
    "attack someone",
];

const ADULT: &[&str] = &["explicit sexual", "porn", "sexual content involving"];

const BULLYING: &[&str] = &[
    "harass",
    "humiliate them",
    "make them suffer",
    "cyberbully",
];

const DRUGS: &[&str] = &[
    "how to make drugs",
    "synthesize meth",
    "buy illegal drugs",
];

const JAILBREAK: &[&str] = &[
    "ignore previous instructions",
    "ignore your instructions",
    "pretend you have no rules",
    "bypass your safety",
    "jailbreak",
];

const GENERAL_HARMFUL: &[&str] = &[
    "steal credentials",
    "write malware",
    "create a virus",
    "phishing email",
];

// Review / warn lists.
const PRIVACY: &[&str] = &[
    "social security number",
    "credit card number",
    "home address of",
    "medical records of",
];

const FINANCIAL: &[&str] = &[
    "transfer money",
    "wire funds",
    "make a payment",
    "buy stocks",
];

const DATA_DELETION: &[&str] = &[
    "delete all data",
    "drop database",
    "erase all files",
    "wipe the disk",
];

/// Classify content into exactly one verdict
///
/// Precedence: the blocking categories in severity order, then privacy
/// (human review), financial (warn), data deletion (human review), else OK.
pub fn classify_content(content: &str) -> Classification {
    let lower = content.to_lowercase();

    let block_lists: &[(&str, &[&str])] = &[
        ("self_harm", SELF_HARM),
        ("violence", VIOLENCE),
        ("adult_content", ADULT),
        ("bullying", BULLYING),
        ("drugs", DRUGS),
        ("jailbreak", JAILBREAK),
        ("harmful", GENERAL_HARMFUL),
    ];

    for &(category, phrases) in block_lists {
        if phrases.iter().any(|p| lower.contains(p)) {
            warn!(category = "security", matched = category, "content blocked by guardrails");
            return Classification {
                verdict: Verdict::Block,
                category: Some(category),
            };
        }
    }

    if PRIVACY.iter().any(|p| lower.contains(p)) {
        warn!(category = "security", matched = "privacy", "content flagged for human review");
        return Classification {
            verdict: Verdict::HumanReview,
            category: Some("privacy"),
        };
    }

    if FINANCIAL.iter().any(|p| lower.contains(p)) {
        return Classification {
            verdict: Verdict::Warn,
            category: Some("financial"),
        };
    }

    if DATA_DELETION.iter().any(|p| lower.contains(p)) {
        warn!(
            category = "security",
            matched = "data_deletion",
            "content flagged for human review"
        );
        return Classification {
            verdict: Verdict::HumanReview,
            category: Some("data_deletion"),
        };
    }

    Classification::ok()
}

/// Sensitive-operation categories, independent of content classification
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum SensitiveCategory {
    Financial,
    PersonalData,
    Security,
    ExternalApi,
    DataDelete,
    Legal,
}

impl SensitiveCategory {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Financial => "financial",
            Self::PersonalData => "personal_data",
            Self::Security => "security",
            Self::ExternalApi => "external_api",
            Self::DataDelete => "data_delete",
            Self::Legal => "legal",
        }
    }

    /// Categories that always require human approval
    pub fn always_requires_approval(self) -> bool {
        matches!(
            self,
            Self::Financial | Self::PersonalData | Self::DataDelete | Self::Legal
        )
    }
}

/// Whether an operation with these flags must go through the approval hook
pub fn requires_approval(categories: &[SensitiveCategory]) -> bool {
    categories.iter().any(|c| c.always_requires_approval())
}

/// Callable approval hook: `(operation, categories) -> approved`
pub type ApprovalHook = Arc<dyn Fn(&str, &[SensitiveCategory]) -> bool + Send + Sync>;

/// Guardrail policy holder: classifier plus the human-approval hook
#[derive(Clone, Default)]
pub struct Guardrails {
    hook: Option<ApprovalHook>,
}

impl std::fmt::Debug for Guardrails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Guardrails")
            .field("hook_registered", &self.hook.is_some())
            .finish()
    }
}

impl Guardrails {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register the human-approval hook
    pub fn set_approval_hook(&mut self, hook: ApprovalHook) {
        self.hook = Some(hook);
    }

    /// Classify content (see [`classify_content`])
    pub fn classify(&self, content: &str) -> Classification {
        classify_content(content)
    }

    /// Ask for approval of a sensitive operation
    ///
    /// With no hook registered every operation that requires approval is
    /// denied. The decision is audited either way.
    pub fn approve(&self, operation: &str, categories: &[SensitiveCategory]) -> bool {
        if !requires_approval(categories) {
            return true;
        }
        let approved = match &self.hook {
            Some(hook) => hook(operation, categories),
            None => false,
        };
        warn!(
            category = "security",
            operation,
            approved,
            "human approval decision"
        );
        approved
    }
}
