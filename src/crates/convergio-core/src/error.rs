//! Error types and the engine-facing error taxonomy
//!
//! Two layers live here. [`CoreError`] is the error type returned by core
//! operations (validation, graph construction, provider calls). [`ErrorKind`]
//! is the flat taxonomy the workflow engine uses to decide between retrying
//! with backoff and failing immediately. Provider and tool errors arrive as
//! human-readable strings, so [`ErrorKind::classify`] maps message substrings
//! onto the taxonomy.

use thiserror::Error;

/// Result type alias for core operations
pub type Result<T> = std::result::Result<T, CoreError>;

/// Engine-facing error taxonomy
///
/// Every failure observed during workflow execution is classified into one
/// of these kinds. The split between retryable and terminal kinds drives the
/// engine's backoff policy: transient infrastructure failures are retried,
/// everything else surfaces immediately.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, serde::Serialize, serde::Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorKind {
    /// Operation exceeded its deadline
    Timeout,
    /// Network failure reaching an external service
    Network,
    /// Local file system failure
    FileIo,
    /// Provider account out of credit or quota
    CreditExhausted,
    /// LLM backend is down
    LlmDown,
    /// Provider reachable but refusing service
    ProviderUnavailable,
    /// Provider rate limit hit
    RateLimit,
    /// A tool invocation failed
    ToolFailed,
    /// Referenced agent does not exist in the registry
    AgentNotFound,
    /// Credentials rejected
    Authentication,
    /// Anything that does not match a known pattern
    Unknown,
    /// No error
    None,
}

impl ErrorKind {
    /// Whether the engine should retry this kind with backoff
    pub fn is_retryable(self) -> bool {
        matches!(
            self,
            Self::Timeout
                | Self::Network
                | Self::LlmDown
                | Self::ProviderUnavailable
                | Self::RateLimit
        )
    }

    /// Classify a human-readable error message into a taxonomy kind
    ///
    /// Matching is case-insensitive substring search, first hit wins. The
    /// scan order matters: "rate limit" must be checked before "network"
    /// style catch-alls so compound messages land on the narrower kind.
    pub fn classify(message: &str) -> Self {
        let lower = message.to_lowercase();

        if lower.contains("timeout") || lower.contains("timed out") {
            Self::Timeout
        } else if lower.contains("rate limit") {
            Self::RateLimit
        } else if lower.contains("credit") || lower.contains("quota") {
            Self::CreditExhausted
        } else if lower.contains("unauthorized") || lower.contains("authentication") {
            Self::Authentication
        } else if lower.contains("agent not found") {
            Self::AgentNotFound
        } else if lower.contains("network") || lower.contains("connection") {
            Self::Network
        } else {
            Self::Unknown
        }
    }

    /// Stable string form used in state values and log fields
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Timeout => "timeout",
            Self::Network => "network",
            Self::FileIo => "file_io",
            Self::CreditExhausted => "credit_exhausted",
            Self::LlmDown => "llm_down",
            Self::ProviderUnavailable => "provider_unavailable",
            Self::RateLimit => "rate_limit",
            Self::ToolFailed => "tool_failed",
            Self::AgentNotFound => "agent_not_found",
            Self::Authentication => "authentication",
            Self::Unknown => "unknown",
            Self::None => "none",
        }
    }
}

impl std::fmt::Display for ErrorKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Main error type for core operations
#[derive(Debug, Error)]
pub enum CoreError {
    /// A name, key, value or expression failed validation
    #[error("validation error: {0}")]
    Validation(String),

    /// Graph structure error (missing entry node, unknown node id, ...)
    #[error("graph error: {0}")]
    Graph(String),

    /// Provider call failed; carries the classified kind and the raw message
    #[error("provider error ({kind}): {message}")]
    Provider { kind: ErrorKind, message: String },

    /// Tool execution failed
    #[error("tool '{name}' failed: {message}")]
    Tool { name: String, message: String },

    /// Content was blocked by the ethical guardrails
    #[error("content blocked: {0}")]
    Blocked(String),

    /// A human reviewer denied the operation
    #[error("operation denied by human review: {0}")]
    Denied(String),

    /// Serialization failure
    #[error("serialization error: {0}")]
    Serde(#[from] serde_json::Error),
}

impl CoreError {
    /// Build a provider error, classifying the message on the way in
    pub fn provider(message: impl Into<String>) -> Self {
        let message = message.into();
        Self::Provider {
            kind: ErrorKind::classify(&message),
            message,
        }
    }

    /// Build a provider error with an explicit kind
    pub fn provider_kind(kind: ErrorKind, message: impl Into<String>) -> Self {
        Self::Provider {
            kind,
            message: message.into(),
        }
    }

    /// The taxonomy kind for this error
    pub fn kind(&self) -> ErrorKind {
        match self {
            Self::Provider { kind, .. } => *kind,
            Self::Tool { .. } => ErrorKind::ToolFailed,
            Self::Validation(_) | Self::Graph(_) | Self::Serde(_) => ErrorKind::Unknown,
            Self::Blocked(_) | Self::Denied(_) => ErrorKind::Unknown,
        }
    }
}
