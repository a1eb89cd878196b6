//! Provider and tool traits
//!
//! Convergio is an orchestration core, not an LLM client library: transport
//! to model vendors lives outside this workspace. The core defines the
//! traits those collaborators implement — [`ChatProvider`] for model calls
//! and [`Tool`] for side-effecting operations — and the engine and
//! orchestrator program against them.
//!
//! Provider kinds are a tagged union, not an inheritance chain: the
//! orchestrator only branches on [`ProviderKind`] and the capability
//! accessors (`is_metered`, `concurrency_limit`), never on concrete types.

use crate::error::Result;
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use serde_json::Value;
use std::collections::HashMap;
use std::sync::Arc;

/// Which vendor family a provider belongs to
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProviderKind {
    Anthropic,
    OpenAi,
    Gemini,
    /// Local inference (Ollama and friends): free, limited concurrency
    Local,
}

impl ProviderKind {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Anthropic => "anthropic",
            Self::OpenAi => "openai",
            Self::Gemini => "gemini",
            Self::Local => "local",
        }
    }
}

/// Token usage reported by a provider, when it reports any
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChatUsage {
    pub input_tokens: Option<u64>,
    pub output_tokens: Option<u64>,
}

/// One tool invocation requested by the model
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ToolUse {
    pub id: String,
    pub name: String,
    pub input: Value,
}

/// One completed model turn
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct ChatTurn {
    /// Assistant text (may be empty when the turn is pure tool use)
    pub text: String,
    /// Tool invocations the model asked for this round
    pub tool_calls: Vec<ToolUse>,
    pub usage: ChatUsage,
}

impl ChatTurn {
    pub fn text(text: impl Into<String>) -> Self {
        Self {
            text: text.into(),
            ..Default::default()
        }
    }
}

/// Declarative description of a tool, handed to the provider as a manifest
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ToolSpec {
    pub name: String,
    pub description: String,
    pub input_schema: Value,
}

/// Callback receiving streamed response chunks
pub type StreamCallback<'a> = &'a (dyn Fn(&str) + Send + Sync);

/// Chat-capable model provider
///
/// Implementations must be `Send + Sync`; share them as
/// `Arc<dyn ChatProvider>`. The default method bodies give non-streaming,
/// tool-less providers a correct (if degraded) behavior for free.
#[async_trait]
pub trait ChatProvider: Send + Sync {
    /// One blocking chat completion
    async fn chat(&self, system: &str, user: &str, max_tokens: u32) -> Result<ChatTurn>;

    /// Chat with a tool manifest; the model may answer with tool calls
    ///
    /// Providers without tool support fall back to a plain completion.
    async fn chat_with_tools(
        &self,
        system: &str,
        conversation: &str,
        _tools: &[ToolSpec],
        max_tokens: u32,
    ) -> Result<ChatTurn> {
        self.chat(system, conversation, max_tokens).await
    }

    /// Streaming chat; chunks are delivered through `on_chunk`
    ///
    /// The default implementation completes the call and delivers the whole
    /// text as one chunk.
    async fn chat_stream(
        &self,
        system: &str,
        user: &str,
        max_tokens: u32,
        on_chunk: StreamCallback<'_>,
    ) -> Result<ChatTurn> {
        let turn = self.chat(system, user, max_tokens).await?;
        on_chunk(&turn.text);
        Ok(turn)
    }

    /// Vendor family of this provider
    fn kind(&self) -> ProviderKind;

    /// Model identifier used for pricing lookups
    fn model_id(&self) -> &str;

    /// Whether usage through this provider accrues cost
    ///
    /// Local inference is free: token counts are still metered but recorded
    /// cost is zero and the budget flag never trips on it.
    fn is_metered(&self) -> bool {
        self.kind() != ProviderKind::Local
    }

    /// In-flight call cap for this provider, if it needs one
    ///
    /// Local providers run on constrained hardware and default to 2.
    fn concurrency_limit(&self) -> Option<usize> {
        match self.kind() {
            ProviderKind::Local => Some(2),
            _ => None,
        }
    }

    /// Cheap liveness probe used by the engine's pre-flight checks
    async fn is_available(&self) -> bool {
        true
    }
}

/// A side-effecting tool the model can invoke
#[async_trait]
pub trait Tool: Send + Sync {
    fn name(&self) -> &str;

    fn description(&self) -> &str;

    /// JSON schema of the expected input
    fn input_schema(&self) -> Value {
        serde_json::json!({ "type": "object" })
    }

    /// Execute the tool; output is the string appended to the conversation
    async fn execute(&self, input: Value) -> Result<String>;
}

/// Named collection of tools exposed to the orchestrator loop
#[derive(Clone, Default)]
pub struct ToolRegistry {
    tools: HashMap<String, Arc<dyn Tool>>,
}

impl std::fmt::Debug for ToolRegistry {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let mut names: Vec<&str> = self.tools.keys().map(String::as_str).collect();
        names.sort_unstable();
        f.debug_struct("ToolRegistry").field("tools", &names).finish()
    }
}

impl ToolRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Register a tool; the last registration for a name wins
    pub fn register(&mut self, tool: Arc<dyn Tool>) {
        self.tools.insert(tool.name().to_string(), tool);
    }

    pub fn get(&self, name: &str) -> Option<Arc<dyn Tool>> {
        self.tools.get(name).cloned()
    }

    pub fn len(&self) -> usize {
        self.tools.len()
    }

    pub fn is_empty(&self) -> bool {
        self.tools.is_empty()
    }

    /// Manifest of every registered tool, sorted by name
    pub fn manifest(&self) -> Vec<ToolSpec> {
        let mut specs: Vec<ToolSpec> = self
            .tools
            .values()
            .map(|t| ToolSpec {
                name: t.name().to_string(),
                description: t.description().to_string(),
                input_schema: t.input_schema(),
            })
            .collect();
        specs.sort_by(|a, b| a.name.cmp(&b.name));
        specs
    }
}
