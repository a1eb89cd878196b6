//! # convergio-agents — the agent pool and its plumbing
//!
//! Three components live here:
//!
//! - [`registry`] — the dynamic agent pool: hashed lookup by name and id,
//!   idempotent spawn, persona definitions, keyword-based task selection;
//! - [`bus`] — typed inter-agent messages: global history, per-agent FIFO
//!   queues, topic pub/sub and a priority queue;
//! - [`cost`] — token metering and budget enforcement with pluggable
//!   pricing and an optional persistence sink.
//!
//! Everything is safe to share as `Arc<...>` across tasks; each component
//! guards its state with a single mutex and calls user code (callbacks,
//! subscribers, sinks) only after releasing it.

pub mod agent;
pub mod bus;
pub mod cost;
pub mod error;
pub mod registry;

pub use agent::{Agent, AgentRole, WorkState};
pub use bus::{Message, MessageBus, MessageDraft, MessageType, TopicHandler};
pub use cost::{
    AgentCost, CostCallback, CostController, CostUpdate, DailyUsage, Direction, ModelPricing,
    PricingTable, UsageSink, DEFAULT_PRICING,
};
pub use error::{AgentsError, Result};
pub use registry::{AgentDefinition, AgentRegistry};
