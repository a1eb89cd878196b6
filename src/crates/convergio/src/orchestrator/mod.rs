//! The chief orchestrator loop
//!
//! One request flows through a fixed life-cycle:
//!
//! ```text
//! Idle -> AssemblingContext -> LlmRound(k) -> ParsingDelegations
//!      -> (NoDelegation -> Finalize)
//!       | (HasDelegation -> FanOut -> Converging -> Finalize)
//! ```
//!
//! Context assembly folds project state, pinned memories, semantic recalls
//! and recent turns into one conversation string. The tool-use loop runs at
//! most [`OrchestratorConfig::max_tool_iterations`] provider rounds — the
//! budget is pre-round, so tool calls returned by the final round are not
//! executed. Delegation markers fan out to specialists under a concurrency
//! cap taken from the provider's capability (local inference defaults to
//! two in-flight calls); convergence renders specialist responses in parse
//! order, never completion order, and failed workers are simply omitted.

pub mod context;
pub mod delegation;

use crate::constitution::chief_system_prompt;
use crate::error::{ConvergioError, Result};
use crate::memory::{ProjectContext, SemanticMemory, SessionHistory};
use context::{assemble_conversation, MAX_IMPORTANT_MEMORIES, MAX_RECALLS, RECALL_MIN_SCORE};
use delegation::{parse_delegations, Delegation};

use convergio_agents::{
    AgentRegistry, AgentRole, CostController, MessageBus, MessageDraft, MessageType, WorkState,
};
use convergio_core::{
    AgentId, CancelToken, ChatProvider, ChatTurn, StreamCallback, Telemetry, ToolRegistry,
    BROADCAST, CHIEF,
};
use convergio_store::{PlanRepository, TaskRepository};
use chrono::Utc;
use parking_lot::Mutex;
use std::sync::Arc;
use std::time::Instant;
use tokio::sync::Semaphore;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};
use uuid::Uuid;

/// Life-cycle phase of one request, used in structured logs
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum RequestPhase {
    AssemblingContext,
    LlmRound,
    ParsingDelegations,
    FanOut,
    Converging,
    Finalize,
}

impl RequestPhase {
    fn as_str(self) -> &'static str {
        match self {
            Self::AssemblingContext => "assembling_context",
            Self::LlmRound => "llm_round",
            Self::ParsingDelegations => "parsing_delegations",
            Self::FanOut => "fan_out",
            Self::Converging => "converging",
            Self::Finalize => "finalize",
        }
    }
}

/// Orchestrator tunables
#[derive(Debug, Clone)]
pub struct OrchestratorConfig {
    /// Maximum provider rounds per request (tool budget, applied pre-round)
    pub max_tool_iterations: usize,
    pub max_output_tokens: u32,
    /// Fan-out cap applied when the provider reports limited concurrency
    pub local_concurrency_cap: usize,
    /// Reported in the chief's role template
    pub version: String,
    pub workspace: String,
}

impl Default for OrchestratorConfig {
    fn default() -> Self {
        Self {
            max_tool_iterations: 10,
            max_output_tokens: 4096,
            local_concurrency_cap: 2,
            version: env!("CARGO_PKG_VERSION").to_string(),
            workspace: ".".to_string(),
        }
    }
}

/// Where finalized responses are persisted when a plan is attached
#[derive(Clone)]
struct PlanLog {
    plans: PlanRepository,
    tasks: TaskRepository,
    plan_id: Uuid,
}

/// One successful fan-out response, tagged with its parse-order index
struct WorkerResponse {
    index: usize,
    agent: AgentId,
    display_name: String,
    text: String,
}

/// The chief orchestrator
pub struct Orchestrator {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<AgentRegistry>,
    bus: Arc<MessageBus>,
    cost: Arc<CostController>,
    telemetry: Arc<Telemetry>,
    tools: ToolRegistry,
    semantic_memory: Option<Arc<dyn SemanticMemory>>,
    session: Mutex<SessionHistory>,
    project: Mutex<Option<ProjectContext>>,
    plan_log: Mutex<Option<PlanLog>>,
    cancel: CancelToken,
    config: OrchestratorConfig,
}

impl Orchestrator {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        registry: Arc<AgentRegistry>,
        bus: Arc<MessageBus>,
        cost: Arc<CostController>,
        telemetry: Arc<Telemetry>,
        config: OrchestratorConfig,
    ) -> Self {
        bus.attach(CHIEF);
        Self {
            provider,
            registry,
            bus,
            cost,
            telemetry,
            tools: ToolRegistry::new(),
            semantic_memory: None,
            session: Mutex::new(SessionHistory::new()),
            project: Mutex::new(None),
            plan_log: Mutex::new(None),
            cancel: CancelToken::new(),
            config,
        }
    }

    /// Expose the tool registry for registration
    pub fn tools_mut(&mut self) -> &mut ToolRegistry {
        &mut self.tools
    }

    /// Plug in the external semantic memory
    pub fn set_semantic_memory(&mut self, memory: Arc<dyn SemanticMemory>) {
        self.semantic_memory = Some(memory);
    }

    /// Activate a project context
    pub fn set_project(&self, project: Option<ProjectContext>) {
        *self.project.lock() = project;
    }

    /// Attach the plan that finalized responses are persisted to
    pub fn attach_plan(&self, plans: PlanRepository, tasks: TaskRepository, plan_id: Uuid) {
        *self.plan_log.lock() = Some(PlanLog {
            plans,
            tasks,
            plan_id,
        });
    }

    /// Pin a memory string into every future prompt
    pub fn add_important_memory(&self, memory: impl Into<String>) {
        self.session.lock().add_important_memory(memory);
    }

    /// Token used to cancel in-flight fan-out workers
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Number of completed turns this session
    pub fn turn_count(&self) -> usize {
        self.session.lock().turn_count()
    }

    /// Process one user request end to end
    pub async fn process(&self, input: &str) -> Result<String> {
        if !self.cost.check_budget() {
            return Err(ConvergioError::BudgetExceeded);
        }

        debug!(category = "agent", phase = RequestPhase::AssemblingContext.as_str(), "request started");
        let user_msg = self.bus.send(MessageDraft::new(
            MessageType::UserInput,
            CHIEF,
            CHIEF,
            input,
        ));

        let system = self.chief_prompt();
        let mut conversation = self.assemble(input).await;
        let manifest = self.tools.manifest();

        // Tool-use iteration: at most max_tool_iterations provider calls.
        let mut text = String::new();
        for round in 1..=self.config.max_tool_iterations {
            debug!(category = "agent", phase = RequestPhase::LlmRound.as_str(), round, "provider round");
            let started = Instant::now();
            let turn = self
                .provider
                .chat_with_tools(
                    &system,
                    &conversation,
                    &manifest,
                    self.config.max_output_tokens,
                )
                .await
                .map_err(|e| {
                    self.telemetry.provider_call(
                        self.provider.kind().as_str(),
                        started.elapsed().as_millis() as u64,
                        false,
                        true,
                    );
                    ConvergioError::Llm(e.to_string())
                })?;
            self.telemetry.provider_call(
                self.provider.kind().as_str(),
                started.elapsed().as_millis() as u64,
                false,
                false,
            );
            self.record_cost(CHIEF, &system, &conversation, &turn).await;

            if turn.tool_calls.is_empty() || round == self.config.max_tool_iterations {
                // The final round's tool calls, if any, are not executed.
                text = turn.text;
                break;
            }

            for call in &turn.tool_calls {
                let output = match self.tools.get(&call.name) {
                    Some(tool) => match tool.execute(call.input.clone()).await {
                        Ok(out) => out,
                        Err(e) => format!("Error: {e}"),
                    },
                    None => format!("Error: unknown tool '{}'", call.name),
                };
                self.bus.send(
                    MessageDraft::new(MessageType::AgentAction, CHIEF, CHIEF, &call.name)
                        .with_parent(user_msg.id),
                );
                conversation.push_str(&format!("\n[Tool: {}]\nResult: {}", call.name, output));
            }
        }

        debug!(category = "agent", phase = RequestPhase::ParsingDelegations.as_str(), "chief text ready");
        let delegations = parse_delegations(&text);
        if delegations.is_empty() {
            return self.finalize(input, text, user_msg.id).await;
        }

        let responses = self.fan_out(&delegations, user_msg.id).await;
        if responses.is_empty() {
            // Every worker failed or was unresolvable; deliver the chief's
            // own text rather than synthesizing over nothing.
            return self.finalize(input, text, user_msg.id).await;
        }

        let synthesis = self.converge(input, &system, &responses, user_msg.id).await?;
        self.finalize(input, synthesis, user_msg.id).await
    }

    /// Streaming variant: same context assembly, tool use disabled
    pub async fn process_stream(
        &self,
        input: &str,
        on_chunk: StreamCallback<'_>,
    ) -> Result<String> {
        if !self.cost.check_budget() {
            return Err(ConvergioError::BudgetExceeded);
        }

        let user_msg = self.bus.send(MessageDraft::new(
            MessageType::UserInput,
            CHIEF,
            CHIEF,
            input,
        ));
        let system = self.chief_prompt();
        let conversation = self.assemble(input).await;

        let turn = self
            .provider
            .chat_stream(&system, &conversation, self.config.max_output_tokens, on_chunk)
            .await
            .map_err(|e| ConvergioError::Llm(e.to_string()))?;
        self.record_cost(CHIEF, &system, &conversation, &turn).await;

        self.finalize(input, turn.text, user_msg.id).await
    }

    /// The chief's system prompt with the current specialist roster
    fn chief_prompt(&self) -> String {
        let agents: Vec<String> = self
            .registry
            .active_agents()
            .into_iter()
            .filter(|a| a.id != CHIEF)
            .map(|a| a.name)
            .collect();
        chief_system_prompt(
            Utc::now(),
            &self.config.version,
            &self.config.workspace,
            &agents,
        )
    }

    async fn assemble(&self, input: &str) -> String {
        let project = self.project.lock().clone();
        let session = self.session.lock().clone();

        let recalls = match &self.semantic_memory {
            Some(memory) => memory.search(input, MAX_RECALLS, RECALL_MIN_SCORE).await,
            None => Vec::new(),
        };

        let memories = session.important_memories(MAX_IMPORTANT_MEMORIES);
        assemble_conversation(
            project.as_ref(),
            &memories,
            &recalls,
            session.recent_turns(context::MAX_RECENT_TURNS),
            input,
        )
    }

    /// Resolve each delegation and run the workers concurrently
    ///
    /// Returns successful responses sorted back into parse order.
    async fn fan_out(&self, delegations: &[Delegation], parent_id: u64) -> Vec<WorkerResponse> {
        debug!(category = "agent", phase = RequestPhase::FanOut.as_str(), count = delegations.len(), "fanning out");

        let cap = match self.provider.concurrency_limit() {
            Some(limit) => limit.min(self.config.local_concurrency_cap.max(1)),
            None => delegations.len().max(1),
        };
        let semaphore = Arc::new(Semaphore::new(cap.max(1)));
        let team = self
            .project
            .lock()
            .as_ref()
            .map(|p| p.team.clone())
            .unwrap_or_default();

        let mut join_set = JoinSet::new();
        for (index, delegation) in delegations.iter().enumerate() {
            // Spawn is idempotent, so this resolves existing agents too.
            let agent_id = self
                .registry
                .spawn(AgentRole::Executor, &delegation.name, None);
            let Some(agent) = self.registry.find_by_id(agent_id) else {
                warn!(category = "agent", name = %delegation.name, "delegation target unresolvable, skipping");
                continue;
            };

            if !team.is_empty() && !team.contains(&agent.name) {
                info!(category = "agent", agent = %agent.name, "out-of-team delegation");
            }

            self.bus.attach(agent.id);
            self.bus.send(
                MessageDraft::new(
                    MessageType::TaskDelegate,
                    CHIEF,
                    agent.id,
                    &delegation.reason,
                )
                .with_parent(parent_id),
            );

            let provider = self.provider.clone();
            let registry = self.registry.clone();
            let cost = self.cost.clone();
            let cancel = self.cancel.clone();
            let telemetry = self.telemetry.clone();
            let semaphore = semaphore.clone();
            let reason = delegation.reason.clone();
            let max_tokens = self.config.max_output_tokens;

            join_set.spawn(async move {
                let _permit = semaphore.acquire_owned().await.ok()?;
                if cancel.is_cancelled() {
                    return None;
                }

                registry.set_work_state(agent.id, WorkState::Thinking);
                let prompt = format!("Context from chief: {reason}");
                let started = Instant::now();
                let result = provider.chat(&agent.system_prompt, &prompt, max_tokens).await;
                let latency_ms = started.elapsed().as_millis() as u64;
                registry.set_work_state(agent.id, WorkState::Idle);

                match result {
                    Ok(turn) => {
                        telemetry.provider_call(provider.kind().as_str(), latency_ms, false, false);
                        let input_tokens = turn.usage.input_tokens.unwrap_or(
                            ((agent.system_prompt.chars().count() + prompt.chars().count()) / 4)
                                as u64,
                        );
                        let output_tokens = turn
                            .usage
                            .output_tokens
                            .unwrap_or((turn.text.chars().count() / 4) as u64);
                        cost.record_usage(
                            agent.id,
                            input_tokens,
                            output_tokens,
                            Some(provider.model_id()),
                            provider.is_metered(),
                        )
                        .await;
                        registry.add_tokens(agent.id, input_tokens, output_tokens);

                        Some(WorkerResponse {
                            index,
                            agent: agent.id,
                            display_name: agent.display_name(),
                            text: turn.text,
                        })
                    }
                    Err(err) => {
                        telemetry.provider_call(provider.kind().as_str(), latency_ms, false, true);
                        warn!(category = "agent", agent = %agent.name, error = %err, "worker failed, omitting from convergence");
                        None
                    }
                }
            });
        }

        let mut responses = Vec::new();
        while let Some(joined) = join_set.join_next().await {
            if let Ok(Some(response)) = joined {
                responses.push(response);
            }
        }
        // Convergence preserves parse order, not completion order.
        responses.sort_by_key(|r| r.index);

        for response in &responses {
            self.bus.send(
                MessageDraft::new(
                    MessageType::TaskReport,
                    response.agent,
                    CHIEF,
                    &response.text,
                )
                .with_parent(parent_id),
            );
        }
        responses
    }

    /// Synthesize specialist responses into one reply
    async fn converge(
        &self,
        input: &str,
        system: &str,
        responses: &[WorkerResponse],
        parent_id: u64,
    ) -> Result<String> {
        debug!(category = "agent", phase = RequestPhase::Converging.as_str(), workers = responses.len(), "synthesizing");

        let mut prompt = format!(
            "You delegated to {} specialist agents and they have reported back.\n\n",
            responses.len()
        );
        for response in responses {
            prompt.push_str(&format!(
                "## {}'s Response\n{}\n\n",
                response.display_name, response.text
            ));
        }
        prompt.push_str(&format!(
            "Original request: {input}\n\nSynthesize these specialist responses into a single, \
             coherent reply to the original request, attributing notable points to the agent \
             that made them."
        ));

        let turn = self
            .provider
            .chat(system, &prompt, self.config.max_output_tokens)
            .await
            .map_err(|err| {
                warn!(category = "agent", error = %err, "synthesis call failed");
                ConvergioError::DelegationFailed
            })?;
        self.record_cost(CHIEF, system, &prompt, &turn).await;

        self.bus.send(
            MessageDraft::new(MessageType::Convergence, CHIEF, CHIEF, &turn.text)
                .with_parent(parent_id),
        );
        Ok(turn.text)
    }

    /// Persist the response to session, bus and the attached plan
    async fn finalize(&self, input: &str, response: String, parent_id: u64) -> Result<String> {
        debug!(category = "agent", phase = RequestPhase::Finalize.as_str(), "persisting response");

        self.session.lock().push_turn(input, &response);
        self.bus.send(
            MessageDraft::new(MessageType::AgentResponse, CHIEF, BROADCAST, &response)
                .with_parent(parent_id),
        );

        let plan_log = self.plan_log.lock().clone();
        if let Some(log) = plan_log {
            let description: String = input.chars().take(120).collect();
            match log.tasks.add(log.plan_id, None, &description, Some("ali"), None).await {
                Ok(task) => {
                    let _ = log.tasks.claim(task.id, "ali").await;
                    let _ = log.tasks.complete(task.id, Some(&response)).await;
                    let _ = log.plans.refresh_status(log.plan_id).await;
                }
                Err(err) => {
                    warn!(category = "workflow", error = %err, "could not persist turn to plan");
                }
            }
        }

        Ok(response)
    }

    async fn record_cost(&self, agent: AgentId, system: &str, prompt: &str, turn: &ChatTurn) {
        // chars/4 fallback when the provider reports no counts
        let input_tokens = turn
            .usage
            .input_tokens
            .unwrap_or(((system.chars().count() + prompt.chars().count()) / 4) as u64);
        let output_tokens = turn
            .usage
            .output_tokens
            .unwrap_or((turn.text.chars().count() / 4) as u64);
        self.cost
            .record_usage(
                agent,
                input_tokens,
                output_tokens,
                Some(self.provider.model_id()),
                self.provider.is_metered(),
            )
            .await;
        self.registry.add_tokens(agent, input_tokens, output_tokens);
    }
}
