//! The workflow engine
//!
//! Walks a [`Workflow`] graph node by node: executes each node according to
//! its type, routes through the graph's conditions, retries transient
//! failures with exponential backoff, and checkpoints state through the
//! plan store. The engine holds no locks across provider calls and mutates
//! workflow state only between node executions.
//!
//! Status handling on failure follows the error taxonomy: network and
//! LLM-down failures leave the workflow `paused` (it can resume once the
//! backend returns), every other exhausted or terminal error marks it
//! `failed` with the message kept in `error_message`.

use crate::error::{EngineError, Result};
use crate::retry::{with_retry, RetryPolicy};
use convergio_agents::{AgentRegistry, CostController, WorkState};
use convergio_core::{
    CancelToken, ChatProvider, CoreError, ErrorKind, Guardrails, NodeType, SensitiveCategory,
    StateSnapshotEntry, Telemetry, Verdict, Workflow, WorkflowNode, WorkflowStatus,
};
use convergio_store::{CheckpointRecord, CheckpointRepository};
use chrono::Utc;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, info, warn};
use uuid::Uuid;

/// State key consulted for the per-node timeout override
pub const NODE_TIMEOUT_KEY: &str = "node_timeout";

/// Engine tunables
#[derive(Debug, Clone, Copy)]
pub struct EngineConfig {
    /// Per-node timeout unless overridden via the `node_timeout` state key
    pub default_node_timeout_secs: u64,
    /// Output-token cap passed to the provider
    pub max_output_tokens: u32,
    pub retry: RetryPolicy,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            default_node_timeout_secs: 300,
            max_output_tokens: 4096,
            retry: RetryPolicy::default(),
        }
    }
}

/// Executes workflows against a provider, registry and checkpoint store
pub struct WorkflowEngine {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<AgentRegistry>,
    cost: Arc<CostController>,
    guardrails: Guardrails,
    checkpoints: CheckpointRepository,
    telemetry: Arc<Telemetry>,
    cancel: CancelToken,
    config: EngineConfig,
}

impl WorkflowEngine {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        registry: Arc<AgentRegistry>,
        cost: Arc<CostController>,
        checkpoints: CheckpointRepository,
        telemetry: Arc<Telemetry>,
        config: EngineConfig,
    ) -> Self {
        Self {
            provider,
            registry,
            cost,
            guardrails: Guardrails::new(),
            checkpoints,
            telemetry,
            cancel: CancelToken::new(),
            config,
        }
    }

    /// Replace the guardrail policy (to register an approval hook)
    pub fn set_guardrails(&mut self, guardrails: Guardrails) {
        self.guardrails = guardrails;
    }

    /// Token other components may use to cancel in-flight work
    pub fn cancel_token(&self) -> CancelToken {
        self.cancel.clone()
    }

    /// Run a workflow from its entry node to completion or pause
    ///
    /// The input lands at state key `input`; the returned output is the
    /// state value under `output` when a node wrote one, otherwise the last
    /// node's carried result.
    pub async fn execute(&self, workflow: &mut Workflow, input: &str) -> Result<String> {
        let entry = workflow.entry_node.ok_or(EngineError::NoEntryNode)?;
        workflow.status = WorkflowStatus::Running;
        workflow.current_node_id = Some(entry);
        workflow.error_message = None;
        workflow.state.set("input", input)?;
        workflow.touch();

        self.telemetry.workflow_started();
        info!(category = "workflow", workflow = %workflow.workflow_id, name = %workflow.name, "workflow started");

        self.run_from(workflow, entry, input.to_string()).await
    }

    /// Pause a running workflow
    pub fn pause(&self, workflow: &mut Workflow) -> Result<()> {
        if workflow.status != WorkflowStatus::Running {
            return Err(EngineError::Control(format!(
                "cannot pause a {} workflow",
                workflow.status.as_str()
            )));
        }
        workflow.status = WorkflowStatus::Paused;
        workflow.touch();
        Ok(())
    }

    /// Cancel a workflow; terminal workflows cannot be cancelled
    pub fn cancel_workflow(&self, workflow: &mut Workflow) -> Result<()> {
        if workflow.status.is_terminal() {
            return Err(EngineError::Control(format!(
                "cannot cancel a {} workflow",
                workflow.status.as_str()
            )));
        }
        workflow.status = WorkflowStatus::Cancelled;
        workflow.touch();
        Ok(())
    }

    /// Resume a paused workflow, optionally restoring a checkpoint first
    ///
    /// The current node counts as handled: a human-input answer is stored as
    /// that node's result and execution continues with the node that follows
    /// it.
    pub async fn resume(
        &self,
        workflow: &mut Workflow,
        checkpoint: Option<Uuid>,
        human_input: Option<&str>,
    ) -> Result<String> {
        if workflow.status != WorkflowStatus::Paused {
            return Err(EngineError::Control(format!(
                "cannot resume a {} workflow",
                workflow.status.as_str()
            )));
        }
        if let Some(checkpoint_id) = checkpoint {
            self.restore(workflow, checkpoint_id).await?;
        }

        let current = workflow
            .current_node_id
            .or(workflow.entry_node)
            .ok_or(EngineError::NoEntryNode)?;

        let carried = match human_input {
            Some(answer) => {
                workflow
                    .state
                    .set(&format!("node_{current}_result"), answer)?;
                answer.to_string()
            }
            None => workflow
                .state
                .get(&format!("node_{current}_result"))
                .or_else(|| workflow.state.get("input"))
                .unwrap_or_default()
                .to_string(),
        };

        workflow.status = WorkflowStatus::Running;
        workflow.touch();

        match workflow.next_node(current)? {
            Some(next) => {
                workflow.current_node_id = Some(next);
                self.run_from(workflow, next, carried).await
            }
            None => {
                self.finish(workflow);
                Ok(self.final_output(workflow, carried))
            }
        }
    }

    /// Snapshot the workflow state into an append-only checkpoint
    pub async fn checkpoint(&self, workflow: &mut Workflow, label: Option<&str>) -> Result<Uuid> {
        let node_id = workflow
            .current_node_id
            .or(workflow.entry_node)
            .unwrap_or_default();
        let state_json =
            serde_json::to_string(&workflow.state.snapshot()).map_err(CoreError::Serde)?;
        let metadata = label.map(|l| serde_json::json!({ "label": l }).to_string());

        let id = self
            .checkpoints
            .save(workflow.workflow_id, node_id, &state_json, metadata.as_deref())
            .await?;
        workflow.last_checkpoint_at = Some(Utc::now());
        workflow.touch();
        Ok(id)
    }

    /// Restore a checkpoint into the workflow
    ///
    /// The checkpoint must belong to this workflow. The restored workflow is
    /// left `paused`; it never auto-runs.
    pub async fn restore(&self, workflow: &mut Workflow, checkpoint_id: Uuid) -> Result<()> {
        let record = self
            .checkpoints
            .get(checkpoint_id)
            .await?
            .ok_or_else(|| {
                EngineError::Store(convergio_store::StoreError::NotFound(format!(
                    "checkpoint {checkpoint_id}"
                )))
            })?;
        if record.workflow_id != workflow.workflow_id {
            return Err(EngineError::CheckpointMismatch {
                checkpoint: checkpoint_id,
                workflow: workflow.workflow_id,
            });
        }

        let snapshot: Vec<StateSnapshotEntry> =
            serde_json::from_str(&record.state_json).map_err(CoreError::Serde)?;
        workflow.state.clear();
        workflow.state.replay(snapshot)?;
        workflow.current_node_id = Some(record.node_id);
        workflow.status = WorkflowStatus::Paused;
        workflow.touch();
        info!(category = "workflow", workflow = %workflow.workflow_id, checkpoint = %checkpoint_id, "checkpoint restored");
        Ok(())
    }

    /// All checkpoints of a workflow, newest first
    pub async fn list_checkpoints(&self, workflow_id: Uuid) -> Result<Vec<CheckpointRecord>> {
        Ok(self.checkpoints.list_for_workflow(workflow_id).await?)
    }

    async fn run_from(
        &self,
        workflow: &mut Workflow,
        start: u64,
        mut carried: String,
    ) -> Result<String> {
        let mut current = start;
        loop {
            let node = workflow
                .node(current)
                .ok_or_else(|| CoreError::Graph(format!("unknown node id {current}")))?
                .clone();

            debug!(category = "workflow", node = node.node_id, name = %node.name, "node started");
            self.telemetry.node_executed();
            let started = Instant::now();

            let outcome = self.execute_node(workflow, &node, &carried).await;
            let latency_ms = started.elapsed().as_millis() as u64;

            match outcome {
                Ok(NodeOutcome::Output(output)) => {
                    debug!(category = "workflow", node = node.node_id, latency_ms, "node finished");
                    carried = output;
                }
                Ok(NodeOutcome::Paused) => {
                    info!(category = "workflow", node = node.node_id, "workflow paused for human input");
                    return Ok(carried);
                }
                Err(err) => {
                    let kind = err.kind();
                    self.telemetry.node_error();
                    self.telemetry.workflow_failed();
                    workflow.error_message = Some(err.to_string());
                    workflow.state.set("last_error_kind", kind.as_str()).ok();
                    workflow.status = match kind {
                        ErrorKind::Network | ErrorKind::LlmDown => WorkflowStatus::Paused,
                        _ => WorkflowStatus::Failed,
                    };
                    workflow.touch();
                    warn!(category = "workflow", node = node.node_id, kind = %kind, error = %err, "workflow failed");
                    return Err(err);
                }
            }

            match workflow.next_node(current)? {
                Some(next) => {
                    current = next;
                    workflow.current_node_id = Some(next);
                    workflow.touch();
                }
                None => break,
            }
        }

        self.finish(workflow);
        Ok(self.final_output(workflow, carried))
    }

    fn finish(&self, workflow: &mut Workflow) {
        workflow.status = WorkflowStatus::Completed;
        workflow.touch();
        self.telemetry.workflow_completed();
        info!(category = "workflow", workflow = %workflow.workflow_id, "workflow completed");
    }

    fn final_output(&self, workflow: &Workflow, carried: String) -> String {
        workflow
            .state
            .get("output")
            .map(str::to_string)
            .unwrap_or(carried)
    }

    async fn execute_node(
        &self,
        workflow: &mut Workflow,
        node: &WorkflowNode,
        carried: &str,
    ) -> Result<NodeOutcome> {
        match node.node_type {
            NodeType::Action => {
                let timeout_secs = workflow
                    .state
                    .get(NODE_TIMEOUT_KEY)
                    .and_then(|v| v.parse().ok())
                    .unwrap_or(self.config.default_node_timeout_secs);

                let text = with_retry(&self.config.retry, &node.name, || {
                    self.run_action(node, carried, timeout_secs)
                })
                .await?;

                workflow
                    .state
                    .set(&format!("node_{}_result", node.node_id), &text)?;
                Ok(NodeOutcome::Output(text))
            }
            NodeType::Decision => Ok(NodeOutcome::Output(carried.to_string())),
            NodeType::HumanInput => {
                workflow.status = WorkflowStatus::Paused;
                workflow.touch();
                Ok(NodeOutcome::Paused)
            }
            NodeType::Parallel => Err(EngineError::UnsupportedNode("parallel")),
            NodeType::Converge => Err(EngineError::UnsupportedNode("converge")),
            NodeType::Subgraph => Err(EngineError::UnsupportedNode("subgraph")),
        }
    }

    /// One action-node provider call: guardrails, pre-checks, timeout, cost
    async fn run_action(
        &self,
        node: &WorkflowNode,
        carried: &str,
        timeout_secs: u64,
    ) -> Result<String> {
        if self.cancel.is_cancelled() {
            return Err(EngineError::Cancelled);
        }

        let agent_id = node.agent_id.ok_or(EngineError::AgentNotFound { node: node.node_id })?;
        let agent = self
            .registry
            .find_by_id(agent_id)
            .ok_or(EngineError::AgentNotFound { node: node.node_id })?;

        let prompt = format!(
            "{}\n\nInput: {}",
            node.action_prompt.as_deref().unwrap_or_default(),
            carried
        );

        let classification = self.guardrails.classify(&prompt);
        match classification.verdict {
            Verdict::Block => {
                return Err(CoreError::Blocked(format!(
                    "node {} content matched {}",
                    node.name,
                    classification.category.unwrap_or("a blocked category")
                ))
                .into());
            }
            Verdict::HumanReview => {
                let categories = review_categories(classification.category);
                let operation = format!("workflow node '{}'", node.name);
                if !self.guardrails.approve(&operation, &categories) {
                    return Err(EngineError::Denied(operation));
                }
            }
            Verdict::Warn => {
                warn!(category = "security", node = %node.name, "action content flagged as sensitive");
            }
            Verdict::Ok => {}
        }

        if !self.cost.check_budget() {
            return Err(EngineError::BudgetExceeded);
        }
        if !self.provider.is_available().await {
            return Err(CoreError::provider_kind(
                ErrorKind::ProviderUnavailable,
                "provider is not reachable",
            )
            .into());
        }

        self.registry.set_work_state(agent.id, WorkState::Thinking);
        let started = Instant::now();
        let result = tokio::time::timeout(
            Duration::from_secs(timeout_secs),
            self.provider
                .chat(&agent.system_prompt, &prompt, self.config.max_output_tokens),
        )
        .await;
        self.registry.set_work_state(agent.id, WorkState::Idle);
        let latency_ms = started.elapsed().as_millis() as u64;

        let turn = match result {
            Err(_) => {
                self.telemetry
                    .provider_call(self.provider.kind().as_str(), latency_ms, false, true);
                return Err(CoreError::provider_kind(
                    ErrorKind::Timeout,
                    format!("node '{}' timed out after {timeout_secs}s", node.name),
                )
                .into());
            }
            Ok(Err(e)) => {
                self.telemetry
                    .provider_call(self.provider.kind().as_str(), latency_ms, false, true);
                return Err(e.into());
            }
            Ok(Ok(turn)) => turn,
        };
        self.telemetry
            .provider_call(self.provider.kind().as_str(), latency_ms, false, false);

        // chars/4 fallback when the provider does not report token counts
        let input_tokens = turn
            .usage
            .input_tokens
            .unwrap_or(((agent.system_prompt.chars().count() + prompt.chars().count()) / 4) as u64);
        let output_tokens = turn
            .usage
            .output_tokens
            .unwrap_or((turn.text.chars().count() / 4) as u64);

        self.cost
            .record_usage(
                agent.id,
                input_tokens,
                output_tokens,
                Some(self.provider.model_id()),
                self.provider.is_metered(),
            )
            .await;
        self.registry.add_tokens(agent.id, input_tokens, output_tokens);

        Ok(turn.text)
    }
}

enum NodeOutcome {
    Output(String),
    Paused,
}

fn review_categories(category: Option<&'static str>) -> Vec<SensitiveCategory> {
    match category {
        Some("privacy") => vec![SensitiveCategory::PersonalData],
        Some("data_deletion") => vec![SensitiveCategory::DataDelete],
        _ => vec![SensitiveCategory::PersonalData],
    }
}
