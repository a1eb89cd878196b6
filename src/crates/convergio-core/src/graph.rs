//! Workflow graphs: typed nodes, edges and the routing rules
//!
//! A [`Workflow`] owns its nodes in a flat arena (`Vec<WorkflowNode>`) and
//! every edge is a plain node id, so back-edges for retry loops never create
//! owning cycles. The entry node, `next_nodes` lists and `fallback_node`
//! references are all non-owning ids resolved through the arena.
//!
//! Routing is evaluated by [`Workflow::next_node`]:
//!
//! 1. An empty `next_nodes` list terminates the workflow.
//! 2. A set `condition_expr` (`key == value` / `key != value` over the state
//!    map) gates the first `next_nodes` entry; on a false condition the
//!    router falls through to `fallback_node`.
//! 3. Without a condition the first `next_nodes` entry is taken (linear path).

use crate::error::{CoreError, Result};
use crate::state::{validate_condition, validate_name, WorkflowState};
use crate::AgentId;
use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use uuid::Uuid;

/// Node identifier, unique within one workflow
pub type NodeId = u64;

/// What a node does when the engine reaches it
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum NodeType {
    /// Calls the assigned agent's provider with `action_prompt`
    Action,
    /// Pure branch point; the router decides, the node has no side effects
    Decision,
    /// Pauses the workflow until a caller resumes it
    HumanInput,
    /// Reserved: nested workflow execution
    Subgraph,
    /// Reserved: fork into concurrent branches
    Parallel,
    /// Reserved: join concurrent branches
    Converge,
}

impl NodeType {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Action => "action",
            Self::Decision => "decision",
            Self::HumanInput => "human_input",
            Self::Subgraph => "subgraph",
            Self::Parallel => "parallel",
            Self::Converge => "converge",
        }
    }
}

/// One node of a workflow graph
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkflowNode {
    pub node_id: NodeId,
    pub name: String,
    pub node_type: NodeType,
    /// Agent executing this node (action nodes)
    pub agent_id: Option<AgentId>,
    /// Prompt template for action nodes
    pub action_prompt: Option<String>,
    /// Routing condition (`key == value` / `key != value`)
    pub condition_expr: Option<String>,
    /// Outgoing edges in priority order
    pub next_nodes: Vec<NodeId>,
    /// Edge taken when the condition evaluates false
    pub fallback_node: Option<NodeId>,
}

/// Lifecycle status of a workflow
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkflowStatus {
    Pending,
    Running,
    Paused,
    Completed,
    Failed,
    Cancelled,
}

impl WorkflowStatus {
    pub fn as_str(self) -> &'static str {
        match self {
            Self::Pending => "pending",
            Self::Running => "running",
            Self::Paused => "paused",
            Self::Completed => "completed",
            Self::Failed => "failed",
            Self::Cancelled => "cancelled",
        }
    }

    /// Terminal statuses cannot transition anywhere else
    pub fn is_terminal(self) -> bool {
        matches!(self, Self::Completed | Self::Failed | Self::Cancelled)
    }
}

/// A directed graph of typed nodes plus the mutable execution state
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Workflow {
    pub workflow_id: Uuid,
    pub name: String,
    pub description: String,
    pub entry_node: Option<NodeId>,
    pub status: WorkflowStatus,
    pub current_node_id: Option<NodeId>,
    pub state: WorkflowState,
    pub error_message: Option<String>,
    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
    pub last_checkpoint_at: Option<DateTime<Utc>>,
    nodes: Vec<WorkflowNode>,
    #[serde(skip)]
    index: HashMap<NodeId, usize>,
    next_node_id: NodeId,
}

impl Workflow {
    /// Create an empty workflow
    pub fn new(name: impl Into<String>, description: impl Into<String>) -> Result<Self> {
        let name = name.into();
        validate_name(&name)?;
        let now = Utc::now();
        Ok(Self {
            workflow_id: Uuid::new_v4(),
            name,
            description: description.into(),
            entry_node: None,
            status: WorkflowStatus::Pending,
            current_node_id: None,
            state: WorkflowState::new(),
            error_message: None,
            created_at: now,
            updated_at: now,
            last_checkpoint_at: None,
            nodes: Vec::new(),
            index: HashMap::new(),
            next_node_id: 1,
        })
    }

    /// Add a node, allocating its id
    pub fn add_node(
        &mut self,
        name: impl Into<String>,
        node_type: NodeType,
    ) -> Result<NodeId> {
        let name = name.into();
        validate_name(&name)?;
        let node_id = self.next_node_id;
        self.next_node_id += 1;
        self.index.insert(node_id, self.nodes.len());
        self.nodes.push(WorkflowNode {
            node_id,
            name,
            node_type,
            agent_id: None,
            action_prompt: None,
            condition_expr: None,
            next_nodes: Vec::new(),
            fallback_node: None,
        });
        self.touch();
        Ok(node_id)
    }

    /// Set the entry node; must exist
    pub fn set_entry(&mut self, node_id: NodeId) -> Result<()> {
        self.require_node(node_id)?;
        self.entry_node = Some(node_id);
        self.touch();
        Ok(())
    }

    /// Add a directed edge `from -> to`; both nodes must exist
    ///
    /// Back-edges are permitted (retry loops); edges are ids, not owners.
    pub fn connect(&mut self, from: NodeId, to: NodeId) -> Result<()> {
        self.require_node(to)?;
        let node = self.node_mut(from)?;
        node.next_nodes.push(to);
        self.touch();
        Ok(())
    }

    /// Set the condition expression on a node, validating it first
    pub fn set_condition(&mut self, node_id: NodeId, expr: impl Into<String>) -> Result<()> {
        let expr = expr.into();
        validate_condition(&expr)?;
        self.node_mut(node_id)?.condition_expr = Some(expr);
        self.touch();
        Ok(())
    }

    /// Set the fallback edge of a node; target must exist
    pub fn set_fallback(&mut self, node_id: NodeId, fallback: NodeId) -> Result<()> {
        self.require_node(fallback)?;
        self.node_mut(node_id)?.fallback_node = Some(fallback);
        self.touch();
        Ok(())
    }

    /// Assign the executing agent of an action node
    pub fn set_agent(&mut self, node_id: NodeId, agent_id: AgentId) -> Result<()> {
        self.node_mut(node_id)?.agent_id = Some(agent_id);
        self.touch();
        Ok(())
    }

    /// Set the action prompt of a node
    pub fn set_action_prompt(&mut self, node_id: NodeId, prompt: impl Into<String>) -> Result<()> {
        self.node_mut(node_id)?.action_prompt = Some(prompt.into());
        self.touch();
        Ok(())
    }

    /// Look up a node by id
    pub fn node(&self, node_id: NodeId) -> Option<&WorkflowNode> {
        self.node_index(node_id).map(|i| &self.nodes[i])
    }

    /// Mutable node lookup, erroring on unknown ids
    pub fn node_mut(&mut self, node_id: NodeId) -> Result<&mut WorkflowNode> {
        let idx = self
            .node_index(node_id)
            .ok_or_else(|| CoreError::Graph(format!("unknown node id {node_id}")))?;
        Ok(&mut self.nodes[idx])
    }

    /// All nodes in insertion order
    pub fn nodes(&self) -> &[WorkflowNode] {
        &self.nodes
    }

    /// Number of nodes
    pub fn node_count(&self) -> usize {
        self.nodes.len()
    }

    /// Bump `updated_at`
    pub fn touch(&mut self) {
        self.updated_at = Utc::now();
    }

    /// Rebuild the id index after deserialization
    pub fn rebuild_index(&mut self) {
        self.index = self
            .nodes
            .iter()
            .enumerate()
            .map(|(i, n)| (n.node_id, i))
            .collect();
    }

    fn node_index(&self, node_id: NodeId) -> Option<usize> {
        if let Some(&i) = self.index.get(&node_id) {
            return Some(i);
        }
        // Index may be empty after deserialization; fall back to a scan.
        self.nodes.iter().position(|n| n.node_id == node_id)
    }

    fn require_node(&self, node_id: NodeId) -> Result<()> {
        if self.node_index(node_id).is_none() {
            return Err(CoreError::Graph(format!("unknown node id {node_id}")));
        }
        Ok(())
    }

    /// Compute the node that follows `current` given the present state
    ///
    /// Returns `Ok(None)` when the workflow terminates at `current`.
    pub fn next_node(&self, current: NodeId) -> Result<Option<NodeId>> {
        let node = self
            .node(current)
            .ok_or_else(|| CoreError::Graph(format!("unknown node id {current}")))?;

        if node.next_nodes.is_empty() {
            return Ok(None);
        }

        if let Some(expr) = &node.condition_expr {
            if eval_condition(expr, &self.state)? {
                return Ok(Some(node.next_nodes[0]));
            }
            return Ok(node.fallback_node);
        }

        Ok(Some(node.next_nodes[0]))
    }
}

/// Evaluate a routing condition against the state map
///
/// Grammar: `key == value` or `key != value`. A missing key compares unequal
/// to every value, so `==` on a missing key is false and `!=` is true.
pub fn eval_condition(expr: &str, state: &WorkflowState) -> Result<bool> {
    validate_condition(expr)?;

    let (key, value, negated) = if let Some((k, v)) = expr.split_once("==") {
        (k.trim(), v.trim(), false)
    } else if let Some((k, v)) = expr.split_once("!=") {
        (k.trim(), v.trim(), true)
    } else {
        return Err(CoreError::Validation(format!(
            "unsupported condition expression {expr:?}"
        )));
    };

    let matches = state.get(key) == Some(value);
    Ok(if negated { !matches } else { matches })
}

#[cfg(test)]
mod tests {
    use super::*;

    fn linear_workflow() -> (Workflow, NodeId, NodeId) {
        let mut wf = Workflow::new("test", "two step").unwrap();
        let a = wf.add_node("first", NodeType::Action).unwrap();
        let b = wf.add_node("second", NodeType::Action).unwrap();
        wf.connect(a, b).unwrap();
        wf.set_entry(a).unwrap();
        (wf, a, b)
    }

    #[test]
    fn test_node_ids_are_monotone() {
        let (wf, a, b) = linear_workflow();
        assert!(b > a);
        assert_eq!(wf.node_count(), 2);
    }

    #[test]
    fn test_linear_routing() {
        let (wf, a, b) = linear_workflow();
        assert_eq!(wf.next_node(a).unwrap(), Some(b));
        assert_eq!(wf.next_node(b).unwrap(), None);
    }

    #[test]
    fn test_connect_unknown_target_fails() {
        let (mut wf, a, _) = linear_workflow();
        assert!(wf.connect(a, 999).is_err());
    }

    #[test]
    fn test_conditional_routing_matches() {
        let mut wf = Workflow::new("router", "").unwrap();
        let d = wf.add_node("decide", NodeType::Decision).unwrap();
        let fast = wf.add_node("fast path", NodeType::Action).unwrap();
        let slow = wf.add_node("slow path", NodeType::Action).unwrap();
        wf.connect(d, fast).unwrap();
        wf.set_condition(d, "mode == fast").unwrap();
        wf.set_fallback(d, slow).unwrap();

        wf.state.set("mode", "fast").unwrap();
        assert_eq!(wf.next_node(d).unwrap(), Some(fast));

        wf.state.set("mode", "slow").unwrap();
        assert_eq!(wf.next_node(d).unwrap(), Some(slow));
    }

    #[test]
    fn test_conditional_routing_missing_key() {
        let mut wf = Workflow::new("router", "").unwrap();
        let d = wf.add_node("decide", NodeType::Decision).unwrap();
        let yes = wf.add_node("yes", NodeType::Action).unwrap();
        let no = wf.add_node("no", NodeType::Action).unwrap();
        wf.connect(d, yes).unwrap();
        wf.set_fallback(d, no).unwrap();

        // Missing key: == is false, routes to fallback
        wf.set_condition(d, "mode == fast").unwrap();
        assert_eq!(wf.next_node(d).unwrap(), Some(no));

        // Missing key: != is true, routes to the conditional edge
        wf.set_condition(d, "mode != fast").unwrap();
        assert_eq!(wf.next_node(d).unwrap(), Some(yes));
    }

    #[test]
    fn test_condition_without_fallback_terminates() {
        let mut wf = Workflow::new("router", "").unwrap();
        let d = wf.add_node("decide", NodeType::Decision).unwrap();
        let next = wf.add_node("next", NodeType::Action).unwrap();
        wf.connect(d, next).unwrap();
        wf.set_condition(d, "mode == fast").unwrap();

        assert_eq!(wf.next_node(d).unwrap(), None);
    }

    #[test]
    fn test_back_edges_allowed() {
        let mut wf = Workflow::new("loop", "").unwrap();
        let work = wf.add_node("work", NodeType::Action).unwrap();
        let check = wf.add_node("check", NodeType::Decision).unwrap();
        wf.connect(work, check).unwrap();
        wf.connect(check, work).unwrap(); // retry loop
        assert_eq!(wf.next_node(check).unwrap(), Some(work));
    }

    #[test]
    fn test_eval_condition_rejects_garbage() {
        let state = WorkflowState::new();
        assert!(eval_condition("no operator here", &state).is_err());
        assert!(eval_condition("eval(x) == y", &state).is_err());
    }

    #[test]
    fn test_terminal_statuses() {
        assert!(WorkflowStatus::Completed.is_terminal());
        assert!(WorkflowStatus::Failed.is_terminal());
        assert!(WorkflowStatus::Cancelled.is_terminal());
        assert!(!WorkflowStatus::Running.is_terminal());
        assert!(!WorkflowStatus::Paused.is_terminal());
    }
}
