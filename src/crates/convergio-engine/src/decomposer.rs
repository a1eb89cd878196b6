//! LLM-driven task decomposition
//!
//! Turns a goal into a DAG of role-tagged subtasks. The model is asked for a
//! strict JSON shape; parsing is defensive (size, count and length limits,
//! injection denylist, index validation) because the payload is model
//! output, not trusted input. Accepted graphs are checked for cycles by DFS
//! coloring, ordered by Kahn's algorithm, and executed in parallel waves of
//! ready tasks.

use crate::error::{EngineError, Result};
use crate::retry::{with_retry, RetryPolicy};
use convergio_agents::{AgentRegistry, AgentRole, CostController};
use convergio_core::{telemetry, CancelToken, ChatProvider, CHIEF};
use serde_json::Value;
use std::collections::VecDeque;
use std::sync::Arc;
use tokio::task::JoinSet;
use tracing::{debug, info, warn};

/// Hard cap on the decomposition payload size
pub const MAX_PAYLOAD_BYTES: usize = 1024 * 1024;

/// Maximum number of subtasks accepted from one decomposition
pub const MAX_TASKS: usize = 50;

/// Maximum prerequisites per task
pub const MAX_PREREQUISITES: usize = 20;

const MAX_DESCRIPTION_CHARS: usize = 512;
const MAX_VALIDATION_CHARS: usize = 256;

/// Substrings that disqualify a task string outright
const INJECTION_DENYLIST: &[&str] = &["<script", "javascript:", "eval(", "exec("];

/// Lifecycle of a decomposed task
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecomposedStatus {
    Pending,
    InProgress,
    Completed,
    Failed,
}

/// One subtask of a decomposed goal
#[derive(Debug, Clone)]
pub struct DecomposedTask {
    pub task_id: usize,
    pub description: String,
    pub required_role: AgentRole,
    /// Indexes of tasks that must complete first
    pub prerequisites: Vec<usize>,
    pub validation: Option<String>,
    pub status: DecomposedStatus,
    pub result: Option<String>,
    pub max_retries: u32,
}

/// Decomposes goals and executes the resulting task graph
pub struct TaskDecomposer {
    provider: Arc<dyn ChatProvider>,
    registry: Arc<AgentRegistry>,
    cost: Arc<CostController>,
    cancel: CancelToken,
    retry: RetryPolicy,
    max_output_tokens: u32,
}

impl TaskDecomposer {
    pub fn new(
        provider: Arc<dyn ChatProvider>,
        registry: Arc<AgentRegistry>,
        cost: Arc<CostController>,
        cancel: CancelToken,
        retry: RetryPolicy,
    ) -> Self {
        Self {
            provider,
            registry,
            cost,
            cancel,
            retry,
            max_output_tokens: 4096,
        }
    }

    /// Prompt asking the model for the decomposition JSON
    pub fn build_prompt(goal: &str, roles: &[AgentRole]) -> String {
        let roster: Vec<&str> = roles.iter().map(|r| r.as_str()).collect();
        format!(
            "Break the following goal into concrete subtasks.\n\
             Goal: {goal}\n\n\
             Available roles: {}\n\n\
             Respond with JSON only, in exactly this shape:\n\
             {{\"tasks\":[{{\"description\":\"...\",\"role\":\"...\",\"prerequisites\":[0],\"validation\":\"...\"}}]}}\n\
             Rules: at most {MAX_TASKS} tasks; \"prerequisites\" lists indexes of earlier tasks \
             that must finish first; \"validation\" states how to verify the task succeeded.",
            roster.join(", ")
        )
    }

    /// Decompose a goal into a validated, cycle-free task list
    pub async fn decompose(&self, goal: &str, roles: &[AgentRole]) -> Result<Vec<DecomposedTask>> {
        let prompt = Self::build_prompt(goal, roles);
        let turn = self
            .provider
            .chat(
                "You are a planning assistant that answers with strict JSON.",
                &prompt,
                self.max_output_tokens,
            )
            .await?;

        let input_tokens = turn
            .usage
            .input_tokens
            .unwrap_or((prompt.chars().count() / 4) as u64);
        let output_tokens = turn
            .usage
            .output_tokens
            .unwrap_or((turn.text.chars().count() / 4) as u64);
        self.cost
            .record_usage(
                CHIEF,
                input_tokens,
                output_tokens,
                Some(self.provider.model_id()),
                self.provider.is_metered(),
            )
            .await;

        let tasks = parse_tasks(&turn.text)?;
        resolve_dependencies(&tasks)?;
        info!(category = "workflow", tasks = tasks.len(), "goal decomposed");
        Ok(tasks)
    }

    /// Execute the graph wave by wave until nothing is ready
    ///
    /// Each wave dispatches every ready task concurrently; a task whose
    /// prerequisites failed never becomes ready and stays pending.
    pub async fn execute_parallel(&self, tasks: &mut [DecomposedTask]) -> Result<()> {
        loop {
            let ready = get_ready(tasks);
            if ready.is_empty() {
                break;
            }
            debug!(category = "workflow", wave = ready.len(), "dispatching ready tasks");

            let mut join_set = JoinSet::new();
            for idx in ready {
                tasks[idx].status = DecomposedStatus::InProgress;
                let task = tasks[idx].clone();
                let provider = self.provider.clone();
                let registry = self.registry.clone();
                let cost = self.cost.clone();
                let cancel = self.cancel.clone();
                let retry = self.retry;
                let max_tokens = self.max_output_tokens;

                join_set.spawn(async move {
                    let outcome = run_task(
                        &task, provider, registry, cost, cancel, retry, max_tokens,
                    )
                    .await;
                    (idx, outcome)
                });
            }

            while let Some(joined) = join_set.join_next().await {
                let (idx, outcome) = joined.map_err(|e| EngineError::Decompose(e.to_string()))?;
                match outcome {
                    Ok(result) => {
                        tasks[idx].status = DecomposedStatus::Completed;
                        tasks[idx].result = Some(result);
                    }
                    Err(EngineError::Cancelled) => {
                        tasks[idx].status = DecomposedStatus::Pending;
                        return Err(EngineError::Cancelled);
                    }
                    Err(err) => {
                        warn!(category = "workflow", task = idx, error = %err, "subtask failed");
                        tasks[idx].status = DecomposedStatus::Failed;
                        tasks[idx].result = Some(err.to_string());
                    }
                }
            }
        }
        Ok(())
    }
}

#[allow(clippy::too_many_arguments)]
async fn run_task(
    task: &DecomposedTask,
    provider: Arc<dyn ChatProvider>,
    registry: Arc<AgentRegistry>,
    cost: Arc<CostController>,
    cancel: CancelToken,
    retry: RetryPolicy,
    max_tokens: u32,
) -> Result<String> {
    if cancel.is_cancelled() {
        return Err(EngineError::Cancelled);
    }

    let agent = registry
        .find_by_role(task.required_role)
        .map(|a| a.id)
        .unwrap_or_else(|| registry.spawn(task.required_role, task.required_role.as_str(), None));
    let agent = registry
        .find_by_id(agent)
        .ok_or(EngineError::AgentNotFound { node: 0 })?;

    let mut prompt = format!("Task: {}", task.description);
    if let Some(validation) = &task.validation {
        prompt.push_str(&format!("\n\nValidation criteria: {validation}"));
    }

    let policy = RetryPolicy::new(task.max_retries.min(retry.max_retries), retry.base_delay_secs);
    let turn = with_retry(&policy, &format!("task-{}", task.task_id), || {
        let provider = provider.clone();
        let cancel = cancel.clone();
        let system = agent.system_prompt.clone();
        let prompt = prompt.clone();
        async move {
            if cancel.is_cancelled() {
                return Err(EngineError::Cancelled);
            }
            provider
                .chat(&system, &prompt, max_tokens)
                .await
                .map_err(EngineError::from)
        }
    })
    .await?;

    let input_tokens = turn
        .usage
        .input_tokens
        .unwrap_or(((agent.system_prompt.chars().count() + prompt.chars().count()) / 4) as u64);
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

    Ok(turn.text)
}

/// Parse and validate the decomposition payload
pub fn parse_tasks(payload: &str) -> Result<Vec<DecomposedTask>> {
    if payload.len() > MAX_PAYLOAD_BYTES {
        telemetry::audit_validation_failure("decomposer", "payload over size limit");
        return Err(EngineError::Decompose("payload exceeds 1 MiB".into()));
    }

    // Models often wrap JSON in prose or code fences; take the outermost
    // object.
    let json_slice = match (payload.find('{'), payload.rfind('}')) {
        (Some(start), Some(end)) if end > start => &payload[start..=end],
        _ => {
            return Err(EngineError::Decompose("no JSON object in payload".into()));
        }
    };

    let root: Value =
        serde_json::from_str(json_slice).map_err(|e| EngineError::Decompose(e.to_string()))?;
    let Value::Object(root) = root else {
        return Err(EngineError::Decompose("root is not an object".into()));
    };
    let tasks_value = root
        .get("tasks")
        .and_then(Value::as_array)
        .ok_or_else(|| EngineError::Decompose("missing tasks array".into()))?;

    if tasks_value.len() > MAX_TASKS {
        telemetry::audit_validation_failure("decomposer", "too many tasks");
        return Err(EngineError::Decompose(format!(
            "{} tasks exceeds the limit of {MAX_TASKS}",
            tasks_value.len()
        )));
    }

    let count = tasks_value.len();
    let mut tasks = Vec::with_capacity(count);
    for (index, entry) in tasks_value.iter().enumerate() {
        let description = entry
            .get("description")
            .and_then(Value::as_str)
            .ok_or_else(|| EngineError::Decompose(format!("task {index} has no description")))?;
        check_task_string("description", index, description, MAX_DESCRIPTION_CHARS)?;

        let validation = entry.get("validation").and_then(Value::as_str);
        if let Some(validation) = validation {
            check_task_string("validation", index, validation, MAX_VALIDATION_CHARS)?;
        }

        let role = entry
            .get("role")
            .and_then(Value::as_str)
            .map(AgentRole::parse_or_executor)
            .unwrap_or(AgentRole::Executor);

        let mut prerequisites = Vec::new();
        if let Some(list) = entry.get("prerequisites").and_then(Value::as_array) {
            if list.len() > MAX_PREREQUISITES {
                return Err(EngineError::Decompose(format!(
                    "task {index} has more than {MAX_PREREQUISITES} prerequisites"
                )));
            }
            for value in list {
                let prereq = value.as_u64().ok_or_else(|| {
                    EngineError::Decompose(format!("task {index} has a non-numeric prerequisite"))
                })? as usize;
                if prereq >= count {
                    return Err(EngineError::Decompose(format!(
                        "task {index} references unknown task {prereq}"
                    )));
                }
                if prereq == index {
                    return Err(EngineError::Decompose(format!(
                        "task {index} lists itself as a prerequisite"
                    )));
                }
                if !prerequisites.contains(&prereq) {
                    prerequisites.push(prereq);
                }
            }
        }

        tasks.push(DecomposedTask {
            task_id: index,
            description: description.trim().to_string(),
            required_role: role,
            prerequisites,
            validation: validation.map(|v| v.trim().to_string()),
            status: DecomposedStatus::Pending,
            result: None,
            max_retries: 2,
        });
    }
    Ok(tasks)
}

fn check_task_string(field: &str, index: usize, value: &str, max_chars: usize) -> Result<()> {
    if value.chars().count() > max_chars {
        return Err(EngineError::Decompose(format!(
            "task {index} {field} exceeds {max_chars} characters"
        )));
    }
    let lower = value.to_lowercase();
    for token in INJECTION_DENYLIST {
        if lower.contains(token) {
            telemetry::audit_validation_failure("decomposer", token);
            return Err(EngineError::Decompose(format!(
                "task {index} {field} contains forbidden content"
            )));
        }
    }
    Ok(())
}

/// Verify the prerequisite graph is a DAG (DFS coloring)
pub fn resolve_dependencies(tasks: &[DecomposedTask]) -> Result<()> {
    #[derive(Clone, Copy, PartialEq)]
    enum Color {
        White,
        Gray,
        Black,
    }

    fn visit(index: usize, tasks: &[DecomposedTask], colors: &mut [Color]) -> Result<()> {
        colors[index] = Color::Gray;
        for &prereq in &tasks[index].prerequisites {
            match colors[prereq] {
                Color::Gray => return Err(EngineError::CycleDetected(prereq)),
                Color::White => visit(prereq, tasks, colors)?,
                Color::Black => {}
            }
        }
        colors[index] = Color::Black;
        Ok(())
    }

    let mut colors = vec![Color::White; tasks.len()];
    for index in 0..tasks.len() {
        if colors[index] == Color::White {
            visit(index, tasks, &mut colors)?;
        }
    }
    Ok(())
}

/// Stable topological order via Kahn's algorithm
///
/// Ties resolve in task-index order, so the result is deterministic for a
/// given graph.
pub fn topological_sort(tasks: &[DecomposedTask]) -> Result<Vec<usize>> {
    let count = tasks.len();
    let mut in_degree = vec![0usize; count];
    let mut dependents: Vec<Vec<usize>> = vec![Vec::new(); count];
    for task in tasks {
        in_degree[task.task_id] = task.prerequisites.len();
        for &prereq in &task.prerequisites {
            dependents[prereq].push(task.task_id);
        }
    }

    let mut queue: VecDeque<usize> = (0..count).filter(|&i| in_degree[i] == 0).collect();
    let mut order = Vec::with_capacity(count);
    while let Some(index) = queue.pop_front() {
        order.push(index);
        for &dependent in &dependents[index] {
            in_degree[dependent] -= 1;
            if in_degree[dependent] == 0 {
                // Keep the queue index-sorted for a stable order
                let position = queue.partition_point(|&q| q < dependent);
                queue.insert(position, dependent);
            }
        }
    }

    if order.len() != count {
        let stuck = (0..count).find(|&i| in_degree[i] > 0).unwrap_or(0);
        return Err(EngineError::CycleDetected(stuck));
    }
    Ok(order)
}

/// Pending tasks whose prerequisites are all completed
pub fn get_ready(tasks: &[DecomposedTask]) -> Vec<usize> {
    tasks
        .iter()
        .filter(|t| {
            t.status == DecomposedStatus::Pending
                && t.prerequisites
                    .iter()
                    .all(|&p| tasks[p].status == DecomposedStatus::Completed)
        })
        .map(|t| t.task_id)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn task(id: usize, prereqs: &[usize]) -> DecomposedTask {
        DecomposedTask {
            task_id: id,
            description: format!("task {id}"),
            required_role: AgentRole::Executor,
            prerequisites: prereqs.to_vec(),
            validation: None,
            status: DecomposedStatus::Pending,
            result: None,
            max_retries: 2,
        }
    }

    #[test]
    fn test_parse_valid_payload() {
        let payload = r#"Here is the plan:
```json
{"tasks":[
  {"description":"research the domain","role":"analyst","prerequisites":[],"validation":"notes exist"},
  {"description":"write the code","role":"coder","prerequisites":[0]},
  {"description":"review","role":"wizard","prerequisites":[1,0]}
]}
```"#;
        let tasks = parse_tasks(payload).unwrap();
        assert_eq!(tasks.len(), 3);
        assert_eq!(tasks[0].required_role, AgentRole::Analyst);
        assert_eq!(tasks[1].prerequisites, vec![0]);
        // Unknown role falls back to executor
        assert_eq!(tasks[2].required_role, AgentRole::Executor);
        assert_eq!(tasks[0].validation.as_deref(), Some("notes exist"));
    }

    #[test]
    fn test_parse_rejections() {
        assert!(parse_tasks(&"x".repeat(MAX_PAYLOAD_BYTES + 1)).is_err());
        assert!(parse_tasks("no json here").is_err());
        assert!(parse_tasks(r#"[1,2,3]"#).is_err());
        assert!(parse_tasks(r#"{"no_tasks":true}"#).is_err());
        // Self-referential prerequisite
        assert!(parse_tasks(r#"{"tasks":[{"description":"a","prerequisites":[0]}]}"#).is_err());
        // Out-of-range prerequisite
        assert!(parse_tasks(r#"{"tasks":[{"description":"a","prerequisites":[5]}]}"#).is_err());
        // Injection denylist
        assert!(parse_tasks(r#"{"tasks":[{"description":"run eval(payload)"}]}"#).is_err());
        assert!(parse_tasks(r#"{"tasks":[{"description":"<script>x</script>"}]}"#).is_err());
        // Oversized description
        let long = "d".repeat(600);
        assert!(parse_tasks(&format!(r#"{{"tasks":[{{"description":"{long}"}}]}}"#)).is_err());
    }

    #[test]
    fn test_parse_too_many_tasks() {
        let entries: Vec<String> = (0..MAX_TASKS + 1)
            .map(|i| format!(r#"{{"description":"task {i}"}}"#))
            .collect();
        let payload = format!(r#"{{"tasks":[{}]}}"#, entries.join(","));
        assert!(parse_tasks(&payload).is_err());
    }

    #[test]
    fn test_cycle_detection() {
        let acyclic = vec![task(0, &[]), task(1, &[0]), task(2, &[0, 1])];
        assert!(resolve_dependencies(&acyclic).is_ok());

        // parse_tasks rejects self references and out-of-range indexes, so
        // cycles reach the resolver only as longer loops
        let cyclic = vec![task(0, &[2]), task(1, &[0]), task(2, &[1])];
        match resolve_dependencies(&cyclic) {
            Err(EngineError::CycleDetected(_)) => {}
            other => panic!("expected CycleDetected, got {other:?}"),
        }
    }

    #[test]
    fn test_topological_sort_is_stable_and_valid() {
        let tasks = vec![task(0, &[1]), task(1, &[]), task(2, &[1]), task(3, &[0, 2])];
        let order = topological_sort(&tasks).unwrap();
        assert_eq!(order, vec![1, 0, 2, 3]);

        let position: Vec<usize> = {
            let mut pos = vec![0; tasks.len()];
            for (i, &t) in order.iter().enumerate() {
                pos[t] = i;
            }
            pos
        };
        for t in &tasks {
            for &p in &t.prerequisites {
                assert!(position[p] < position[t.task_id]);
            }
        }

        let cyclic = vec![task(0, &[1]), task(1, &[0])];
        assert!(topological_sort(&cyclic).is_err());
    }

    #[test]
    fn test_get_ready_waves() {
        let mut tasks = vec![task(0, &[]), task(1, &[0]), task(2, &[0]), task(3, &[1, 2])];
        assert_eq!(get_ready(&tasks), vec![0]);

        tasks[0].status = DecomposedStatus::Completed;
        assert_eq!(get_ready(&tasks), vec![1, 2]);

        tasks[1].status = DecomposedStatus::Completed;
        assert_eq!(get_ready(&tasks), vec![2]);

        tasks[2].status = DecomposedStatus::Failed;
        // Task 3 never becomes ready behind a failed prerequisite
        assert!(get_ready(&tasks).is_empty());
    }

    #[test]
    fn test_build_prompt_mentions_roles_and_shape() {
        let prompt = TaskDecomposer::build_prompt("ship it", &[AgentRole::Coder, AgentRole::Critic]);
        assert!(prompt.contains("ship it"));
        assert!(prompt.contains("coder, critic"));
        assert!(prompt.contains(r#"{"tasks":"#));
    }
}
