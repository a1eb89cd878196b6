//! End-to-end orchestrator tests against a programmable provider

use async_trait::async_trait;
use convergio::{ConvergioError, MemoryHit, Orchestrator, OrchestratorConfig, ProjectContext, SemanticMemory};
use convergio_agents::{AgentRegistry, CostController, MessageBus, MessageType};
use convergio_core::{
    ChatProvider, ChatTurn, CoreError, ProviderKind, Telemetry, Tool, ToolUse, CHIEF,
};
use convergio_store::{Database, PlanRepository, TaskRepository, TaskStatus};
use parking_lot::Mutex;
use std::sync::Arc;

type Responder =
    Box<dyn Fn(&str, &str) -> Result<(u64, ChatTurn), String> + Send + Sync>;

/// Provider whose behavior is a function of (system, user); records calls
struct FnProvider {
    responder: Responder,
    calls: Mutex<Vec<(String, String)>>,
}

impl FnProvider {
    fn new(responder: Responder) -> Arc<Self> {
        Arc::new(Self {
            responder,
            calls: Mutex::new(Vec::new()),
        })
    }

    fn calls(&self) -> Vec<(String, String)> {
        self.calls.lock().clone()
    }
}

#[async_trait]
impl ChatProvider for FnProvider {
    async fn chat(
        &self,
        system: &str,
        user: &str,
        _max_tokens: u32,
    ) -> convergio_core::Result<ChatTurn> {
        self.calls.lock().push((system.to_string(), user.to_string()));
        let (delay_ms, turn) =
            (self.responder)(system, user).map_err(CoreError::provider)?;
        if delay_ms > 0 {
            tokio::time::sleep(std::time::Duration::from_millis(delay_ms)).await;
        }
        Ok(turn)
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model_id(&self) -> &str {
        "programmable"
    }
}

struct Harness {
    orchestrator: Orchestrator,
    provider: Arc<FnProvider>,
    bus: Arc<MessageBus>,
    cost: Arc<CostController>,
    registry: Arc<AgentRegistry>,
}

fn harness(provider: Arc<FnProvider>) -> Harness {
    let registry = Arc::new(AgentRegistry::default());
    let bus = Arc::new(MessageBus::new());
    let cost = Arc::new(CostController::default());
    let orchestrator = Orchestrator::new(
        provider.clone(),
        registry.clone(),
        bus.clone(),
        cost.clone(),
        Arc::new(Telemetry::new()),
        OrchestratorConfig::default(),
    );
    Harness {
        orchestrator,
        provider,
        bus,
        cost,
        registry,
    }
}

fn text(content: &str) -> Result<(u64, ChatTurn), String> {
    Ok((0, ChatTurn::text(content)))
}

const CHIEF_DELEGATING: &str =
    "Analyze plan.\n[DELEGATE: baccio] architecture\n[DELEGATE: luca] security";

/// Responder for the delegation scenarios: the chief delegates, the
/// specialists answer by persona, and synthesis reports the final text.
/// Baccio is slowed down so completion order differs from parse order.
fn delegating_responder(baccio_delay_ms: u64) -> Responder {
    Box::new(move |system, user| {
        if user.starts_with("Context from chief:") {
            if system.contains("Baccio") {
                Ok((baccio_delay_ms, ChatTurn::text("layered architecture is sound")))
            } else if system.contains("Luca") {
                text("no injection surface found")
            } else {
                text("generic specialist input")
            }
        } else if user.starts_with("You delegated to") {
            text("the synthesized verdict")
        } else {
            text(CHIEF_DELEGATING)
        }
    })
}

#[tokio::test]
async fn test_delegation_fan_out_and_convergence() {
    let h = harness(FnProvider::new(delegating_responder(0)));

    let response = h.orchestrator.process("Analyze plan.").await.unwrap();
    assert_eq!(response, "the synthesized verdict");

    // Both specialists were spawned by name with their built-in roles
    assert!(h.registry.find_by_name("baccio").is_some());
    assert!(h.registry.find_by_name("luca").is_some());

    // The synthesis prompt carries both responses under the fixed headers,
    // in parse order, plus the original request
    let calls = h.provider.calls();
    let synthesis = &calls
        .iter()
        .find(|(_, user)| user.starts_with("You delegated to"))
        .unwrap()
        .1;
    assert!(synthesis.starts_with("You delegated to 2 specialist agents"));
    let baccio_pos = synthesis.find("## Baccio's Response").unwrap();
    let luca_pos = synthesis.find("## Luca's Response").unwrap();
    assert!(baccio_pos < luca_pos);
    assert!(synthesis.contains("layered architecture is sound"));
    assert!(synthesis.contains("no injection surface found"));
    assert!(synthesis.contains("Original request: Analyze plan."));

    // Bus traffic: delegations out, reports back, convergence, response
    assert_eq!(h.bus.get_by_type(MessageType::TaskDelegate, 10).len(), 2);
    assert_eq!(h.bus.get_by_type(MessageType::TaskReport, 10).len(), 2);
    assert_eq!(h.bus.get_by_type(MessageType::Convergence, 10).len(), 1);
    assert_eq!(h.bus.get_by_type(MessageType::AgentResponse, 10).len(), 1);
}

#[tokio::test]
async fn test_convergence_preserves_parse_order_not_completion_order() {
    // Baccio (first marker) finishes long after Luca
    let h = harness(FnProvider::new(delegating_responder(150)));

    h.orchestrator.process("Analyze plan.").await.unwrap();

    let calls = h.provider.calls();
    let synthesis = &calls
        .iter()
        .find(|(_, user)| user.starts_with("You delegated to"))
        .unwrap()
        .1;
    let baccio_pos = synthesis.find("## Baccio's Response").unwrap();
    let luca_pos = synthesis.find("## Luca's Response").unwrap();
    assert!(baccio_pos < luca_pos, "parse order must win over completion order");
}

#[tokio::test]
async fn test_failed_workers_are_omitted() {
    let responder: Responder = Box::new(|system, user| {
        if user.starts_with("Context from chief:") {
            if system.contains("Baccio") {
                Err("network error".to_string())
            } else {
                text("luca still reports")
            }
        } else if user.starts_with("You delegated to") {
            text("partial synthesis")
        } else {
            text(CHIEF_DELEGATING)
        }
    });
    let h = harness(FnProvider::new(responder));

    let response = h.orchestrator.process("go").await.unwrap();
    assert_eq!(response, "partial synthesis");

    let calls = h.provider.calls();
    let synthesis = &calls
        .iter()
        .find(|(_, user)| user.starts_with("You delegated to"))
        .unwrap()
        .1;
    assert!(synthesis.starts_with("You delegated to 1 specialist agents"));
    assert!(!synthesis.contains("## Baccio's Response"));
    assert!(synthesis.contains("## Luca's Response"));
}

#[tokio::test]
async fn test_all_workers_failing_falls_back_to_chief_text() {
    let responder: Responder = Box::new(|_, user| {
        if user.starts_with("Context from chief:") {
            Err("network error".to_string())
        } else if user.starts_with("You delegated to") {
            panic!("synthesis must not run with zero workers");
        } else {
            text(CHIEF_DELEGATING)
        }
    });
    let h = harness(FnProvider::new(responder));

    let response = h.orchestrator.process("go").await.unwrap();
    assert_eq!(response, CHIEF_DELEGATING);
}

#[tokio::test]
async fn test_synthesis_failure_is_generic_delegation_error() {
    let responder: Responder = Box::new(|_, user| {
        if user.starts_with("Context from chief:") {
            text("worker fine")
        } else if user.starts_with("You delegated to") {
            Err("llm down".to_string())
        } else {
            text("[DELEGATE: amy] check numbers")
        }
    });
    let h = harness(FnProvider::new(responder));

    let err = h.orchestrator.process("go").await.unwrap_err();
    assert_eq!(err.to_string(), "Delegation failed");
    // The per-worker cost was still recorded
    assert!(h.cost.session_tokens().0 > 0);
}

#[tokio::test]
async fn test_budget_refusal_literal() {
    let h = harness(FnProvider::new(Box::new(|_, _| text("never called"))));
    h.cost.set_budget(1.0);
    // $3.00 of metered usage at the Sonnet-class default rate
    h.cost.record_usage(CHIEF, 10_000_000, 0, None, true).await;

    let err = h.orchestrator.process("hi").await.unwrap_err();
    assert!(matches!(err, ConvergioError::BudgetExceeded));
    assert_eq!(
        err.to_string(),
        "Budget exceeded. Use 'cost set <amount>' to increase budget."
    );
    assert!(h.provider.calls().is_empty());
}

struct EchoTool;

#[async_trait]
impl Tool for EchoTool {
    fn name(&self) -> &str {
        "echo"
    }

    fn description(&self) -> &str {
        "echoes input"
    }

    async fn execute(&self, input: serde_json::Value) -> convergio_core::Result<String> {
        match input.get("fail") {
            Some(_) => Err(CoreError::Tool {
                name: "echo".to_string(),
                message: "refused".to_string(),
            }),
            None => Ok(format!("echoed {}", input["text"].as_str().unwrap_or(""))),
        }
    }
}

fn tool_call(input: serde_json::Value) -> ChatTurn {
    ChatTurn {
        text: String::new(),
        tool_calls: vec![ToolUse {
            id: "call-1".to_string(),
            name: "echo".to_string(),
            input,
        }],
        usage: Default::default(),
    }
}

#[tokio::test]
async fn test_tool_loop_appends_results_and_continues() {
    let responder: Responder = Box::new(|_, user| {
        if user.contains("[Tool: echo]") {
            text("done after tooling")
        } else {
            Ok((0, tool_call(serde_json::json!({"text": "ping"}))))
        }
    });
    let mut h = harness(FnProvider::new(responder));
    h.orchestrator.tools_mut().register(Arc::new(EchoTool));

    let response = h.orchestrator.process("use the tool").await.unwrap();
    assert_eq!(response, "done after tooling");

    let calls = h.provider.calls();
    assert_eq!(calls.len(), 2);
    // Second round sees the synthetic tool block appended to the conversation
    assert!(calls[1].1.contains("[Tool: echo]\nResult: echoed ping"));
}

#[tokio::test]
async fn test_tool_failure_is_reported_inline_and_loop_continues() {
    let responder: Responder = Box::new(|_, user| {
        if user.contains("[Tool: echo]") {
            text("saw the tool error")
        } else {
            Ok((0, tool_call(serde_json::json!({"fail": true}))))
        }
    });
    let mut h = harness(FnProvider::new(responder));
    h.orchestrator.tools_mut().register(Arc::new(EchoTool));

    let response = h.orchestrator.process("try").await.unwrap();
    assert_eq!(response, "saw the tool error");
    let calls = h.provider.calls();
    assert!(calls[1].1.contains("[Tool: echo]\nResult: Error:"));
}

#[tokio::test]
async fn test_unknown_tool_reports_error_block() {
    let responder: Responder = Box::new(|_, user| {
        if user.contains("[Tool: echo]") {
            text("noted")
        } else {
            Ok((0, tool_call(serde_json::json!({}))))
        }
    });
    // No tool registered
    let h = harness(FnProvider::new(responder));

    h.orchestrator.process("try").await.unwrap();
    let calls = h.provider.calls();
    assert!(calls[1].1.contains("Result: Error: unknown tool 'echo'"));
}

#[tokio::test]
async fn test_tool_iteration_budget_is_ten_rounds() {
    // The model asks for tools forever; the loop must stop at 10 calls
    let responder: Responder =
        Box::new(|_, _| Ok((0, tool_call(serde_json::json!({"text": "again"})))));
    let mut h = harness(FnProvider::new(responder));
    h.orchestrator.tools_mut().register(Arc::new(EchoTool));

    let response = h.orchestrator.process("loop forever").await.unwrap();
    // Round 10's tool calls are not executed; its (empty) text is the reply
    assert_eq!(response, "");
    assert_eq!(h.provider.calls().len(), 10);
}

#[tokio::test]
async fn test_provider_error_surfaces_verbatim_without_retry() {
    let h = harness(FnProvider::new(Box::new(|_, _| {
        Err("backend melted down".to_string())
    })));

    let err = h.orchestrator.process("hello").await.unwrap_err();
    assert!(err.to_string().contains("backend melted down"));
    assert_eq!(h.provider.calls().len(), 1);
}

#[tokio::test]
async fn test_streaming_variant_delivers_chunks_and_records_turn() {
    let h = harness(FnProvider::new(Box::new(|_, _| text("streamed reply"))));

    let chunks = Mutex::new(String::new());
    let response = h
        .orchestrator
        .process_stream("stream it", &|chunk| chunks.lock().push_str(chunk))
        .await
        .unwrap();

    assert_eq!(response, "streamed reply");
    assert_eq!(*chunks.lock(), "streamed reply");
    assert_eq!(h.orchestrator.turn_count(), 1);
    assert!(h.cost.session_tokens().1 > 0);
}

struct CannedMemory;

#[async_trait]
impl SemanticMemory for CannedMemory {
    async fn search(&self, _query: &str, _limit: usize, min_score: f32) -> Vec<MemoryHit> {
        vec![
            MemoryHit {
                text: "the deploy broke last tuesday".to_string(),
                score: 0.8,
            },
            MemoryHit {
                text: "weak association".to_string(),
                score: min_score / 2.0,
            },
        ]
    }
}

#[tokio::test]
async fn test_context_assembly_in_second_turn() {
    let responder: Responder = Box::new(|_, _| text("acknowledged"));
    let mut h = harness(FnProvider::new(responder));
    h.orchestrator.set_semantic_memory(Arc::new(CannedMemory));
    h.orchestrator.add_important_memory("user prefers brevity");
    let mut project = ProjectContext::new("apollo");
    project.team = vec!["baccio".to_string()];
    h.orchestrator.set_project(Some(project));

    h.orchestrator.process("first question").await.unwrap();
    h.orchestrator.process("second question").await.unwrap();

    let calls = h.provider.calls();
    let second_conversation = &calls[1].1;
    assert!(second_conversation.contains("## Active Project: apollo"));
    assert!(second_conversation.contains("## Important Memories"));
    assert!(second_conversation.contains("- user prefers brevity"));
    assert!(second_conversation.contains("## Relevant Context"));
    assert!(second_conversation.contains("the deploy broke last tuesday"));
    assert!(!second_conversation.contains("weak association"));
    assert!(second_conversation.contains("## Recent Conversation (this session)"));
    assert!(second_conversation.contains("User: first question"));
    assert!(second_conversation.contains("Assistant: acknowledged"));
    assert!(second_conversation.ends_with("## Current Request\nsecond question"));

    // The chief system prompt leads with the constitution
    assert!(calls[0].0.starts_with(convergio::ALI_CONSTITUTION));
}

#[tokio::test]
async fn test_finalize_persists_to_attached_plan() {
    let h = harness(FnProvider::new(Box::new(|_, _| text("plan-worthy answer"))));

    let db = Arc::new(Database::open_in_memory().await.unwrap());
    let plans = PlanRepository::new(db.clone());
    let tasks = TaskRepository::new(db.clone());
    let plan = plans.create("conversation log", None).await.unwrap();
    h.orchestrator.attach_plan(plans.clone(), tasks.clone(), plan.id);

    h.orchestrator.process("record this turn").await.unwrap();

    let task_list = tasks.list_for_plan(plan.id).await.unwrap();
    assert_eq!(task_list.len(), 1);
    assert_eq!(task_list[0].status, TaskStatus::Completed);
    assert_eq!(task_list[0].description, "record this turn");
    assert_eq!(task_list[0].output.as_deref(), Some("plan-worthy answer"));
    assert_eq!(task_list[0].assigned_agent.as_deref(), Some("ali"));

    let progress = plans.progress(plan.id).await.unwrap();
    assert_eq!(progress.percent(), 100);
}
