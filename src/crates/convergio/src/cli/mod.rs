//! Command-line surface
//!
//! Thin wiring over the library: one-shot chat, cost/budget management,
//! plan inspection and workflow graph export.

use crate::error::{ConvergioError, Result};
use crate::orchestrator::Orchestrator;
use clap::{Parser, Subcommand};
use convergio_agents::CostController;
use convergio_core::{visualization, Telemetry, Workflow};
use convergio_store::{export_json, export_markdown, PlanRepository, TaskRepository};
use std::path::PathBuf;
use uuid::Uuid;

#[derive(Debug, Parser)]
#[command(name = "convergio", version, about = "Multi-agent orchestration core")]
pub struct Cli {
    #[command(subcommand)]
    pub command: Command,
}

#[derive(Debug, Subcommand)]
pub enum Command {
    /// Send one request to the chief and print the reply
    Chat {
        /// The request text
        message: Vec<String>,
        /// Stream the reply token by token
        #[arg(long)]
        stream: bool,
    },
    /// Cost and budget operations
    Cost {
        #[command(subcommand)]
        action: CostAction,
    },
    /// Plan inspection and export
    Plan {
        #[command(subcommand)]
        action: PlanAction,
    },
    /// Workflow graph utilities
    Workflow {
        #[command(subcommand)]
        action: WorkflowAction,
    },
    /// Show telemetry counters
    Telemetry,
}

#[derive(Debug, Subcommand)]
pub enum CostAction {
    /// Print the usage report
    Show,
    /// Set the budget limit in USD (0 removes the limit)
    Set { amount: f64 },
    /// Reset the session counters
    Reset,
}

#[derive(Debug, Subcommand)]
pub enum PlanAction {
    /// List recent plans
    List,
    /// Show one plan with its tasks
    Show { id: Uuid },
    /// Export a plan as markdown or json
    Export {
        id: Uuid,
        #[arg(long, default_value = "markdown")]
        format: String,
    },
}

#[derive(Debug, Subcommand)]
pub enum WorkflowAction {
    /// Render a serialized workflow (JSON file) as a Mermaid diagram
    Export { path: PathBuf },
}

/// Run a chat command against the orchestrator
pub async fn run_chat(orchestrator: &Orchestrator, message: &str, stream: bool) -> Result<String> {
    if stream {
        let response = orchestrator
            .process_stream(message, &|chunk| print!("{chunk}"))
            .await?;
        println!();
        Ok(response)
    } else {
        let response = orchestrator.process(message).await?;
        println!("{response}");
        Ok(response)
    }
}

/// Run a cost command; `local_free` picks the report shape
pub fn run_cost(cost: &CostController, action: &CostAction, local_free: bool) -> String {
    match action {
        CostAction::Show => {
            if local_free {
                cost.report_local()
            } else {
                cost.report()
            }
        }
        CostAction::Set { amount } => {
            cost.set_budget(*amount);
            if *amount > 0.0 {
                format!("Budget set to ${amount:.2}\n")
            } else {
                "Budget removed\n".to_string()
            }
        }
        CostAction::Reset => {
            cost.reset_session();
            "Session counters reset\n".to_string()
        }
    }
}

/// Run a plan command
pub async fn run_plan(
    plans: &PlanRepository,
    tasks: &TaskRepository,
    action: &PlanAction,
) -> Result<String> {
    match action {
        PlanAction::List => {
            let list = plans.list(20).await?;
            if list.is_empty() {
                return Ok("No plans yet\n".to_string());
            }
            let mut out = String::new();
            for plan in list {
                let progress = plans.progress(plan.id).await?;
                out.push_str(&format!(
                    "{}  [{:<9}] {:>3}%  {}\n",
                    plan.id,
                    plan.status.as_str(),
                    progress.percent(),
                    plan.description
                ));
            }
            Ok(out)
        }
        PlanAction::Show { id } => {
            let plan = plans
                .get(*id)
                .await?
                .ok_or_else(|| ConvergioError::Other(format!("plan {id} not found")))?;
            let task_list = tasks.list_for_plan(*id).await?;
            let progress = plans.progress(*id).await?;
            Ok(export_markdown(&plan, &task_list, &progress, false))
        }
        PlanAction::Export { id, format } => {
            let plan = plans
                .get(*id)
                .await?
                .ok_or_else(|| ConvergioError::Other(format!("plan {id} not found")))?;
            let task_list = tasks.list_for_plan(*id).await?;
            let progress = plans.progress(*id).await?;
            match format.as_str() {
                "markdown" | "md" => Ok(export_markdown(&plan, &task_list, &progress, true)),
                "json" => Ok(export_json(&plan, &task_list, &progress)),
                other => Err(ConvergioError::Other(format!(
                    "unknown export format '{other}' (expected markdown or json)"
                ))),
            }
        }
    }
}

/// Render a serialized workflow file as Mermaid
pub fn run_workflow(action: &WorkflowAction) -> Result<String> {
    match action {
        WorkflowAction::Export { path } => {
            let raw = std::fs::read_to_string(path)?;
            let mut workflow: Workflow = serde_json::from_str(&raw)?;
            workflow.rebuild_index();
            Ok(visualization::to_mermaid(&workflow))
        }
    }
}

/// Render the telemetry snapshot
pub fn run_telemetry(telemetry: &Telemetry) -> String {
    let snap = telemetry.snapshot();
    let mut out = format!(
        "Workflows: {} started, {} completed, {} failed\nNodes: {} executed, {} errors\n",
        snap.workflows_started,
        snap.workflows_completed,
        snap.workflows_failed,
        snap.nodes_executed,
        snap.node_errors
    );
    let mut providers: Vec<_> = snap.providers.iter().collect();
    providers.sort_by(|a, b| a.0.cmp(b.0));
    for (name, stats) in providers {
        out.push_str(&format!(
            "{name}: {} sent / {} received, avg {} ms, {} cache hits, {} errors\n",
            stats.sent, stats.received, stats.avg_latency_ms, stats.cache_hits, stats.errors
        ));
    }
    out
}
