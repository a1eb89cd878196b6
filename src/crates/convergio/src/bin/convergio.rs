//! convergio CLI entry point
//!
//! Wires the store, agent pool, cost controller and orchestrator together.
//! Model transport lives outside this workspace; the bundled offline
//! provider lets the wiring run end to end without network access.

use async_trait::async_trait;
use clap::Parser;
use convergio::cli::{self, Cli, Command};
use convergio::{Config, ConvergioError, Orchestrator, StoreUsageSink};
use convergio_agents::{AgentRegistry, CostController, MessageBus};
use convergio_core::{ChatProvider, ChatTurn, ProviderKind, Telemetry};
use convergio_store::{Database, PlanRepository, TaskRepository, UsageRepository};
use std::sync::Arc;
use tracing::warn;
use tracing_subscriber::EnvFilter;

/// Stand-in provider used when no transport is wired in
///
/// Local (free) inference semantics: token counts are metered, cost is not.
struct OfflineProvider;

#[async_trait]
impl ChatProvider for OfflineProvider {
    async fn chat(
        &self,
        _system: &str,
        user: &str,
        _max_tokens: u32,
    ) -> convergio_core::Result<ChatTurn> {
        Ok(ChatTurn::text(format!(
            "[offline] no model transport is configured; received a request of {} characters",
            user.chars().count()
        )))
    }

    fn kind(&self) -> ProviderKind {
        ProviderKind::Local
    }

    fn model_id(&self) -> &str {
        "offline"
    }
}

#[tokio::main]
async fn main() {
    tracing_subscriber::fmt()
        .with_env_filter(EnvFilter::from_default_env())
        .with_writer(std::io::stderr)
        .init();

    let cli = Cli::parse();
    if let Err(err) = run(cli).await {
        eprintln!("Error: {err}");
        std::process::exit(1);
    }
}

async fn run(cli: Cli) -> Result<(), ConvergioError> {
    let config = Config::load()?;

    let db = Arc::new(Database::open(&config.plan_db_path).await?);
    let plans = PlanRepository::new(db.clone());
    let tasks = TaskRepository::new(db.clone());
    let usage = UsageRepository::new(db.clone());

    let cost = Arc::new(CostController::default());
    cost.set_sink(Arc::new(StoreUsageSink::new(usage.clone())));
    match usage.total_cost().await {
        Ok(total) => cost.restore_total(total),
        Err(err) => warn!(category = "system", error = %err, "could not restore usage total"),
    }
    if let Some(limit) = config.budget_limit_usd {
        cost.set_budget(limit);
    }

    let registry = Arc::new(AgentRegistry::default());
    if let Some(agents_dir) = &config.agents_dir {
        if let Err(err) = registry.load_definitions(agents_dir) {
            warn!(category = "agent", error = %err, "could not load agent definitions");
        }
    }

    let bus = Arc::new(MessageBus::new());
    let telemetry = Arc::new(Telemetry::new());
    let workspace = std::env::current_dir()
        .map(|p| p.display().to_string())
        .unwrap_or_else(|_| ".".to_string());
    let orchestrator = Orchestrator::new(
        Arc::new(OfflineProvider),
        registry,
        bus,
        cost.clone(),
        telemetry.clone(),
        config.orchestrator_config(workspace),
    );

    match &cli.command {
        Command::Chat { message, stream } => {
            let message = message.join(" ");
            if message.trim().is_empty() {
                return Err(ConvergioError::Other("empty message".to_string()));
            }
            cli::run_chat(&orchestrator, &message, *stream).await?;
        }
        Command::Cost { action } => {
            print!("{}", cli::run_cost(&cost, action, true));
        }
        Command::Plan { action } => {
            print!("{}", cli::run_plan(&plans, &tasks, action).await?);
        }
        Command::Workflow { action } => {
            print!("{}", cli::run_workflow(action)?);
        }
        Command::Telemetry => {
            print!("{}", cli::run_telemetry(&telemetry));
        }
    }
    Ok(())
}
