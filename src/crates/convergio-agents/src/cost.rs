//! Cost controller: token metering and budget enforcement
//!
//! Every provider round trip is recorded here, per call, per agent and per
//! session. Cost is derived from a per-model pricing table (defaulting to a
//! Sonnet-class rate) unless the provider is unmetered — local inference
//! records zero cost, still counts tokens, and can never trip the budget.
//!
//! The budget is enforced across sessions: `budget_exceeded` compares the
//! grand total against the configured limit and, once set, only clears when
//! the limit is raised. The orchestrator refuses new work while the flag
//! holds.
//!
//! Counters live behind one mutex; the change callback and the persistence
//! sink are always invoked after the lock is dropped. If persistence is
//! unavailable the in-memory counters remain authoritative.

use async_trait::async_trait;
use chrono::{NaiveDate, Utc};
use convergio_core::AgentId;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tracing::warn;

/// Whether estimated text is prompt or completion
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Direction {
    Input,
    Output,
}

/// Per-token pricing for one model
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct ModelPricing {
    pub input_per_token: f64,
    pub output_per_token: f64,
}

/// Sonnet-class default rate applied when a model is not in the table
pub const DEFAULT_PRICING: ModelPricing = ModelPricing {
    input_per_token: 0.000003,
    output_per_token: 0.000015,
};

/// Pluggable per-model pricing
#[derive(Debug, Clone)]
pub struct PricingTable {
    models: HashMap<String, ModelPricing>,
    fallback: ModelPricing,
}

impl Default for PricingTable {
    fn default() -> Self {
        let mut models = HashMap::new();
        for (model, input, output) in [
            ("claude-3-opus", 0.000015, 0.000075),
            ("claude-3-5-sonnet", 0.000003, 0.000015),
            ("claude-3-5-haiku", 0.0000008, 0.000004),
            ("gpt-4o", 0.000005, 0.000015),
            ("gpt-4-turbo", 0.00001, 0.00003),
            ("gemini-1-5-pro", 0.00000125, 0.000005),
        ] {
            models.insert(
                model.to_string(),
                ModelPricing {
                    input_per_token: input,
                    output_per_token: output,
                },
            );
        }
        Self {
            models,
            fallback: DEFAULT_PRICING,
        }
    }
}

impl PricingTable {
    /// Register or replace a model's rate
    pub fn set(&mut self, model: impl Into<String>, pricing: ModelPricing) {
        self.models.insert(model.into(), pricing);
    }

    /// Rate for a model, falling back to the Sonnet-class default
    pub fn rate(&self, model: Option<&str>) -> ModelPricing {
        model
            .and_then(|m| self.models.get(m))
            .copied()
            .unwrap_or(self.fallback)
    }

    /// Cost of one call under a model's rate
    pub fn cost(&self, model: Option<&str>, input_tokens: u64, output_tokens: u64) -> f64 {
        let rate = self.rate(model);
        input_tokens as f64 * rate.input_per_token + output_tokens as f64 * rate.output_per_token
    }
}

/// Accumulated usage for one agent
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize)]
pub struct AgentCost {
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
    pub calls: u64,
}

/// Result of recording one call
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct CostUpdate {
    pub session_total_usd: f64,
    pub total_usd: f64,
    pub budget_exceeded: bool,
}

/// Callback invoked (outside the lock) after every recorded call
pub type CostCallback = Arc<dyn Fn(&CostUpdate) + Send + Sync>;

/// One day's aggregated usage, as handed to the persistence sink
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct DailyUsage {
    pub date: NaiveDate,
    pub input_tokens: u64,
    pub output_tokens: u64,
    pub cost_usd: f64,
}

/// Persistence boundary for usage aggregates
///
/// Implementations upsert the daily row (`calls = calls + 1`). Errors are
/// logged by the controller and otherwise ignored: the in-memory counters
/// stay authoritative and the historical total may lag by one process
/// lifetime.
#[async_trait]
pub trait UsageSink: Send + Sync {
    async fn record_daily(&self, day: DailyUsage) -> std::result::Result<(), String>;
}

#[derive(Debug)]
struct CostState {
    pricing: PricingTable,
    session_input: u64,
    session_output: u64,
    session_cost: f64,
    total_cost: f64,
    per_agent: HashMap<AgentId, AgentCost>,
    /// 0 = unlimited
    budget_limit: f64,
    budget_exceeded: bool,
}

/// Thread-safe cost controller
pub struct CostController {
    state: Mutex<CostState>,
    callback: Mutex<Option<CostCallback>>,
    sink: Mutex<Option<Arc<dyn UsageSink>>>,
}

impl std::fmt::Debug for CostController {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = self.state.lock();
        f.debug_struct("CostController")
            .field("total_cost", &state.total_cost)
            .field("budget_limit", &state.budget_limit)
            .field("budget_exceeded", &state.budget_exceeded)
            .finish()
    }
}

impl Default for CostController {
    fn default() -> Self {
        Self::new(PricingTable::default())
    }
}

impl CostController {
    pub fn new(pricing: PricingTable) -> Self {
        Self {
            state: Mutex::new(CostState {
                pricing,
                session_input: 0,
                session_output: 0,
                session_cost: 0.0,
                total_cost: 0.0,
                per_agent: HashMap::new(),
                budget_limit: 0.0,
                budget_exceeded: false,
            }),
            callback: Mutex::new(None),
            sink: Mutex::new(None),
        }
    }

    /// Register the change callback
    pub fn set_callback(&self, callback: CostCallback) {
        *self.callback.lock() = Some(callback);
    }

    /// Register the persistence sink
    pub fn set_sink(&self, sink: Arc<dyn UsageSink>) {
        *self.sink.lock() = Some(sink);
    }

    /// Record one provider call
    ///
    /// `metered = false` (local/free inference) accumulates tokens but zero
    /// cost, and can never set `budget_exceeded`.
    pub async fn record_usage(
        &self,
        agent: AgentId,
        input_tokens: u64,
        output_tokens: u64,
        model: Option<&str>,
        metered: bool,
    ) -> CostUpdate {
        let (update, daily) = {
            let mut state = self.state.lock();
            let cost = if metered {
                state.pricing.cost(model, input_tokens, output_tokens)
            } else {
                0.0
            };

            state.session_input += input_tokens;
            state.session_output += output_tokens;
            state.session_cost += cost;
            state.total_cost += cost;

            let entry = state.per_agent.entry(agent).or_default();
            entry.input_tokens += input_tokens;
            entry.output_tokens += output_tokens;
            entry.cost_usd += cost;
            entry.calls += 1;

            if metered && state.budget_limit > 0.0 && state.total_cost >= state.budget_limit {
                state.budget_exceeded = true;
            }

            (
                CostUpdate {
                    session_total_usd: state.session_cost,
                    total_usd: state.total_cost,
                    budget_exceeded: state.budget_exceeded,
                },
                DailyUsage {
                    date: Utc::now().date_naive(),
                    input_tokens,
                    output_tokens,
                    cost_usd: cost,
                },
            )
        };

        let callback = self.callback.lock().clone();
        if let Some(callback) = callback {
            callback(&update);
        }

        let sink = self.sink.lock().clone();
        if let Some(sink) = sink {
            if let Err(e) = sink.record_daily(daily).await {
                warn!(category = "system", error = %e, "usage persistence failed");
            }
        }

        update
    }

    /// Set the budget limit (USD, 0 = unlimited)
    ///
    /// The exceeded flag is re-evaluated immediately against the grand
    /// total.
    pub fn set_budget(&self, limit_usd: f64) {
        let mut state = self.state.lock();
        state.budget_limit = limit_usd.max(0.0);
        state.budget_exceeded = state.budget_limit > 0.0 && state.total_cost >= state.budget_limit;
    }

    /// Zero the session counters
    ///
    /// `budget_exceeded` survives the reset iff the grand total still
    /// exceeds the limit.
    pub fn reset_session(&self) {
        let mut state = self.state.lock();
        state.session_input = 0;
        state.session_output = 0;
        state.session_cost = 0.0;
        state.budget_exceeded = state.budget_limit > 0.0 && state.total_cost >= state.budget_limit;
    }

    /// True while spending is within budget
    pub fn check_budget(&self) -> bool {
        !self.state.lock().budget_exceeded
    }

    /// Restore the persisted grand total at startup
    ///
    /// Never lowers the in-memory total.
    pub fn restore_total(&self, total_usd: f64) {
        let mut state = self.state.lock();
        if total_usd > state.total_cost {
            state.total_cost = total_usd;
        }
        if state.budget_limit > 0.0 && state.total_cost >= state.budget_limit {
            state.budget_exceeded = true;
        }
    }

    /// Estimate the cost of a text by the chars/3 token heuristic
    pub fn estimate(&self, text: &str, direction: Direction) -> f64 {
        let tokens = (text.chars().count() / 3) as u64;
        let state = self.state.lock();
        let rate = state.pricing.rate(None);
        match direction {
            Direction::Input => tokens as f64 * rate.input_per_token,
            Direction::Output => tokens as f64 * rate.output_per_token,
        }
    }

    /// Whether a projected conversation fits in the remaining budget
    pub fn can_afford(&self, turns: u64, avg_input_tokens: u64, avg_output_tokens: u64) -> bool {
        let state = self.state.lock();
        if state.budget_limit <= 0.0 {
            return true;
        }
        let rate = state.pricing.rate(None);
        let per_turn = avg_input_tokens as f64 * rate.input_per_token
            + avg_output_tokens as f64 * rate.output_per_token;
        let projected = turns as f64 * per_turn;
        projected <= state.budget_limit - state.total_cost
    }

    /// Session token totals `(input, output)`
    pub fn session_tokens(&self) -> (u64, u64) {
        let state = self.state.lock();
        (state.session_input, state.session_output)
    }

    /// Grand total spend in USD
    pub fn total_spend(&self) -> f64 {
        self.state.lock().total_cost
    }

    /// Per-agent usage snapshot
    pub fn per_agent(&self) -> HashMap<AgentId, AgentCost> {
        self.state.lock().per_agent.clone()
    }

    /// Human-readable usage report, metered shape
    pub fn report(&self) -> String {
        let state = self.state.lock();
        let mut out = String::new();
        out.push_str(&format!(
            "Session: ${:.4} ({} in / {} out tokens)\n",
            state.session_cost, state.session_input, state.session_output
        ));
        out.push_str(&format!("Total: ${:.4}\n", state.total_cost));
        if state.budget_limit > 0.0 {
            out.push_str(&format!(
                "Budget: ${:.2} ({})\n",
                state.budget_limit,
                if state.budget_exceeded { "EXCEEDED" } else { "ok" }
            ));
        } else {
            out.push_str("Budget: unlimited\n");
        }

        let mut agents: Vec<(&AgentId, &AgentCost)> = state.per_agent.iter().collect();
        agents.sort_by_key(|(id, _)| id.as_u64());
        for (id, cost) in agents {
            out.push_str(&format!(
                "  {id}: ${:.4} over {} calls ({} in / {} out)\n",
                cost.cost_usd, cost.calls, cost.input_tokens, cost.output_tokens
            ));
        }
        out
    }

    /// Human-readable usage report, local/free shape
    pub fn report_local(&self) -> String {
        let state = self.state.lock();
        format!(
            "Session tokens: {} in / {} out\nTotal tokens (all agents): {} in / {} out\ncost: free (local inference)\n",
            state.session_input,
            state.session_output,
            state.per_agent.values().map(|c| c.input_tokens).sum::<u64>(),
            state.per_agent.values().map(|c| c.output_tokens).sum::<u64>(),
        )
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::atomic::{AtomicUsize, Ordering};

    const AGENT: AgentId = AgentId(7);

    #[tokio::test]
    async fn test_record_usage_accumulates() {
        let cost = CostController::default();
        let u1 = cost.record_usage(AGENT, 1000, 500, None, true).await;
        let u2 = cost.record_usage(AGENT, 1000, 500, None, true).await;

        assert!(u2.total_usd > u1.total_usd);
        assert_eq!(cost.session_tokens(), (2000, 1000));
        let per_agent = cost.per_agent();
        assert_eq!(per_agent[&AGENT].calls, 2);
        assert_eq!(per_agent[&AGENT].input_tokens, 2000);
    }

    #[tokio::test]
    async fn test_unmetered_counts_tokens_but_not_cost() {
        let cost = CostController::default();
        cost.set_budget(0.000001);
        let update = cost.record_usage(AGENT, 1_000_000, 1_000_000, None, false).await;

        assert_eq!(update.total_usd, 0.0);
        assert!(!update.budget_exceeded);
        assert!(cost.check_budget());
        assert_eq!(cost.session_tokens(), (1_000_000, 1_000_000));
    }

    #[tokio::test]
    async fn test_budget_trips_and_is_monotone() {
        let cost = CostController::default();
        cost.set_budget(1.0);

        // 10M input tokens at the Sonnet-class default = $30
        let update = cost.record_usage(AGENT, 10_000_000, 0, None, true).await;
        assert!(update.budget_exceeded);
        assert!(!cost.check_budget());

        // Session reset does not clear it while the total still exceeds
        cost.reset_session();
        assert!(!cost.check_budget());
        assert_eq!(cost.session_tokens(), (0, 0));

        // Raising the limit clears it
        cost.set_budget(100.0);
        assert!(cost.check_budget());
    }

    #[tokio::test]
    async fn test_total_never_decreases() {
        let cost = CostController::default();
        let mut last = 0.0;
        for _ in 0..10 {
            let update = cost.record_usage(AGENT, 100, 100, None, true).await;
            assert!(update.total_usd >= last);
            last = update.total_usd;
        }
        cost.restore_total(0.0); // cannot lower
        assert_eq!(cost.total_spend(), last);
    }

    #[tokio::test]
    async fn test_set_budget_checks_existing_total() {
        let cost = CostController::default();
        cost.record_usage(AGENT, 10_000_000, 0, None, true).await;
        assert!(cost.check_budget()); // unlimited so far
        cost.set_budget(1.0);
        assert!(!cost.check_budget());
    }

    #[tokio::test]
    async fn test_callback_invoked() {
        let cost = CostController::default();
        let calls = Arc::new(AtomicUsize::new(0));
        let calls_clone = calls.clone();
        cost.set_callback(Arc::new(move |_| {
            calls_clone.fetch_add(1, Ordering::SeqCst);
        }));
        cost.record_usage(AGENT, 1, 1, None, true).await;
        cost.record_usage(AGENT, 1, 1, None, false).await;
        assert_eq!(calls.load(Ordering::SeqCst), 2);
    }

    #[tokio::test]
    async fn test_sink_receives_daily_rows() {
        struct Recorder(Mutex<Vec<DailyUsage>>);

        #[async_trait]
        impl UsageSink for Recorder {
            async fn record_daily(&self, day: DailyUsage) -> std::result::Result<(), String> {
                self.0.lock().push(day);
                Ok(())
            }
        }

        let recorder = Arc::new(Recorder(Mutex::new(Vec::new())));
        let cost = CostController::default();
        cost.set_sink(recorder.clone());
        cost.record_usage(AGENT, 300, 150, Some("claude-3-5-sonnet"), true).await;

        let rows = recorder.0.lock();
        assert_eq!(rows.len(), 1);
        assert_eq!(rows[0].input_tokens, 300);
        assert!(rows[0].cost_usd > 0.0);
    }

    #[test]
    fn test_estimate_uses_chars_over_three() {
        let cost = CostController::default();
        let text = "x".repeat(300); // 100 tokens
        let input = cost.estimate(&text, Direction::Input);
        let output = cost.estimate(&text, Direction::Output);
        assert!((input - 100.0 * DEFAULT_PRICING.input_per_token).abs() < 1e-12);
        assert!((output - 100.0 * DEFAULT_PRICING.output_per_token).abs() < 1e-12);
    }

    #[tokio::test]
    async fn test_can_afford() {
        let cost = CostController::default();
        assert!(cost.can_afford(1000, 1_000_000, 1_000_000)); // unlimited

        cost.set_budget(1.0);
        assert!(cost.can_afford(10, 1000, 1000));
        assert!(!cost.can_afford(10_000, 100_000, 100_000));
    }

    #[tokio::test]
    async fn test_report_shapes() {
        let cost = CostController::default();
        cost.record_usage(AGENT, 100, 50, None, true).await;
        cost.set_budget(5.0);

        let metered = cost.report();
        assert!(metered.contains("Session: $"));
        assert!(metered.contains("Budget: $5.00"));

        let local = cost.report_local();
        assert!(local.contains("cost: free (local inference)"));
        assert!(local.contains("100 in / 50 out"));
    }

    #[test]
    fn test_pricing_table_lookup() {
        let table = PricingTable::default();
        let sonnet = table.rate(Some("claude-3-5-sonnet"));
        assert_eq!(sonnet, DEFAULT_PRICING);
        let unknown = table.rate(Some("mystery-model"));
        assert_eq!(unknown, DEFAULT_PRICING);
        let opus = table.rate(Some("claude-3-opus"));
        assert!(opus.input_per_token > sonnet.input_per_token);
    }
}
