//! Bridges the cost controller's sink trait onto the usage repository

use async_trait::async_trait;
use convergio_agents::{DailyUsage, UsageSink};
use convergio_store::UsageRepository;

/// Adapter persisting daily cost aggregates through the plan database
#[derive(Clone, Debug)]
pub struct StoreUsageSink {
    repository: UsageRepository,
}

impl StoreUsageSink {
    pub fn new(repository: UsageRepository) -> Self {
        Self { repository }
    }
}

#[async_trait]
impl UsageSink for StoreUsageSink {
    async fn record_daily(&self, day: DailyUsage) -> std::result::Result<(), String> {
        self.repository
            .record_daily(day.date, day.input_tokens, day.output_tokens, day.cost_usd)
            .await
            .map_err(|e| e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use convergio_agents::CostController;
    use convergio_core::CHIEF;
    use convergio_store::Database;
    use std::sync::Arc;

    #[tokio::test]
    async fn test_cost_controller_persists_through_sink() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let repository = UsageRepository::new(db);
        let cost = CostController::default();
        cost.set_sink(Arc::new(StoreUsageSink::new(repository.clone())));

        cost.record_usage(CHIEF, 1000, 500, None, true).await;
        cost.record_usage(CHIEF, 1000, 500, None, true).await;

        let days = repository.recent(10).await.unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].calls, 2);
        assert_eq!(days[0].input_tokens, 2000);

        // Restore path: a fresh controller picks up the persisted total
        let restored = CostController::default();
        restored.restore_total(repository.total_cost().await.unwrap());
        assert!(restored.total_spend() > 0.0);
    }
}
