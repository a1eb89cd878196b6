//! Daily usage aggregates
//!
//! One row per day, upserted on every recorded call. The grand total is
//! restored from here at startup; if the database is unavailable the
//! in-memory counters stay authoritative and the historical total may lag.

use crate::db::Database;
use crate::error::Result;
use chrono::NaiveDate;
use sqlx::Row;
use std::sync::Arc;

/// One persisted day of usage
#[derive(Debug, Clone, PartialEq)]
pub struct UsageDay {
    pub date: NaiveDate,
    pub input_tokens: i64,
    pub output_tokens: i64,
    pub cost_usd: f64,
    pub calls: i64,
}

/// Repository for the `usage_daily` table
#[derive(Clone, Debug)]
pub struct UsageRepository {
    db: Arc<Database>,
}

impl UsageRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Fold one call into its day's aggregate row
    pub async fn record_daily(
        &self,
        date: NaiveDate,
        input_tokens: u64,
        output_tokens: u64,
        cost_usd: f64,
    ) -> Result<()> {
        sqlx::query(
            "INSERT INTO usage_daily (date, input_tokens, output_tokens, cost_usd, calls)
             VALUES (?, ?, ?, ?, 1)
             ON CONFLICT(date) DO UPDATE SET
                input_tokens = input_tokens + excluded.input_tokens,
                output_tokens = output_tokens + excluded.output_tokens,
                cost_usd = cost_usd + excluded.cost_usd,
                calls = calls + 1",
        )
        .bind(date.to_string())
        .bind(input_tokens as i64)
        .bind(output_tokens as i64)
        .bind(cost_usd)
        .execute(self.db.pool())
        .await?;
        Ok(())
    }

    /// Grand total spend across all recorded days
    pub async fn total_cost(&self) -> Result<f64> {
        let row = sqlx::query("SELECT COALESCE(SUM(cost_usd), 0.0) as total FROM usage_daily")
            .fetch_one(self.db.pool())
            .await?;
        Ok(row.get("total"))
    }

    /// Most recent daily rows, newest first
    pub async fn recent(&self, limit: i64) -> Result<Vec<UsageDay>> {
        let rows = sqlx::query("SELECT * FROM usage_daily ORDER BY date DESC LIMIT ?")
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;
        rows.into_iter()
            .map(|row| {
                let date: String = row.get("date");
                Ok(UsageDay {
                    date: date.parse().unwrap_or_default(),
                    input_tokens: row.get("input_tokens"),
                    output_tokens: row.get("output_tokens"),
                    cost_usd: row.get("cost_usd"),
                    calls: row.get("calls"),
                })
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;

    #[tokio::test]
    async fn test_upsert_accumulates_and_counts_calls() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let repo = UsageRepository::new(db);
        let today = Utc::now().date_naive();

        repo.record_daily(today, 100, 50, 0.5).await.unwrap();
        repo.record_daily(today, 200, 100, 1.0).await.unwrap();

        let days = repo.recent(10).await.unwrap();
        assert_eq!(days.len(), 1);
        assert_eq!(days[0].input_tokens, 300);
        assert_eq!(days[0].output_tokens, 150);
        assert_eq!(days[0].calls, 2);
        assert!((days[0].cost_usd - 1.5).abs() < 1e-9);

        assert!((repo.total_cost().await.unwrap() - 1.5).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_total_spans_days() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let repo = UsageRepository::new(db);
        let today = Utc::now().date_naive();
        let yesterday = today.pred_opt().unwrap();

        repo.record_daily(yesterday, 10, 10, 2.0).await.unwrap();
        repo.record_daily(today, 10, 10, 3.0).await.unwrap();

        assert!((repo.total_cost().await.unwrap() - 5.0).abs() < 1e-9);
        let days = repo.recent(10).await.unwrap();
        assert_eq!(days.len(), 2);
        assert_eq!(days[0].date, today);
    }
}
