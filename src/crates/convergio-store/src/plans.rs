//! Plan repository for database operations

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::models::{Plan, PlanProgress, PlanStatus};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;
use tracing::{debug, info};
use uuid::Uuid;

pub(crate) fn plan_from_row(row: &SqliteRow) -> Result<Plan> {
    let id: String = row.get("id");
    let status: String = row.get("status");
    Ok(Plan {
        id: Uuid::parse_str(&id).map_err(|_| StoreError::NotFound(format!("bad plan id {id}")))?,
        description: row.get("description"),
        context: row.get("context"),
        status: PlanStatus::parse(&status)?,
        created_at: row.get("created_at"),
        updated_at: row.get("updated_at"),
        completed_at: row.get("completed_at"),
    })
}

/// Repository for plan rows
#[derive(Clone, Debug)]
pub struct PlanRepository {
    db: Arc<Database>,
}

impl PlanRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Create a plan in `pending` status
    pub async fn create(&self, description: &str, context: Option<&str>) -> Result<Plan> {
        let id = Uuid::new_v4();
        sqlx::query("INSERT INTO plans (id, description, context) VALUES (?, ?, ?)")
            .bind(id.to_string())
            .bind(description)
            .bind(context)
            .execute(self.db.pool())
            .await?;

        debug!(category = "workflow", plan = %id, "plan created");
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("plan {id} vanished after insert")))
    }

    /// Load a plan by id
    pub async fn get(&self, id: Uuid) -> Result<Option<Plan>> {
        let row = sqlx::query("SELECT * FROM plans WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(plan_from_row).transpose()
    }

    /// Most recent plans, newest first
    pub async fn list(&self, limit: i64) -> Result<Vec<Plan>> {
        let rows = sqlx::query("SELECT * FROM plans ORDER BY created_at DESC, rowid DESC LIMIT ?")
            .bind(limit)
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(plan_from_row).collect()
    }

    /// Set a plan's status; terminal statuses also stamp `completed_at`
    pub async fn update_status(&self, id: Uuid, status: PlanStatus) -> Result<()> {
        let completed_at = status.is_terminal().then(|| Utc::now().timestamp());
        let affected = sqlx::query(
            "UPDATE plans SET status = ?, completed_at = COALESCE(?, completed_at) WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(completed_at)
        .bind(id.to_string())
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(format!("plan {id}")));
        }
        Ok(())
    }

    /// Delete a plan; tasks cascade
    pub async fn delete(&self, id: Uuid) -> Result<()> {
        let affected = sqlx::query("DELETE FROM plans WHERE id = ?")
            .bind(id.to_string())
            .execute(self.db.pool())
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound(format!("plan {id}")));
        }
        info!(category = "workflow", plan = %id, "plan deleted");
        Ok(())
    }

    /// Aggregate task counts for a plan
    pub async fn progress(&self, id: Uuid) -> Result<PlanProgress> {
        let rows = sqlx::query(
            "SELECT status, COUNT(*) as count FROM tasks WHERE plan_id = ? GROUP BY status",
        )
        .bind(id.to_string())
        .fetch_all(self.db.pool())
        .await?;

        let mut progress = PlanProgress::default();
        for row in rows {
            let status: String = row.get("status");
            let count: i64 = row.get("count");
            progress.total += count;
            match status.as_str() {
                "pending" => progress.pending = count,
                "in_progress" => progress.in_progress = count,
                "completed" => progress.completed = count,
                "failed" => progress.failed = count,
                "blocked" => progress.blocked = count,
                "skipped" => progress.skipped = count,
                _ => {}
            }
        }
        Ok(progress)
    }

    /// Re-derive a plan's status from its task counts
    ///
    /// Empty plans keep their status. All tasks done means `completed`; any
    /// failure once no work remains means `failed`; any progress means
    /// `active` (this is also the explicit path back to `active` from a
    /// terminal status); otherwise `pending`.
    pub async fn refresh_status(&self, id: Uuid) -> Result<PlanStatus> {
        let plan = self
            .get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("plan {id}")))?;
        let progress = self.progress(id).await?;

        if progress.total == 0 {
            return Ok(plan.status);
        }

        let open = progress.pending + progress.in_progress + progress.blocked;
        let derived = if progress.completed + progress.skipped == progress.total {
            PlanStatus::Completed
        } else if progress.failed > 0 && open == 0 {
            PlanStatus::Failed
        } else if progress.in_progress > 0 || progress.completed > 0 || progress.failed > 0 {
            PlanStatus::Active
        } else {
            PlanStatus::Pending
        };

        if derived != plan.status {
            self.update_status(id, derived).await?;
        }
        Ok(derived)
    }

    /// Delete terminal plans older than `days`; returns how many
    pub async fn cleanup_older_than(&self, days: i64) -> Result<u64> {
        let horizon = Utc::now().timestamp() - days * 86_400;
        let affected = sqlx::query(
            "DELETE FROM plans
             WHERE status IN ('completed','failed','cancelled') AND created_at < ?",
        )
        .bind(horizon)
        .execute(self.db.pool())
        .await?
        .rows_affected();
        if affected > 0 {
            info!(category = "workflow", removed = affected, "old plans cleaned up");
        }
        Ok(affected)
    }
}
