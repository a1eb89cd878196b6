//! Task repository: hierarchical tasks with atomic claim semantics
//!
//! `claim` is the one hand-off that makes concurrent workers safe on a
//! shared queue: a single conditional UPDATE moves a row from `pending` to
//! `in_progress`, and exactly one caller observes a nonzero row count.

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::models::{Task, TaskStatus};
use chrono::Utc;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

/// Maximum nesting of subtasks under one root task
pub const MAX_TASK_DEPTH: usize = 32;

fn uuid_column(row: &SqliteRow, column: &str) -> Result<Uuid> {
    let value: String = row.get(column);
    Uuid::parse_str(&value).map_err(|_| StoreError::NotFound(format!("bad uuid in {column}: {value}")))
}

pub(crate) fn task_from_row(row: &SqliteRow) -> Result<Task> {
    let status: String = row.get("status");
    let parent: Option<String> = row.get("parent_task_id");
    Ok(Task {
        id: uuid_column(row, "id")?,
        plan_id: uuid_column(row, "plan_id")?,
        parent_task_id: parent
            .map(|p| Uuid::parse_str(&p))
            .transpose()
            .map_err(|_| StoreError::NotFound("bad parent_task_id".into()))?,
        description: row.get("description"),
        assigned_agent: row.get("assigned_agent"),
        status: TaskStatus::parse(&status)?,
        priority: row.get("priority"),
        created_at: row.get("created_at"),
        started_at: row.get("started_at"),
        completed_at: row.get("completed_at"),
        output: row.get("output"),
        error: row.get("error"),
        retry_count: row.get("retry_count"),
    })
}

/// Repository for task rows
#[derive(Clone, Debug)]
pub struct TaskRepository {
    db: Arc<Database>,
}

impl TaskRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Add a task to a plan, optionally under a parent task
    ///
    /// Nesting is guarded at [`MAX_TASK_DEPTH`] levels.
    pub async fn add(
        &self,
        plan_id: Uuid,
        parent_task_id: Option<Uuid>,
        description: &str,
        assigned_agent: Option<&str>,
        priority: Option<i64>,
    ) -> Result<Task> {
        if let Some(parent) = parent_task_id {
            self.check_depth(parent).await?;
        }

        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO tasks (id, plan_id, parent_task_id, description, assigned_agent, priority)
             VALUES (?, ?, ?, ?, ?, COALESCE(?, 50))",
        )
        .bind(id.to_string())
        .bind(plan_id.to_string())
        .bind(parent_task_id.map(|p| p.to_string()))
        .bind(description)
        .bind(assigned_agent)
        .bind(priority)
        .execute(self.db.pool())
        .await?;

        debug!(category = "workflow", task = %id, plan = %plan_id, "task added");
        self.get(id)
            .await?
            .ok_or_else(|| StoreError::NotFound(format!("task {id} vanished after insert")))
    }

    async fn check_depth(&self, parent: Uuid) -> Result<()> {
        let mut current = Some(parent.to_string());
        let mut depth = 1;
        while let Some(id) = current {
            if depth >= MAX_TASK_DEPTH {
                return Err(StoreError::DepthLimit {
                    limit: MAX_TASK_DEPTH,
                });
            }
            current = sqlx::query("SELECT parent_task_id FROM tasks WHERE id = ?")
                .bind(&id)
                .fetch_optional(self.db.pool())
                .await?
                .and_then(|row| row.get::<Option<String>, _>("parent_task_id"));
            depth += 1;
        }
        Ok(())
    }

    /// Load a task by id
    pub async fn get(&self, id: Uuid) -> Result<Option<Task>> {
        let row = sqlx::query("SELECT * FROM tasks WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(task_from_row).transpose()
    }

    /// All tasks of a plan, in creation order
    pub async fn list_for_plan(&self, plan_id: Uuid) -> Result<Vec<Task>> {
        let rows = sqlx::query("SELECT * FROM tasks WHERE plan_id = ? ORDER BY created_at ASC, rowid ASC")
            .bind(plan_id.to_string())
            .fetch_all(self.db.pool())
            .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Direct subtasks of a task, in creation order
    pub async fn subtasks(&self, parent_task_id: Uuid) -> Result<Vec<Task>> {
        let rows = sqlx::query(
            "SELECT * FROM tasks WHERE parent_task_id = ? ORDER BY created_at ASC, rowid ASC",
        )
        .bind(parent_task_id.to_string())
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(task_from_row).collect()
    }

    /// Atomically claim a pending task for an agent
    ///
    /// The transition `pending -> in_progress` happens in one conditional
    /// UPDATE; a caller that loses the race gets [`StoreError::Busy`].
    pub async fn claim(&self, task_id: Uuid, agent: &str) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE tasks
             SET status = 'in_progress', assigned_agent = ?, started_at = strftime('%s','now')
             WHERE id = ? AND status = 'pending'",
        )
        .bind(agent)
        .bind(task_id.to_string())
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 1 {
            debug!(category = "workflow", task = %task_id, agent, "task claimed");
            return Ok(());
        }

        match self.get(task_id).await? {
            Some(_) => Err(StoreError::Busy(task_id.to_string())),
            None => Err(StoreError::NotFound(format!("task {task_id}"))),
        }
    }

    /// Mark a task completed with its output
    pub async fn complete(&self, task_id: Uuid, output: Option<&str>) -> Result<()> {
        self.finish(task_id, TaskStatus::Completed, output, None).await
    }

    /// Mark a task failed with its error; bumps `retry_count`
    pub async fn fail(&self, task_id: Uuid, error: &str) -> Result<()> {
        self.finish(task_id, TaskStatus::Failed, None, Some(error)).await
    }

    async fn finish(
        &self,
        task_id: Uuid,
        status: TaskStatus,
        output: Option<&str>,
        error: Option<&str>,
    ) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE tasks
             SET status = ?,
                 completed_at = strftime('%s','now'),
                 output = COALESCE(?, output),
                 error = COALESCE(?, error),
                 retry_count = retry_count + CASE WHEN ? = 'failed' THEN 1 ELSE 0 END
             WHERE id = ?",
        )
        .bind(status.as_str())
        .bind(output)
        .bind(error)
        .bind(status.as_str())
        .bind(task_id.to_string())
        .execute(self.db.pool())
        .await?
        .rows_affected();

        if affected == 0 {
            return Err(StoreError::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }

    /// Mark a task blocked
    pub async fn block(&self, task_id: Uuid) -> Result<()> {
        self.set_status(task_id, TaskStatus::Blocked).await
    }

    /// Mark a task skipped
    pub async fn skip(&self, task_id: Uuid) -> Result<()> {
        self.set_status(task_id, TaskStatus::Skipped).await
    }

    /// Return a claimed or blocked task to the pending pool
    pub async fn release(&self, task_id: Uuid) -> Result<()> {
        let affected = sqlx::query(
            "UPDATE tasks SET status = 'pending', started_at = NULL
             WHERE id = ? AND status IN ('in_progress','blocked')",
        )
        .bind(task_id.to_string())
        .execute(self.db.pool())
        .await?
        .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound(format!("releasable task {task_id}")));
        }
        Ok(())
    }

    async fn set_status(&self, task_id: Uuid, status: TaskStatus) -> Result<()> {
        let affected = sqlx::query("UPDATE tasks SET status = ? WHERE id = ?")
            .bind(status.as_str())
            .bind(task_id.to_string())
            .execute(self.db.pool())
            .await?
            .rows_affected();
        if affected == 0 {
            return Err(StoreError::NotFound(format!("task {task_id}")));
        }
        Ok(())
    }

    /// Next pending task for an agent within a plan
    ///
    /// Oldest, highest-priority pending row; rows already assigned to the
    /// agent come first, then unassigned rows, then everything else.
    pub async fn next_for_agent(&self, plan_id: Uuid, agent: &str) -> Result<Option<Task>> {
        let row = sqlx::query(
            "SELECT * FROM tasks
             WHERE plan_id = ? AND status = 'pending'
             ORDER BY CASE
                        WHEN assigned_agent = ? THEN 0
                        WHEN assigned_agent IS NULL THEN 1
                        ELSE 2
                      END,
                      priority DESC,
                      created_at ASC,
                      rowid ASC
             LIMIT 1",
        )
        .bind(plan_id.to_string())
        .bind(agent)
        .fetch_optional(self.db.pool())
        .await?;
        row.as_ref().map(task_from_row).transpose()
    }
}
