//! Database connection and schema management
//!
//! One SQLite file holds plans, tasks, workflow checkpoints and daily usage
//! aggregates (default `~/.convergio/plans.db`). Connections are opened with
//! WAL journaling, foreign keys on, a 5 second busy timeout and
//! `synchronous=NORMAL`; all statements are parameterized.

use crate::error::{Result, StoreError};
use sqlx::sqlite::{SqliteConnectOptions, SqliteJournalMode, SqlitePool, SqlitePoolOptions, SqliteSynchronous};
use std::path::Path;
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, info};

/// Type alias for the database connection pool
pub type DatabasePool = SqlitePool;

/// Schema statements, applied in order at open time
const SCHEMA: &[&str] = &[
    "CREATE TABLE IF NOT EXISTS plans (
        id TEXT PRIMARY KEY,
        description TEXT NOT NULL,
        context TEXT,
        status TEXT DEFAULT 'pending'
            CHECK(status IN ('pending','active','completed','failed','cancelled')),
        created_at INTEGER DEFAULT (strftime('%s','now')),
        updated_at INTEGER DEFAULT (strftime('%s','now')),
        completed_at INTEGER
    )",
    "CREATE TABLE IF NOT EXISTS tasks (
        id TEXT PRIMARY KEY,
        plan_id TEXT NOT NULL REFERENCES plans(id) ON DELETE CASCADE,
        parent_task_id TEXT REFERENCES tasks(id) ON DELETE CASCADE,
        description TEXT NOT NULL,
        assigned_agent TEXT,
        status TEXT DEFAULT 'pending'
            CHECK(status IN ('pending','in_progress','completed','failed','blocked','skipped')),
        priority INTEGER DEFAULT 50 CHECK(priority BETWEEN 0 AND 100),
        created_at INTEGER DEFAULT (strftime('%s','now')),
        started_at INTEGER,
        completed_at INTEGER,
        output TEXT,
        error TEXT,
        retry_count INTEGER DEFAULT 0
    )",
    "CREATE INDEX IF NOT EXISTS idx_tasks_plan ON tasks(plan_id)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_plan_status ON tasks(plan_id, status)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_agent ON tasks(assigned_agent)",
    "CREATE INDEX IF NOT EXISTS idx_tasks_parent ON tasks(parent_task_id)",
    "CREATE INDEX IF NOT EXISTS idx_plans_status ON plans(status)",
    "CREATE TRIGGER IF NOT EXISTS trg_plans_updated_at
        AFTER UPDATE ON plans
        BEGIN
            UPDATE plans SET updated_at = strftime('%s','now') WHERE id = NEW.id;
        END",
    "CREATE TABLE IF NOT EXISTS workflow_checkpoints (
        id TEXT PRIMARY KEY,
        workflow_id TEXT NOT NULL,
        node_id INTEGER NOT NULL,
        state_json TEXT NOT NULL,
        created_at INTEGER DEFAULT (strftime('%s','now')),
        metadata_json TEXT
    )",
    "CREATE INDEX IF NOT EXISTS idx_checkpoints_workflow ON workflow_checkpoints(workflow_id)",
    "CREATE TABLE IF NOT EXISTS usage_daily (
        date TEXT PRIMARY KEY,
        input_tokens INTEGER NOT NULL DEFAULT 0,
        output_tokens INTEGER NOT NULL DEFAULT 0,
        cost_usd REAL NOT NULL DEFAULT 0,
        calls INTEGER NOT NULL DEFAULT 0
    )",
];

/// Database connection wrapper
#[derive(Clone, Debug)]
pub struct Database {
    pool: Arc<DatabasePool>,
}

impl Database {
    /// Open (creating if missing) the database at `path` and apply the schema
    pub async fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        if let Some(parent) = path.parent() {
            if !parent.exists() {
                std::fs::create_dir_all(parent).map_err(|e| {
                    StoreError::NotFound(format!(
                        "cannot create database directory {}: {e}",
                        parent.display()
                    ))
                })?;
            }
        }

        let options = SqliteConnectOptions::new()
            .filename(path)
            .create_if_missing(true)
            .journal_mode(SqliteJournalMode::Wal)
            .synchronous(SqliteSynchronous::Normal)
            .busy_timeout(Duration::from_secs(5))
            .foreign_keys(true);

        debug!(category = "system", path = %path.display(), "connecting to plan database");
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect_with(options)
            .await?;

        let db = Self {
            pool: Arc::new(pool),
        };
        db.apply_schema().await?;
        info!(category = "system", path = %path.display(), "plan database ready");
        Ok(db)
    }

    /// Open an in-memory database (tests and throwaway sessions)
    ///
    /// In-memory SQLite is per-connection, so the pool is pinned to one.
    pub async fn open_in_memory() -> Result<Self> {
        let options = SqliteConnectOptions::new()
            .filename(":memory:")
            .foreign_keys(true);

        let pool = SqlitePoolOptions::new()
            .max_connections(1)
            .connect_with(options)
            .await?;

        let db = Self {
            pool: Arc::new(pool),
        };
        db.apply_schema().await?;
        Ok(db)
    }

    /// Get a reference to the connection pool
    pub fn pool(&self) -> &DatabasePool {
        &self.pool
    }

    async fn apply_schema(&self) -> Result<()> {
        for statement in SCHEMA {
            sqlx::query(statement).execute(self.pool.as_ref()).await?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_open_in_memory_applies_schema() {
        let db = Database::open_in_memory().await.unwrap();
        // Schema is idempotent
        db.apply_schema().await.unwrap();

        let row: (i64,) = sqlx::query_as("SELECT COUNT(*) FROM plans")
            .fetch_one(db.pool())
            .await
            .unwrap();
        assert_eq!(row.0, 0);
    }

    #[tokio::test]
    async fn test_open_creates_parent_directory() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("nested").join("plans.db");
        let db = Database::open(&path).await.unwrap();
        assert!(path.exists());
        drop(db);
    }

    #[tokio::test]
    async fn test_status_check_constraint() {
        let db = Database::open_in_memory().await.unwrap();
        let result = sqlx::query("INSERT INTO plans (id, description, status) VALUES (?, ?, ?)")
            .bind("p1")
            .bind("test")
            .bind("bogus")
            .execute(db.pool())
            .await;
        assert!(result.is_err());
    }

    #[tokio::test]
    async fn test_priority_check_constraint() {
        let db = Database::open_in_memory().await.unwrap();
        sqlx::query("INSERT INTO plans (id, description) VALUES ('p1', 'test')")
            .execute(db.pool())
            .await
            .unwrap();
        let result =
            sqlx::query("INSERT INTO tasks (id, plan_id, description, priority) VALUES (?, ?, ?, ?)")
                .bind("t1")
                .bind("p1")
                .bind("task")
                .bind(101)
                .execute(db.pool())
                .await;
        assert!(result.is_err());
    }
}
