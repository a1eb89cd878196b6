//! Workflow checkpoint repository
//!
//! Checkpoints are append-only: rows are inserted, listed newest-first and
//! never rewritten.

use crate::db::Database;
use crate::error::{Result, StoreError};
use crate::models::CheckpointRecord;
use sqlx::sqlite::SqliteRow;
use sqlx::Row;
use std::sync::Arc;
use tracing::debug;
use uuid::Uuid;

fn checkpoint_from_row(row: &SqliteRow) -> Result<CheckpointRecord> {
    let id: String = row.get("id");
    let workflow_id: String = row.get("workflow_id");
    let node_id: i64 = row.get("node_id");
    Ok(CheckpointRecord {
        id: Uuid::parse_str(&id)
            .map_err(|_| StoreError::NotFound(format!("bad checkpoint id {id}")))?,
        workflow_id: Uuid::parse_str(&workflow_id)
            .map_err(|_| StoreError::NotFound(format!("bad workflow id {workflow_id}")))?,
        node_id: node_id as u64,
        state_json: row.get("state_json"),
        created_at: row.get("created_at"),
        metadata_json: row.get("metadata_json"),
    })
}

/// Repository for workflow checkpoints
#[derive(Clone, Debug)]
pub struct CheckpointRepository {
    db: Arc<Database>,
}

impl CheckpointRepository {
    pub fn new(db: Arc<Database>) -> Self {
        Self { db }
    }

    /// Persist a new checkpoint; returns its id
    pub async fn save(
        &self,
        workflow_id: Uuid,
        node_id: u64,
        state_json: &str,
        metadata_json: Option<&str>,
    ) -> Result<Uuid> {
        let id = Uuid::new_v4();
        sqlx::query(
            "INSERT INTO workflow_checkpoints (id, workflow_id, node_id, state_json, metadata_json)
             VALUES (?, ?, ?, ?, ?)",
        )
        .bind(id.to_string())
        .bind(workflow_id.to_string())
        .bind(node_id as i64)
        .bind(state_json)
        .bind(metadata_json)
        .execute(self.db.pool())
        .await?;

        debug!(category = "workflow", checkpoint = %id, workflow = %workflow_id, node = node_id, "checkpoint saved");
        Ok(id)
    }

    /// Load one checkpoint
    pub async fn get(&self, id: Uuid) -> Result<Option<CheckpointRecord>> {
        let row = sqlx::query("SELECT * FROM workflow_checkpoints WHERE id = ?")
            .bind(id.to_string())
            .fetch_optional(self.db.pool())
            .await?;
        row.as_ref().map(checkpoint_from_row).transpose()
    }

    /// All checkpoints of a workflow, newest first
    pub async fn list_for_workflow(&self, workflow_id: Uuid) -> Result<Vec<CheckpointRecord>> {
        let rows = sqlx::query(
            "SELECT * FROM workflow_checkpoints
             WHERE workflow_id = ?
             ORDER BY created_at DESC, rowid DESC",
        )
        .bind(workflow_id.to_string())
        .fetch_all(self.db.pool())
        .await?;
        rows.iter().map(checkpoint_from_row).collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_save_get_roundtrip() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let repo = CheckpointRepository::new(db);
        let workflow_id = Uuid::new_v4();

        let id = repo
            .save(workflow_id, 42, r#"[{"key":"k1","value":"v1"}]"#, None)
            .await
            .unwrap();

        let record = repo.get(id).await.unwrap().unwrap();
        assert_eq!(record.workflow_id, workflow_id);
        assert_eq!(record.node_id, 42);
        assert!(record.state_json.contains("k1"));
        assert!(record.metadata_json.is_none());

        assert!(repo.get(Uuid::new_v4()).await.unwrap().is_none());
    }

    #[tokio::test]
    async fn test_list_newest_first() {
        let db = Arc::new(Database::open_in_memory().await.unwrap());
        let repo = CheckpointRepository::new(db);
        let workflow_id = Uuid::new_v4();

        let first = repo.save(workflow_id, 1, "[]", None).await.unwrap();
        let second = repo.save(workflow_id, 2, "[]", None).await.unwrap();
        repo.save(Uuid::new_v4(), 3, "[]", None).await.unwrap(); // other workflow

        let list = repo.list_for_workflow(workflow_id).await.unwrap();
        assert_eq!(list.len(), 2);
        assert_eq!(list[0].id, second);
        assert_eq!(list[1].id, first);
    }
}
