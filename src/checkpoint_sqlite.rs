//! Optional SQLite-backed [`CheckpointStore`] for durability across process
//! restarts (§10.3 `CheckpointBackend::Sqlite`). Gated behind the `sqlite`
//! feature so a DB-less build never pulls in `sqlx`.

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use rustc_hash::FxHashMap;
use sqlx::sqlite::SqlitePoolOptions;
use sqlx::{Row, SqlitePool};

use crate::checkpoint::{Checkpoint, CheckpointError, CheckpointStore};
use crate::ids::{CheckpointId, NodeId, ThreadId, WorkflowId};

/// A SQLite-backed checkpoint store. Rows mirror [`Checkpoint`] one-to-one;
/// `data`/`metadata` are stored as JSON text since the engine never queries
/// into their contents at the storage layer.
pub struct SqliteCheckpointStore {
    pool: SqlitePool,
}

impl SqliteCheckpointStore {
    pub async fn connect(db_path: &str) -> Result<Self, CheckpointError> {
        let pool = SqlitePoolOptions::new()
            .max_connections(5)
            .connect(&format!("sqlite://{db_path}?mode=rwc"))
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        sqlx::query(
            r"
            CREATE TABLE IF NOT EXISTS checkpoints (
                id TEXT PRIMARY KEY,
                thread_id TEXT NOT NULL,
                workflow_id TEXT NOT NULL,
                current_node TEXT,
                data TEXT NOT NULL,
                step_index INTEGER NOT NULL,
                created_at TEXT NOT NULL,
                metadata TEXT NOT NULL
            )
            ",
        )
        .execute(&pool)
        .await
        .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        sqlx::query("CREATE INDEX IF NOT EXISTS idx_checkpoints_thread ON checkpoints(thread_id)")
            .execute(&pool)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        Ok(Self { pool })
    }

    fn row_to_checkpoint(row: &sqlx::sqlite::SqliteRow) -> Result<Checkpoint, CheckpointError> {
        let data: String = row.try_get("data").map_err(|e| CheckpointError::Backend(e.to_string()))?;
        let metadata: String = row
            .try_get("metadata")
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;
        let current_node: Option<String> = row
            .try_get("current_node")
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        Ok(Checkpoint {
            id: CheckpointId::from_string(row.try_get::<String, _>("id").map_err(|e| CheckpointError::Backend(e.to_string()))?),
            thread_id: ThreadId::from_string(
                row.try_get::<String, _>("thread_id").map_err(|e| CheckpointError::Backend(e.to_string()))?,
            ),
            workflow_id: WorkflowId::from_string(
                row.try_get::<String, _>("workflow_id").map_err(|e| CheckpointError::Backend(e.to_string()))?,
            ),
            current_node: current_node.map(NodeId::from_string),
            data: serde_json::from_str::<FxHashMap<String, serde_json::Value>>(&data)
                .map_err(|e| CheckpointError::Backend(e.to_string()))?,
            step_index: u64::try_from(row.try_get::<i64, _>("step_index").map_err(|e| CheckpointError::Backend(e.to_string()))?)
                .unwrap_or_default(),
            created_at: row
                .try_get::<String, _>("created_at")
                .map_err(|e| CheckpointError::Backend(e.to_string()))?
                .parse::<DateTime<Utc>>()
                .map_err(|e| CheckpointError::Backend(e.to_string()))?,
            metadata: serde_json::from_str(&metadata).map_err(|e| CheckpointError::Backend(e.to_string()))?,
        })
    }
}

#[async_trait]
impl CheckpointStore for SqliteCheckpointStore {
    async fn put(&self, checkpoint: Checkpoint) -> Result<(), CheckpointError> {
        let data = serde_json::to_string(&checkpoint.data).map_err(|e| CheckpointError::Backend(e.to_string()))?;
        let metadata =
            serde_json::to_string(&checkpoint.metadata).map_err(|e| CheckpointError::Backend(e.to_string()))?;

        sqlx::query(
            r"
            INSERT OR REPLACE INTO checkpoints
                (id, thread_id, workflow_id, current_node, data, step_index, created_at, metadata)
            VALUES (?, ?, ?, ?, ?, ?, ?, ?)
            ",
        )
        .bind(checkpoint.id.as_str())
        .bind(checkpoint.thread_id.as_str())
        .bind(checkpoint.workflow_id.as_str())
        .bind(checkpoint.current_node.as_ref().map(NodeId::as_str))
        .bind(data)
        .bind(i64::try_from(checkpoint.step_index).unwrap_or(i64::MAX))
        .bind(checkpoint.created_at.to_rfc3339())
        .bind(metadata)
        .execute(&self.pool)
        .await
        .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        Ok(())
    }

    async fn get(&self, checkpoint_id: &CheckpointId) -> Result<Option<Checkpoint>, CheckpointError> {
        let row = sqlx::query("SELECT * FROM checkpoints WHERE id = ?")
            .bind(checkpoint_id.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        row.as_ref().map(Self::row_to_checkpoint).transpose()
    }

    async fn list_by_thread(&self, thread_id: &ThreadId) -> Result<Vec<Checkpoint>, CheckpointError> {
        let rows = sqlx::query("SELECT * FROM checkpoints WHERE thread_id = ? ORDER BY created_at")
            .bind(thread_id.as_str())
            .fetch_all(&self.pool)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;

        rows.iter().map(Self::row_to_checkpoint).collect()
    }

    async fn evict(&self, checkpoint_id: &CheckpointId) -> Result<(), CheckpointError> {
        sqlx::query("DELETE FROM checkpoints WHERE id = ?")
            .bind(checkpoint_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;
        Ok(())
    }

    async fn evict_all(&self, thread_id: &ThreadId) -> Result<(), CheckpointError> {
        sqlx::query("DELETE FROM checkpoints WHERE thread_id = ?")
            .bind(thread_id.as_str())
            .execute(&self.pool)
            .await
            .map_err(|e| CheckpointError::Backend(e.to_string()))?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::checkpoint::CheckpointManager;

    #[tokio::test]
    async fn put_get_roundtrips_through_sqlite() {
        let dir = tempfile::tempdir().unwrap();
        let db_path = dir.path().join("checkpoints.sqlite3");
        let store = SqliteCheckpointStore::connect(db_path.to_str().unwrap()).await.unwrap();
        let manager = CheckpointManager::new(store, 10, 1000);

        let thread_id = ThreadId::generate();
        let id = manager
            .create(
                thread_id.clone(),
                WorkflowId::generate(),
                Some(NodeId::from("A")),
                FxHashMap::default(),
                FxHashMap::default(),
                0,
            )
            .await
            .unwrap();

        let restored = manager.restore(&id).await.unwrap();
        assert_eq!(restored.thread_id, thread_id);
    }
}
