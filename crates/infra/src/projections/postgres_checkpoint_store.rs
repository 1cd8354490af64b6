//! Postgres-backed checkpoint store.
//!
//! One row per projection; a save is a single upsert, so state and positions
//! are replaced together. Methods block on the given runtime handle and must
//! be called from threads outside that runtime (projection workers are plain
//! OS threads).

use sqlx::{PgPool, Row};
use tokio::runtime::Handle;

use streamfold_core::ProjectionName;
use streamfold_events::Checkpoint;

use super::checkpoint_store::{CheckpointStore, CheckpointStoreError};

pub struct PostgresCheckpointStore {
    pool: PgPool,
    handle: Handle,
}

impl PostgresCheckpointStore {
    pub fn new(pool: PgPool, handle: Handle) -> Self {
        Self { pool, handle }
    }

    /// Create the checkpoint table if it is missing.
    pub fn ensure_schema(&self) -> Result<(), CheckpointStoreError> {
        self.handle.block_on(async {
            sqlx::query(
                r#"
                CREATE TABLE IF NOT EXISTS projection_checkpoints (
                    projection_name TEXT PRIMARY KEY,
                    checkpoint JSONB NOT NULL,
                    updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
                )
                "#,
            )
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(backend)
        })
    }
}

fn backend(err: sqlx::Error) -> CheckpointStoreError {
    CheckpointStoreError::Backend(err.to_string())
}

impl CheckpointStore for PostgresCheckpointStore {
    fn load(&self, projection: &ProjectionName) -> Result<Option<Checkpoint>, CheckpointStoreError> {
        let row = self.handle.block_on(async {
            sqlx::query(
                r#"
                SELECT checkpoint
                FROM projection_checkpoints
                WHERE projection_name = $1
                "#,
            )
            .bind(projection.as_str())
            .fetch_optional(&self.pool)
            .await
            .map_err(backend)
        })?;

        let Some(row) = row else {
            return Ok(None);
        };
        let value: serde_json::Value = row
            .try_get("checkpoint")
            .map_err(|e| CheckpointStoreError::Corrupt(e.to_string()))?;
        serde_json::from_value(value)
            .map(Some)
            .map_err(|e| CheckpointStoreError::Corrupt(e.to_string()))
    }

    fn save(&self, projection: &ProjectionName, checkpoint: &Checkpoint) -> Result<(), CheckpointStoreError> {
        let value = serde_json::to_value(checkpoint)
            .map_err(|e| CheckpointStoreError::Backend(format!("checkpoint serialization failed: {e}")))?;

        self.handle.block_on(async {
            sqlx::query(
                r#"
                INSERT INTO projection_checkpoints (projection_name, checkpoint)
                VALUES ($1, $2)
                ON CONFLICT (projection_name)
                DO UPDATE SET
                    checkpoint = EXCLUDED.checkpoint,
                    updated_at = NOW()
                "#,
            )
            .bind(projection.as_str())
            .bind(value)
            .execute(&self.pool)
            .await
            .map(|_| ())
            .map_err(backend)
        })
    }

    fn delete(&self, projection: &ProjectionName) -> Result<(), CheckpointStoreError> {
        self.handle.block_on(async {
            sqlx::query("DELETE FROM projection_checkpoints WHERE projection_name = $1")
                .bind(projection.as_str())
                .execute(&self.pool)
                .await
                .map(|_| ())
                .map_err(backend)
        })
    }
}
