//! Postgres-backed queue store: one `chain_queues` row per chain key.
//!
//! The remaining items live in a jsonb array. A pop locks the row, reads
//! `items->>0` and drops it with `items - 0` in the same transaction.

use async_trait::async_trait;
use uuid::Uuid;

use crate::error::Result;
use crate::model::{ItemId, QueueStatus, RunId, WorkQueue};
use crate::store::{PopOutcome, QueueStore};

#[async_trait]
impl QueueStore for super::Db {
    async fn replace(&self, key: &str, queue: &WorkQueue) -> Result<()> {
        let items = serde_json::to_value(&queue.items)?;
        sqlx::query(
            "INSERT INTO chain_queues (chain_key, run_id, items, submitted, status, error, created_at, updated_at)
             VALUES ($1, $2, $3, $4, $5, $6, $7, $8)
             ON CONFLICT (chain_key) DO UPDATE SET
                run_id = EXCLUDED.run_id,
                items = EXCLUDED.items,
                submitted = EXCLUDED.submitted,
                status = EXCLUDED.status,
                error = EXCLUDED.error,
                created_at = EXCLUDED.created_at,
                updated_at = EXCLUDED.updated_at",
        )
        .bind(key)
        .bind(queue.run_id.0)
        .bind(&items)
        .bind(queue.submitted as i32)
        .bind(queue.status.to_string())
        .bind(&queue.error)
        .bind(queue.created_at)
        .bind(queue.updated_at)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<WorkQueue>> {
        let row: Option<QueueRow> = sqlx::query_as(
            "SELECT run_id, items, submitted, status, error, created_at, updated_at
             FROM chain_queues WHERE chain_key = $1",
        )
        .bind(key)
        .fetch_optional(&self.pool)
        .await?;

        row.map(QueueRow::try_into_queue).transpose()
    }

    async fn pop(&self, key: &str, run_id: RunId) -> Result<PopOutcome> {
        let mut tx = self.pool.begin().await?;

        let row: Option<(Uuid, String, Option<String>)> = sqlx::query_as(
            "SELECT run_id, status, items->>0 FROM chain_queues WHERE chain_key = $1 FOR UPDATE",
        )
        .bind(key)
        .fetch_optional(&mut *tx)
        .await?;

        let outcome = match row {
            None => PopOutcome::Superseded,
            Some((owner, _, _)) if owner != run_id.0 => PopOutcome::Superseded,
            Some((_, status, head)) => match (status.parse::<QueueStatus>()?, head) {
                (QueueStatus::Aborted, _) => PopOutcome::Aborted,
                (QueueStatus::Active, None) => PopOutcome::Empty,
                (QueueStatus::Active, Some(head)) => {
                    sqlx::query(
                        "UPDATE chain_queues SET items = items - 0, updated_at = now()
                         WHERE chain_key = $1",
                    )
                    .bind(key)
                    .execute(&mut *tx)
                    .await?;
                    PopOutcome::Item(ItemId(head))
                }
            },
        };

        tx.commit().await?;
        Ok(outcome)
    }

    async fn mark_aborted(&self, key: &str, run_id: RunId, error: &str) -> Result<()> {
        sqlx::query(
            "UPDATE chain_queues SET status = 'aborted', error = $3, updated_at = now()
             WHERE chain_key = $1 AND run_id = $2",
        )
        .bind(key)
        .bind(run_id.0)
        .bind(error)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    async fn delete(&self, key: &str, run_id: RunId) -> Result<()> {
        sqlx::query("DELETE FROM chain_queues WHERE chain_key = $1 AND run_id = $2")
            .bind(key)
            .bind(run_id.0)
            .execute(&self.pool)
            .await?;
        Ok(())
    }
}

/// Internal row type for sqlx::FromRow.
#[derive(sqlx::FromRow)]
struct QueueRow {
    run_id: Uuid,
    items: serde_json::Value,
    submitted: i32,
    status: String,
    error: Option<String>,
    created_at: chrono::DateTime<chrono::Utc>,
    updated_at: chrono::DateTime<chrono::Utc>,
}

impl QueueRow {
    fn try_into_queue(self) -> Result<WorkQueue> {
        Ok(WorkQueue {
            run_id: RunId(self.run_id),
            items: serde_json::from_value(self.items)?,
            submitted: self.submitted as usize,
            status: self.status.parse()?,
            error: self.error,
            created_at: self.created_at,
            updated_at: self.updated_at,
        })
    }
}
