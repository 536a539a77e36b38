//! Item payloads in `chain_items`: read before calculation, overwritten
//! with the result.

use async_trait::async_trait;

use crate::engine::ItemRepository;
use crate::error::{Error, Result};
use crate::model::{ItemId, Payload};

/// A stored item payload.
#[derive(Debug, Clone)]
pub struct StoredItem {
    pub id: ItemId,
    pub payload: Payload,
    pub updated_at: chrono::DateTime<chrono::Utc>,
}

impl super::Db {
    /// Insert or overwrite an item's payload.
    pub async fn put_item(&self, id: &ItemId, payload: &Payload) -> Result<()> {
        sqlx::query(
            "INSERT INTO chain_items (id, payload, updated_at) VALUES ($1, $2, now())
             ON CONFLICT (id) DO UPDATE SET payload = EXCLUDED.payload, updated_at = now()",
        )
        .bind(id.as_str())
        .bind(payload)
        .execute(&self.pool)
        .await?;
        Ok(())
    }

    /// Get an item by ID.
    pub async fn get_item(&self, id: &ItemId) -> Result<StoredItem> {
        let row: Option<(Payload, chrono::DateTime<chrono::Utc>)> =
            sqlx::query_as("SELECT payload, updated_at FROM chain_items WHERE id = $1")
                .bind(id.as_str())
                .fetch_optional(&self.pool)
                .await?;

        let (payload, updated_at) = row.ok_or_else(|| Error::NotFound(format!("item {id}")))?;
        Ok(StoredItem {
            id: id.clone(),
            payload,
            updated_at,
        })
    }

    /// Overwrite an existing item's payload. Fails if the item is missing.
    pub async fn update_item(&self, id: &ItemId, payload: &Payload) -> Result<()> {
        let rows_affected =
            sqlx::query("UPDATE chain_items SET payload = $2, updated_at = now() WHERE id = $1")
                .bind(id.as_str())
                .bind(payload)
                .execute(&self.pool)
                .await?
                .rows_affected();

        if rows_affected == 0 {
            return Err(Error::NotFound(format!("item {id}")));
        }
        Ok(())
    }
}

#[async_trait]
impl ItemRepository for super::Db {
    async fn read(&self, id: &ItemId) -> anyhow::Result<Payload> {
        Ok(self.get_item(id).await?.payload)
    }

    async fn save(&self, id: &ItemId, result: Payload) -> anyhow::Result<()> {
        self.update_item(id, &result).await?;
        Ok(())
    }
}
