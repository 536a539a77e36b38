//! Persisted queue store.
//!
//! Holds one [`WorkQueue`] record per chain key. Every phase of a chain reads
//! and writes the queue through here, so nothing but this record needs to
//! survive between hops.

use async_trait::async_trait;
use chrono::Utc;
use std::collections::HashMap;
use tokio::sync::Mutex;

use crate::error::Result;
use crate::model::{ItemId, QueueStatus, RunId, WorkQueue};

/// What a pop found.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum PopOutcome {
    /// Head item removed; the remainder is already persisted.
    Item(ItemId),
    /// The run's queue is drained. The record is still there.
    Empty,
    /// The run's queue was marked aborted; its remaining items stay put.
    Aborted,
    /// The record now belongs to a newer run, or is gone. A run only
    /// deletes its own record after draining it, so a missing record means
    /// a newer run replaced and finished it.
    Superseded,
}

#[async_trait]
pub trait QueueStore: Send + Sync {
    /// Overwrite the queue under `key` wholesale.
    async fn replace(&self, key: &str, queue: &WorkQueue) -> Result<()>;

    /// Load the queue under `key`, if any.
    async fn load(&self, key: &str) -> Result<Option<WorkQueue>>;

    /// Pop the head item of `run_id`'s queue and persist the remainder
    /// before returning.
    async fn pop(&self, key: &str, run_id: RunId) -> Result<PopOutcome>;

    /// Mark `run_id`'s queue aborted, keeping its remaining items.
    /// No-op if the record belongs to another run.
    async fn mark_aborted(&self, key: &str, run_id: RunId, error: &str) -> Result<()>;

    /// Delete `run_id`'s queue. No-op if the record belongs to another run.
    async fn delete(&self, key: &str, run_id: RunId) -> Result<()>;
}

/// In-process store. Durable only for the life of the process.
#[derive(Default)]
pub struct MemoryQueueStore {
    queues: Mutex<HashMap<String, WorkQueue>>,
}

impl MemoryQueueStore {
    pub fn new() -> Self {
        Self::default()
    }
}

#[async_trait]
impl QueueStore for MemoryQueueStore {
    async fn replace(&self, key: &str, queue: &WorkQueue) -> Result<()> {
        self.queues
            .lock()
            .await
            .insert(key.to_string(), queue.clone());
        Ok(())
    }

    async fn load(&self, key: &str) -> Result<Option<WorkQueue>> {
        Ok(self.queues.lock().await.get(key).cloned())
    }

    async fn pop(&self, key: &str, run_id: RunId) -> Result<PopOutcome> {
        let mut queues = self.queues.lock().await;
        let Some(queue) = queues.get_mut(key) else {
            return Ok(PopOutcome::Superseded);
        };
        if queue.run_id != run_id {
            return Ok(PopOutcome::Superseded);
        }
        if queue.status == QueueStatus::Aborted {
            return Ok(PopOutcome::Aborted);
        }
        Ok(match queue.pop_front() {
            Some(id) => PopOutcome::Item(id),
            None => PopOutcome::Empty,
        })
    }

    async fn mark_aborted(&self, key: &str, run_id: RunId, error: &str) -> Result<()> {
        let mut queues = self.queues.lock().await;
        if let Some(queue) = queues.get_mut(key).filter(|q| q.run_id == run_id) {
            queue.status = QueueStatus::Aborted;
            queue.error = Some(error.to_string());
            queue.updated_at = Utc::now();
        }
        Ok(())
    }

    async fn delete(&self, key: &str, run_id: RunId) -> Result<()> {
        let mut queues = self.queues.lock().await;
        if queues.get(key).is_some_and(|q| q.run_id == run_id) {
            queues.remove(key);
        }
        Ok(())
    }
}
