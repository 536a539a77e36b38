//! The external operations a chain drives: read, calculate, save.

use async_trait::async_trait;

use super::continuation::Continuation;
use crate::model::{ItemId, Payload};

/// Reads an item's current state and persists calculated results.
#[async_trait]
pub trait ItemRepository: Send + Sync {
    async fn read(&self, id: &ItemId) -> anyhow::Result<Payload>;

    async fn save(&self, id: &ItemId, result: Payload) -> anyhow::Result<()>;
}

/// Asynchronous calculation service.
///
/// `calculate` returns as soon as the request is accepted. The outcome is
/// delivered later, from any task, through `continuation`. An error returned
/// here means the request was rejected and no callback will follow.
#[async_trait]
pub trait Calculator: Send + Sync {
    async fn calculate(&self, payload: Payload, continuation: Continuation) -> anyhow::Result<()>;
}
