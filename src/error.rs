//! Error types for jobchain.

use crate::model::ItemId;
use std::time::Duration;
use thiserror::Error;

#[derive(Debug, Error)]
pub enum Error {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("read failed for item {item}: {source}")]
    Read {
        item: ItemId,
        #[source]
        source: anyhow::Error,
    },

    #[error("calculate submission rejected for item {item}: {source}")]
    CalculateSubmission {
        item: ItemId,
        #[source]
        source: anyhow::Error,
    },

    #[error("calculation failed for item {item}: {message}")]
    Calculate { item: ItemId, message: String },

    #[error("calculator dropped the continuation for item {item} without calling back")]
    CallbackDropped { item: ItemId },

    #[error("no callback for item {item} after {after:?}")]
    CallbackTimeout { item: ItemId, after: Duration },

    #[error("save failed for item {item}: {source}")]
    Save {
        item: ItemId,
        #[source]
        source: anyhow::Error,
    },

    #[error("invalid state transition: {from} -> {to}")]
    InvalidTransition { from: String, to: String },

    #[error("not found: {0}")]
    NotFound(String),

    #[error("config error: {0}")]
    Config(String),

    #[error("storage error: {0}")]
    Storage(#[from] sqlx::Error),

    #[error("migration failed: {0}")]
    Migrate(#[from] sqlx::migrate::MigrateError),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),

    #[error("json error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// True for failures scoped to a single work item, as opposed to the
    /// queue store or the runtime. Only these may be skipped.
    pub fn is_item_failure(&self) -> bool {
        matches!(
            self,
            Error::Read { .. }
                | Error::CalculateSubmission { .. }
                | Error::Calculate { .. }
                | Error::CallbackDropped { .. }
                | Error::CallbackTimeout { .. }
                | Error::Save { .. }
        )
    }

    /// Short label for metrics.
    pub fn kind(&self) -> &'static str {
        match self {
            Error::InvalidArgument(_) => "invalid_argument",
            Error::Read { .. } => "read",
            Error::CalculateSubmission { .. } => "calculate_submission",
            Error::Calculate { .. } => "calculate",
            Error::CallbackDropped { .. } => "callback_dropped",
            Error::CallbackTimeout { .. } => "callback_timeout",
            Error::Save { .. } => "save",
            Error::InvalidTransition { .. } => "invalid_transition",
            Error::NotFound(_) => "not_found",
            Error::Config(_) => "config",
            Error::Storage(_) | Error::Migrate(_) => "storage",
            Error::Io(_) => "io",
            Error::Json(_) => "json",
            Error::Other(_) => "other",
        }
    }
}

pub type Result<T> = std::result::Result<T, Error>;
