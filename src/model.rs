//! Core data model.
//!
//! A chain is an ordered list of opaque work items processed strictly one at
//! a time. The remaining queue is persisted between hops so that every phase
//! of the chain can run as its own unit of work.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::VecDeque;
use uuid::Uuid;

/// Largest chain a single submission may carry.
pub const MAX_CHAIN_LEN: usize = 7000;

/// Semi-structured item state as returned by read and calculate.
pub type Payload = serde_json::Value;

// ---------------------------------------------------------------------------
// Identifiers
// ---------------------------------------------------------------------------

/// Opaque work item identifier. Unique within a run.
#[derive(Debug, Clone, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(transparent)]
pub struct ItemId(pub String);

impl ItemId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for ItemId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for ItemId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

impl From<String> for ItemId {
    fn from(s: String) -> Self {
        Self(s)
    }
}

/// Newtype for run IDs. Every submission gets a fresh one; it tags the
/// persisted queue so a superseded run can tell it no longer owns it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct RunId(pub Uuid);

impl RunId {
    pub fn new() -> Self {
        Self(Uuid::new_v4())
    }
}

impl Default for RunId {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Display for RunId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        // Short display: first 8 chars of UUID
        write!(f, "{}", &self.0.to_string()[..8])
    }
}

// ---------------------------------------------------------------------------
// Work queue
// ---------------------------------------------------------------------------

/// Status of the persisted queue record.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum QueueStatus {
    /// The owning run is still dispatching from it.
    Active,
    /// The owning run failed; the remaining items are kept for inspection.
    Aborted,
}

impl std::fmt::Display for QueueStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            QueueStatus::Active => "active",
            QueueStatus::Aborted => "aborted",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for QueueStatus {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "active" => Ok(QueueStatus::Active),
            "aborted" => Ok(QueueStatus::Aborted),
            other => Err(crate::error::Error::Other(format!(
                "unknown queue status: {other}"
            ))),
        }
    }
}

/// The remaining queue of one run, as persisted between hops.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct WorkQueue {
    /// Run that owns this queue.
    pub run_id: RunId,

    /// Items not yet dispatched, in submission order.
    pub items: VecDeque<ItemId>,

    /// Length of the original submission.
    pub submitted: usize,

    pub status: QueueStatus,

    /// Error that aborted the run, if any.
    pub error: Option<String>,

    pub created_at: DateTime<Utc>,
    pub updated_at: DateTime<Utc>,
}

impl WorkQueue {
    pub fn new(run_id: RunId, items: impl IntoIterator<Item = ItemId>) -> Self {
        let items: VecDeque<ItemId> = items.into_iter().collect();
        let now = Utc::now();
        Self {
            run_id,
            submitted: items.len(),
            items,
            status: QueueStatus::Active,
            error: None,
            created_at: now,
            updated_at: now,
        }
    }

    /// Remove and return the head item.
    pub fn pop_front(&mut self) -> Option<ItemId> {
        let head = self.items.pop_front();
        if head.is_some() {
            self.updated_at = Utc::now();
        }
        head
    }

    pub fn remaining(&self) -> usize {
        self.items.len()
    }

    /// Number of items already handed out.
    pub fn dispatched(&self) -> usize {
        self.submitted - self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

// ---------------------------------------------------------------------------
// Chain state
// ---------------------------------------------------------------------------

/// Lifecycle state of one run.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ChainState {
    /// Nothing submitted.
    Idle,
    /// Queue persisted, driver not yet dispatching.
    QueueLoaded,
    /// Popping the next item, reading its payload, submitting calculate.
    Dispatching,
    /// Calculate accepted; waiting for the callback.
    AwaitingCallback,
    /// Callback received; saving the result.
    Saving,
    /// Queue drained. Terminal.
    Completed,
    /// An item failed under the abort policy. Terminal.
    Aborted,
    /// A newer submission took over the queue. Terminal.
    Superseded,
}

impl ChainState {
    /// Can transition from self to `to`?
    pub fn can_transition_to(self, to: ChainState) -> bool {
        use ChainState::*;
        matches!(
            (self, to),
            (Idle, QueueLoaded)
                | (QueueLoaded, Dispatching)
                | (QueueLoaded, Aborted)
                | (Dispatching, AwaitingCallback)
                | (Dispatching, Dispatching)    // skipped item
                | (Dispatching, Completed)
                | (Dispatching, Superseded)
                | (Dispatching, Aborted)
                | (AwaitingCallback, Saving)
                | (AwaitingCallback, Dispatching) // skipped item
                | (AwaitingCallback, Aborted)
                | (Saving, Dispatching)
                | (Saving, Aborted)
        )
    }

    /// Is this a terminal state?
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ChainState::Completed | ChainState::Aborted | ChainState::Superseded
        )
    }
}

impl std::fmt::Display for ChainState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            ChainState::Idle => "idle",
            ChainState::QueueLoaded => "queue_loaded",
            ChainState::Dispatching => "dispatching",
            ChainState::AwaitingCallback => "awaiting_callback",
            ChainState::Saving => "saving",
            ChainState::Completed => "completed",
            ChainState::Aborted => "aborted",
            ChainState::Superseded => "superseded",
        };
        write!(f, "{s}")
    }
}

// ---------------------------------------------------------------------------
// Failure policy
// ---------------------------------------------------------------------------

/// What a run does when one item fails.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FailurePolicy {
    /// Stop the whole remaining chain and surface the error.
    #[default]
    Abort,
    /// Record the failure and move on to the next item.
    Skip,
}

impl std::fmt::Display for FailurePolicy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let s = match self {
            FailurePolicy::Abort => "abort",
            FailurePolicy::Skip => "skip",
        };
        write!(f, "{s}")
    }
}

impl std::str::FromStr for FailurePolicy {
    type Err = crate::error::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.trim().to_ascii_lowercase().as_str() {
            "abort" => Ok(FailurePolicy::Abort),
            "skip" => Ok(FailurePolicy::Skip),
            other => Err(crate::error::Error::Config(format!(
                "unknown failure policy: {other} (expected abort or skip)"
            ))),
        }
    }
}
