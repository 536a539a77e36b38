//! Chain run span helpers.
//!
//! Provides span creation and state-transition recording for runs and the
//! items flowing through them.

use tracing::Span;

use crate::model::{ItemId, RunId};

/// Start a span covering one whole run.
///
/// The `chain.state` field is declared empty and updated by
/// [`record_state_transition`].
pub fn start_run_span(chain_key: &str, run_id: RunId, items: usize) -> Span {
    tracing::info_span!(
        "chain.run",
        "chain.key" = chain_key,
        "chain.run_id" = %run_id.0,
        "chain.items" = items,
        "chain.state" = tracing::field::Empty,
    )
}

/// Start a span for one item's dispatch → callback → save cycle.
pub fn start_item_span(item: &ItemId, position: usize) -> Span {
    tracing::info_span!(
        "chain.item",
        "chain.item_id" = %item,
        "chain.position" = position,
    )
}

/// Record a state transition on the given run span.
///
/// Emits a tracing `info` event scoped to the span and stores the new state
/// in its `chain.state` field.
pub fn record_state_transition(span: &Span, from: &str, to: &str) {
    span.record("chain.state", to);
    span.in_scope(|| {
        tracing::info!(from = from, to = to, "state_transition");
    });
}
