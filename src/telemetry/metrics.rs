//! Metric instrument factories for jobchain.
//!
//! Uses the OTel Meter API with the globally-registered `MeterProvider`.
//! All instruments are created lazily from the `"jobchain"` meter.

use opentelemetry::metrics::{Counter, Histogram, Meter};

/// Returns the shared meter for jobchain instruments.
fn meter() -> Meter {
    opentelemetry::global::meter("jobchain")
}

/// Counter: chain submissions.
/// Labels: `chain`, `result` ("ok" | "invalid" | "error").
pub fn runs_submitted() -> Counter<u64> {
    meter()
        .u64_counter("chain.runs.submitted")
        .with_description("Number of chain submissions")
        .build()
}

/// Counter: runs reaching a terminal state.
/// Labels: `chain`, `state` ("completed" | "aborted" | "superseded").
pub fn runs_finished() -> Counter<u64> {
    meter()
        .u64_counter("chain.runs.finished")
        .with_description("Number of chain runs that reached a terminal state")
        .build()
}

/// Counter: items popped off a queue and handed to the calculator.
/// Labels: `chain`.
pub fn items_dispatched() -> Counter<u64> {
    meter()
        .u64_counter("chain.items.dispatched")
        .with_description("Number of work items dispatched")
        .build()
}

/// Counter: calculated results saved.
/// Labels: `chain`.
pub fn items_saved() -> Counter<u64> {
    meter()
        .u64_counter("chain.items.saved")
        .with_description("Number of calculated results saved")
        .build()
}

/// Counter: per-item failures.
/// Labels: `chain`, `kind` (see `Error::kind`), `policy`.
pub fn items_failed() -> Counter<u64> {
    meter()
        .u64_counter("chain.items.failed")
        .with_description("Number of work items that failed")
        .build()
}

/// Counter: queue store operations (replace, pop, abort, delete).
/// Labels: `chain`, `operation`.
pub fn queue_operations() -> Counter<u64> {
    meter()
        .u64_counter("chain.queue.operations")
        .with_description("Number of queue store operations")
        .build()
}

/// Histogram: operation duration in milliseconds.
/// Labels: `operation`.
pub fn operation_duration_ms() -> Histogram<f64> {
    meter()
        .f64_histogram("chain.operation.duration_ms")
        .with_description("Operation duration in milliseconds")
        .with_unit("ms")
        .build()
}
