//! # jobchain
//!
//! Serial job chains over an asynchronous, callback-based calculator.
//!
//! A submission of up to [`model::MAX_CHAIN_LEN`] item IDs is persisted as a
//! queue; [`engine::ChainScheduler`] dispatches one item at a time, waits for
//! the calculator's callback, saves the result and only then dispatches the
//! next. Postgres (sqlx) backs the queue and item payloads, an external hook
//! command does the calculation, and OpenTelemetry carries the signals.

pub mod calculator;
pub mod config;
pub mod db;
pub mod engine;
pub mod error;
pub mod model;
pub mod store;
pub mod telemetry;
