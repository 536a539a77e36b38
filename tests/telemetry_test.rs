//! Integration tests for telemetry initialization and span helpers.

use jobchain::model::{ItemId, RunId};

#[test]
fn telemetry_initializes_without_endpoint() {
    // Note: tracing subscriber can only be set once per process.
    let config = jobchain::telemetry::TelemetryConfig {
        endpoint: None,
        service_name: "jobchain-test".to_string(),
        default_filter: "debug".to_string(),
    };
    // Err here means another test already installed a subscriber.
    let _guard = jobchain::telemetry::init_telemetry(config);
}

#[test]
fn run_span_creates_and_records_transition() {
    let span = jobchain::telemetry::chain::start_run_span("pricing", RunId::new(), 3);
    jobchain::telemetry::chain::record_state_transition(&span, "queue_loaded", "dispatching");
}

#[test]
fn item_span_creates() {
    let item = ItemId::from("Q-0001");
    let span = jobchain::telemetry::chain::start_item_span(&item, 1);
    let _entered = span.enter();
}

#[test]
fn metric_instruments_record_without_a_provider() {
    use opentelemetry::KeyValue;

    jobchain::telemetry::metrics::items_saved().add(1, &[KeyValue::new("chain", "test")]);
    jobchain::telemetry::metrics::operation_duration_ms()
        .record(12.0, &[KeyValue::new("operation", "chain.save")]);
}
