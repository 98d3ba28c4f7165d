//! Telemetry collaborator.
//!
//! One usage event is recorded per evaluated assertion. Recording is
//! fire-and-forget: a sink failure must never change a grading outcome.

use serde_json::Value;

/// Event sink for assertion usage. Implementations must not panic.
pub trait Telemetry: Send + Sync {
    fn record(&self, event: &str, payload: &Value);
}

/// Discards every event.
#[derive(Debug, Default, Clone)]
pub struct NoopTelemetry;

impl Telemetry for NoopTelemetry {
    fn record(&self, _event: &str, _payload: &Value) {}
}

/// Emits events as `tracing` debug records.
#[derive(Debug, Default, Clone)]
pub struct TracingTelemetry;

impl Telemetry for TracingTelemetry {
    fn record(&self, event: &str, payload: &Value) {
        tracing::debug!(event, %payload, "telemetry");
    }
}
