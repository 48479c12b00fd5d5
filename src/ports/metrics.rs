//! AdapterMetrics port - latency and outcome of cross-node requests.

use std::time::Duration;

use crate::domain::{AppId, RequestOutcome, RequestType};

/// Sink notified once per finished cross-node request.
pub trait AdapterMetrics: Send + Sync {
    fn record_request(
        &self,
        app_id: &AppId,
        request_type: RequestType,
        elapsed: Duration,
        outcome: RequestOutcome,
    );
}

/// Discards every measurement.
#[derive(Debug, Default, Clone, Copy)]
pub struct NoopMetrics;

impl AdapterMetrics for NoopMetrics {
    fn record_request(&self, _: &AppId, _: RequestType, _: Duration, _: RequestOutcome) {}
}

/// Emits each measurement as a `tracing` event.
#[derive(Debug, Default, Clone, Copy)]
pub struct TracingMetrics;

impl AdapterMetrics for TracingMetrics {
    fn record_request(
        &self,
        app_id: &AppId,
        request_type: RequestType,
        elapsed: Duration,
        outcome: RequestOutcome,
    ) {
        tracing::debug!(
            app_id = %app_id,
            request_type = %request_type,
            elapsed_ms = elapsed.as_millis() as u64,
            outcome = ?outcome,
            "horizontal request finished"
        );
    }
}
