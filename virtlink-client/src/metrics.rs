//! OpenTelemetry instruments for client activity.
//!
//! Recorded through the global meter provider; without an installed SDK the
//! instruments are no-ops, so attaching metrics is safe in every deployment.
//! Attach via `JsonRpcClient::with_metrics`: the facade records submissions
//! and inbound notifications, the connection driver keeps the state gauge,
//! and the tracker counts retries and timeouts.

use opentelemetry::{
    global,
    metrics::{Counter, Gauge, Histogram, Meter},
    InstrumentationScope, KeyValue,
};

/// Instruments describing one client's traffic.
pub struct ClientMetrics {
    /// Connection state (0=closed, 1=initializing, 2=open).
    pub connection_state: Gauge<i64>,
    /// Requests submitted, labelled by method.
    pub requests_total: Counter<u64>,
    /// Batch sizes, in requests per batch.
    pub batch_size: Histogram<u64>,
    /// Retry re-sends, labelled by method.
    pub retries_total: Counter<u64>,
    /// Calls that exhausted their retry budget, labelled by method.
    pub timeouts_total: Counter<u64>,
    /// Notifications received from the peer, labelled by method.
    pub notifications_received: Counter<u64>,
    /// Synchronous submission failures, labelled by kind.
    pub errors_total: Counter<u64>,
}

impl ClientMetrics {
    /// Gauge value for a closed connection.
    pub const STATE_CLOSED: i64 = 0;
    /// Gauge value while the transport handshake runs.
    pub const STATE_INITIALIZING: i64 = 1;
    /// Gauge value for an open connection.
    pub const STATE_OPEN: i64 = 2;

    pub fn new(service_name: impl Into<String>) -> Self {
        let scope = InstrumentationScope::builder(service_name.into()).build();
        let meter = global::meter_with_scope(scope);
        Self::new_with_meter(&meter)
    }

    pub fn new_with_meter(meter: &Meter) -> Self {
        Self {
            connection_state: meter
                .i64_gauge("virtlink.client.connection.state")
                .with_description("Connection state (0=closed, 1=initializing, 2=open)")
                .build(),
            requests_total: meter
                .u64_counter("virtlink.client.requests.total")
                .with_description("Requests submitted")
                .build(),
            batch_size: meter
                .u64_histogram("virtlink.client.batch.size")
                .with_description("Requests per batch submission")
                .build(),
            retries_total: meter
                .u64_counter("virtlink.client.retries.total")
                .with_description("Retry re-sends")
                .build(),
            timeouts_total: meter
                .u64_counter("virtlink.client.timeouts.total")
                .with_description("Calls that exhausted their retry budget")
                .build(),
            notifications_received: meter
                .u64_counter("virtlink.client.notifications.received")
                .with_description("Notifications received from the peer")
                .build(),
            errors_total: meter
                .u64_counter("virtlink.client.errors.total")
                .with_description("Synchronous submission failures")
                .build(),
        }
    }

    pub fn update_connection_state(&self, state: i64) {
        self.connection_state.record(state, &[]);
    }

    pub fn record_request(&self, method: &str) {
        self.requests_total
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_batch(&self, size: u64) {
        self.batch_size.record(size, &[]);
    }

    pub fn record_retry(&self, method: &str) {
        self.retries_total
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_timeout(&self, method: &str) {
        self.timeouts_total
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_notification(&self, method: &str) {
        self.notifications_received
            .add(1, &[KeyValue::new("method", method.to_string())]);
    }

    pub fn record_error(&self, kind: &str) {
        self.errors_total
            .add(1, &[KeyValue::new("kind", kind.to_string())]);
    }
}
