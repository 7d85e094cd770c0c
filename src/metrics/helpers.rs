//! Metrics helper structs for convenient metric recording

use prometheus::{Encoder, TextEncoder};

use super::{
    ORPHANS_RECOVERED_TOTAL, ORPHAN_RECOVERY_FAILURES_TOTAL, QUEUE_INSTANCES_LIVE,
    QUEUE_OPEN_FAILURES_TOTAL, RECONCILER_SCAN_DURATION, RECONCILER_SWEEPS_TOTAL, RESPONSES_TOTAL,
};

/// Encode all metrics to Prometheus text format
pub fn encode_metrics() -> Result<String, prometheus::Error> {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();
    encoder.encode(&metric_families, &mut buffer)?;
    Ok(String::from_utf8(buffer).unwrap_or_default())
}

/// Helper struct for recording response metrics
pub struct ResponseMetrics;

impl ResponseMetrics {
    /// Record a response for an operation
    pub fn record(operation: &str, status: u16) {
        RESPONSES_TOTAL
            .with_label_values(&[operation, &status.to_string()])
            .inc();
    }
}

/// Helper struct for recording registry metrics
pub struct RegistryMetrics;

impl RegistryMetrics {
    pub fn instance_opened() {
        QUEUE_INSTANCES_LIVE.inc();
    }

    pub fn instance_closed() {
        QUEUE_INSTANCES_LIVE.dec();
    }

    pub fn open_failed() {
        QUEUE_OPEN_FAILURES_TOTAL.inc();
    }
}

/// Helper struct for recording orphan reconciler metrics
pub struct ReconcilerMetrics;

impl ReconcilerMetrics {
    /// Record a recovered orphan message under `policy`
    pub fn record_recovered(policy: &str) {
        ORPHANS_RECOVERED_TOTAL.with_label_values(&[policy]).inc();
    }

    pub fn record_failure() {
        ORPHAN_RECOVERY_FAILURES_TOTAL.inc();
    }

    pub fn record_sweep() {
        RECONCILER_SWEEPS_TOTAL.inc();
    }

    /// Record the duration of one queue scan in seconds
    pub fn record_scan_duration(seconds: f64) {
        RECONCILER_SCAN_DURATION.observe(seconds);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_response_metrics() {
        ResponseMetrics::record("take", 200);
        ResponseMetrics::record("take", 404);
        // Just verify no panics
    }

    #[test]
    fn test_reconciler_metrics() {
        ReconcilerMetrics::record_recovered("discard");
        ReconcilerMetrics::record_recovered("requeue");
        ReconcilerMetrics::record_failure();
        ReconcilerMetrics::record_sweep();
        ReconcilerMetrics::record_scan_duration(0.01);
        // Just verify no panics
    }

    #[test]
    fn test_encode_metrics() {
        ResponseMetrics::record("queue", 200);
        let output = encode_metrics().unwrap();
        assert!(output.contains("queue_server_responses_total"));
    }
}
