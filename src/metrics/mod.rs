//! Prometheus metrics for the queue server.
//!
//! - Response metrics (responses by operation and status)
//! - Registry metrics (live queue instances)
//! - Orphan reconciler metrics (recoveries, failures, sweep timing)

mod helpers;

pub use helpers::{encode_metrics, ReconcilerMetrics, RegistryMetrics, ResponseMetrics};

use lazy_static::lazy_static;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};

/// Prefix for all metrics
const METRIC_PREFIX: &str = "queue_server";

lazy_static! {
    // ============================================================================
    // Response Metrics
    // ============================================================================

    /// Responses by operation and status classification
    pub static ref RESPONSES_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_responses_total", METRIC_PREFIX),
        "Total responses by operation and status",
        &["operation", "status"]
    ).unwrap();

    // ============================================================================
    // Registry Metrics
    // ============================================================================

    /// Queue instances currently held by the registry
    pub static ref QUEUE_INSTANCES_LIVE: IntGauge = register_int_gauge!(
        format!("{}_queue_instances_live", METRIC_PREFIX),
        "Number of open queue instances"
    ).unwrap();

    /// Queue instance constructions that failed
    pub static ref QUEUE_OPEN_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_queue_open_failures_total", METRIC_PREFIX),
        "Total failed queue instance constructions"
    ).unwrap();

    // ============================================================================
    // Orphan Reconciler Metrics
    // ============================================================================

    /// Orphan messages recovered, by policy
    pub static ref ORPHANS_RECOVERED_TOTAL: IntCounterVec = register_int_counter_vec!(
        format!("{}_orphans_recovered_total", METRIC_PREFIX),
        "Total orphan messages recovered",
        &["policy"]
    ).unwrap();

    /// Orphan messages whose recovery failed
    pub static ref ORPHAN_RECOVERY_FAILURES_TOTAL: IntCounter = register_int_counter!(
        format!("{}_orphan_recovery_failures_total", METRIC_PREFIX),
        "Total failed orphan message recoveries"
    ).unwrap();

    /// Completed reconciler sweeps
    pub static ref RECONCILER_SWEEPS_TOTAL: IntCounter = register_int_counter!(
        format!("{}_reconciler_sweeps_total", METRIC_PREFIX),
        "Total orphan reconciler sweeps"
    ).unwrap();

    /// Duration of a single queue scan
    pub static ref RECONCILER_SCAN_DURATION: Histogram = register_histogram!(
        format!("{}_reconciler_scan_duration_seconds", METRIC_PREFIX),
        "Duration of a single queue orphan scan in seconds",
        vec![0.001, 0.005, 0.01, 0.05, 0.1, 0.5, 1.0, 5.0]
    ).unwrap();
}
