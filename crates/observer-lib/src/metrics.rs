//! Prometheus instrumentation for the reconcilers.

use prometheus::{
    register_histogram_vec, register_int_counter_vec, register_int_gauge_vec, HistogramVec,
    IntCounterVec, IntGaugeVec,
};
use std::sync::OnceLock;

/// Reconcile attempts span a usage query plus a database insert.
const LATENCY_BUCKETS: &[f64] = &[
    0.001, 0.0025, 0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ObserverMetricsInner> = OnceLock::new();

struct ObserverMetricsInner {
    reconcile_success: IntCounterVec,
    reconcile_failures: IntCounterVec,
    reconcile_skips: IntCounterVec,
    reconcile_retries: IntCounterVec,
    queue_depth: IntGaugeVec,
    reconcile_latency_seconds: HistogramVec,
}

impl ObserverMetricsInner {
    fn new() -> Self {
        Self {
            reconcile_success: register_int_counter_vec!(
                "cost_observer_reconcile_success_total",
                "Reconciliations that persisted a record",
                &["reconciler"]
            )
            .expect("Failed to register reconcile_success_total"),

            reconcile_failures: register_int_counter_vec!(
                "cost_observer_reconcile_failures_total",
                "Reconciliations that ended in an error",
                &["reconciler"]
            )
            .expect("Failed to register reconcile_failures_total"),

            reconcile_skips: register_int_counter_vec!(
                "cost_observer_reconcile_skips_total",
                "Reconciliations dropped because the object was gone or not qualifying",
                &["reconciler"]
            )
            .expect("Failed to register reconcile_skips_total"),

            reconcile_retries: register_int_counter_vec!(
                "cost_observer_reconcile_retries_total",
                "Keys re-queued with backoff after a retryable failure",
                &["reconciler"]
            )
            .expect("Failed to register reconcile_retries_total"),

            queue_depth: register_int_gauge_vec!(
                "cost_observer_queue_depth",
                "Keys waiting in the dedup queue",
                &["reconciler"]
            )
            .expect("Failed to register queue_depth"),

            reconcile_latency_seconds: register_histogram_vec!(
                "cost_observer_reconcile_latency_seconds",
                "Wall time of one reconciliation attempt",
                &["reconciler"],
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register reconcile_latency_seconds"),
        }
    }
}

/// Lightweight handle to the global metrics instance. Clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ObserverMetrics {
    _private: (),
}

impl Default for ObserverMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ObserverMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ObserverMetricsInner::new);
        Self { _private: () }
    }

    fn inner() -> &'static ObserverMetricsInner {
        GLOBAL_METRICS.get_or_init(ObserverMetricsInner::new)
    }

    pub fn observe_success(&self, reconciler: &str) {
        Self::inner()
            .reconcile_success
            .with_label_values(&[reconciler])
            .inc();
    }

    pub fn observe_failure(&self, reconciler: &str) {
        Self::inner()
            .reconcile_failures
            .with_label_values(&[reconciler])
            .inc();
    }

    pub fn observe_skip(&self, reconciler: &str) {
        Self::inner()
            .reconcile_skips
            .with_label_values(&[reconciler])
            .inc();
    }

    pub fn observe_retry(&self, reconciler: &str) {
        Self::inner()
            .reconcile_retries
            .with_label_values(&[reconciler])
            .inc();
    }

    pub fn set_queue_depth(&self, reconciler: &str, depth: i64) {
        Self::inner()
            .queue_depth
            .with_label_values(&[reconciler])
            .set(depth);
    }

    pub fn observe_latency(&self, reconciler: &str, seconds: f64) {
        Self::inner()
            .reconcile_latency_seconds
            .with_label_values(&[reconciler])
            .observe(seconds);
    }
}
