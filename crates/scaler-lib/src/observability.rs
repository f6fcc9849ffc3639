//! Observability infrastructure for the resource scaler
//!
//! Provides:
//! - Prometheus metrics (batch outcomes, publish latency, scaling cycles, retries)
//! - Structured JSON logging with tracing

use crate::error::ScalerError;
use prometheus::{
    register_histogram, register_int_counter, register_int_counter_vec, register_int_gauge,
    Histogram, IntCounter, IntCounterVec, IntGauge,
};
use std::sync::OnceLock;
use tracing::{info, warn};

/// Histogram buckets for backend call latency (in seconds)
const LATENCY_BUCKETS: &[f64] = &[
    0.005, 0.01, 0.025, 0.05, 0.1, 0.25, 0.5, 1.0, 2.5, 5.0, 10.0,
];

/// Global metrics instance (registered once)
static GLOBAL_METRICS: OnceLock<ScalerMetricsInner> = OnceLock::new();

struct ScalerMetricsInner {
    batches_total: IntCounterVec,
    samples_skipped_total: IntCounter,
    publish_latency_seconds: Histogram,
    scaling_cycles_total: IntCounterVec,
    external_call_retries_total: IntCounterVec,
    alarm_patch_failures_total: IntCounter,
    active_revision: IntGauge,
}

impl ScalerMetricsInner {
    fn new() -> Self {
        Self {
            batches_total: register_int_counter_vec!(
                "resource_scaler_batches_total",
                "Log batches handled, by outcome",
                &["outcome"]
            )
            .expect("Failed to register batches_total"),

            samples_skipped_total: register_int_counter!(
                "resource_scaler_samples_skipped_total",
                "Log records dropped by field validation"
            )
            .expect("Failed to register samples_skipped_total"),

            publish_latency_seconds: register_histogram!(
                "resource_scaler_publish_latency_seconds",
                "Time spent publishing datapoints to the metrics backend",
                LATENCY_BUCKETS.to_vec()
            )
            .expect("Failed to register publish_latency_seconds"),

            scaling_cycles_total: register_int_counter_vec!(
                "resource_scaler_scaling_cycles_total",
                "Scaling cycles run, by outcome",
                &["outcome"]
            )
            .expect("Failed to register scaling_cycles_total"),

            external_call_retries_total: register_int_counter_vec!(
                "resource_scaler_external_call_retries_total",
                "Retries of external store calls after transient failures",
                &["operation"]
            )
            .expect("Failed to register external_call_retries_total"),

            alarm_patch_failures_total: register_int_counter!(
                "resource_scaler_alarm_patch_failures_total",
                "Alarm threshold updates that failed after a successful rebind"
            )
            .expect("Failed to register alarm_patch_failures_total"),

            active_revision: register_int_gauge!(
                "resource_scaler_active_revision",
                "Last allocation revision the controller bound the service to"
            )
            .expect("Failed to register active_revision"),
        }
    }
}

/// Scaler metrics for Prometheus exposition
///
/// Lightweight handle to the global metrics instance; clones share the
/// same underlying metrics.
#[derive(Clone)]
pub struct ScalerMetrics {
    _private: (),
}

impl Default for ScalerMetrics {
    fn default() -> Self {
        Self::new()
    }
}

impl ScalerMetrics {
    pub fn new() -> Self {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new);
        Self { _private: () }
    }

    fn inner(&self) -> &ScalerMetricsInner {
        GLOBAL_METRICS.get_or_init(ScalerMetricsInner::new)
    }

    pub fn inc_batches(&self, outcome: &str) {
        self.inner()
            .batches_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_samples_skipped(&self, count: u64) {
        self.inner().samples_skipped_total.inc_by(count);
    }

    pub fn observe_publish_latency(&self, duration_secs: f64) {
        self.inner().publish_latency_seconds.observe(duration_secs);
    }

    pub fn inc_scaling_cycles(&self, outcome: &str) {
        self.inner()
            .scaling_cycles_total
            .with_label_values(&[outcome])
            .inc();
    }

    pub fn inc_retries(&self, operation: &str) {
        self.inner()
            .external_call_retries_total
            .with_label_values(&[operation])
            .inc();
    }

    pub fn inc_alarm_patch_failures(&self) {
        self.inner().alarm_patch_failures_total.inc();
    }

    pub fn set_active_revision(&self, revision: u32) {
        self.inner().active_revision.set(i64::from(revision));
    }

    /// Current value of a batch outcome counter
    pub fn batches(&self, outcome: &str) -> u64 {
        self.inner()
            .batches_total
            .with_label_values(&[outcome])
            .get()
    }

    /// Current value of a scaling outcome counter
    pub fn scaling_cycles(&self, outcome: &str) -> u64 {
        self.inner()
            .scaling_cycles_total
            .with_label_values(&[outcome])
            .get()
    }
}

/// Structured logger for scaler events
///
/// Emits one JSON event per lifecycle point, tagged with the target
/// service so log queries can follow one service across invocations.
#[derive(Clone)]
pub struct StructuredLogger {
    cluster: String,
    service: String,
}

impl StructuredLogger {
    pub fn new(cluster: impl Into<String>, service: impl Into<String>) -> Self {
        Self {
            cluster: cluster.into(),
            service: service.into(),
        }
    }

    pub fn log_startup(&self, version: &str, backend: &str) {
        info!(
            event = "scaler_started",
            cluster = %self.cluster,
            service = %self.service,
            version = %version,
            backend = %backend,
            "Resource scaler started"
        );
    }

    pub fn log_shutdown(&self, reason: &str) {
        info!(
            event = "scaler_shutdown",
            cluster = %self.cluster,
            service = %self.service,
            reason = %reason,
            "Resource scaler shutting down"
        );
    }

    pub fn log_batch_published(
        &self,
        namespace: &str,
        samples: usize,
        skipped: usize,
        cpu_avg: f64,
        memory_avg: f64,
    ) {
        info!(
            event = "batch_published",
            cluster = %self.cluster,
            service = %self.service,
            namespace = %namespace,
            samples = samples,
            skipped = skipped,
            cpu_avg = cpu_avg,
            memory_avg = memory_avg,
            "Calculated and published average cpu and memory"
        );
    }

    pub fn log_batch_rejected(&self, error: &ScalerError) {
        warn!(
            event = "batch_rejected",
            cluster = %self.cluster,
            service = %self.service,
            kind = error.kind(),
            error = %error,
            "Log batch rejected"
        );
    }

    pub fn log_publish_failed(&self, namespace: &str, error: &ScalerError) {
        warn!(
            event = "publish_failed",
            cluster = %self.cluster,
            service = %self.service,
            namespace = %namespace,
            error = %error,
            "Failed to put metrics to the metrics backend"
        );
    }

    pub fn log_scaling_transition(&self, family: &str, from: &str, to: &str) {
        info!(
            event = "scaling_transition",
            cluster = %self.cluster,
            service = %self.service,
            family = %family,
            from = %from,
            to = %to,
            "Scaling state transition"
        );
    }

    pub fn log_scaling_completed(&self, family: &str, outcome: &str, summary: &str) {
        info!(
            event = "scaling_completed",
            cluster = %self.cluster,
            service = %self.service,
            family = %family,
            outcome = %outcome,
            summary = %summary,
            "Scaling cycle completed"
        );
    }

    pub fn log_scaling_failed(&self, family: &str, state: &str, error: &ScalerError) {
        warn!(
            event = "scaling_failed",
            cluster = %self.cluster,
            service = %self.service,
            family = %family,
            state = %state,
            kind = error.kind(),
            error = %error,
            "Scaling cycle failed"
        );
    }
}
