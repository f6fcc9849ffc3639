//! Publishing aggregated datapoints to the metrics backend

use crate::backends::MetricsBackend;
use crate::error::{ScalerError, ScalerResult};
use crate::models::AggregatedMetrics;
use crate::observability::ScalerMetrics;
use std::sync::Arc;
use std::time::{Duration, Instant};
use tracing::{debug, warn};

/// Sends one batch's CPU and memory datapoints in a single request.
///
/// Failures are returned, never retried here; retrying is the backend
/// client's concern.
#[derive(Clone)]
pub struct MetricPublisher {
    backend: Arc<dyn MetricsBackend>,
    metrics: ScalerMetrics,
    timeout: Duration,
}

impl MetricPublisher {
    pub fn new(backend: Arc<dyn MetricsBackend>, metrics: ScalerMetrics) -> Self {
        Self {
            backend,
            metrics,
            timeout: Duration::from_secs(10),
        }
    }

    pub fn with_timeout(mut self, timeout: Duration) -> Self {
        self.timeout = timeout;
        self
    }

    pub async fn publish(&self, aggregated: &AggregatedMetrics, namespace: &str) -> ScalerResult<()> {
        let datapoints = [aggregated.cpu.clone(), aggregated.memory.clone()];
        let start = Instant::now();

        let result = match tokio::time::timeout(
            self.timeout,
            self.backend.publish(namespace, &datapoints),
        )
        .await
        {
            Ok(result) => result,
            Err(_) => Err(ScalerError::Publish(format!(
                "metrics backend did not respond within {}ms",
                self.timeout.as_millis()
            ))),
        };

        self.metrics
            .observe_publish_latency(start.elapsed().as_secs_f64());

        match result {
            Ok(()) => {
                debug!(namespace = %namespace, "Published CPU and memory datapoints");
                Ok(())
            }
            // Both datapoints travel in one request, so they fail together
            Err(e) => {
                warn!(namespace = %namespace, error = %e, "Failed to publish datapoints");
                Err(match e {
                    ScalerError::Publish(_) => e,
                    other => ScalerError::Publish(other.to_string()),
                })
            }
        }
    }
}
