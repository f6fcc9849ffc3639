//! Metrics aggregation pipeline
//!
//! This module provides:
//! - Log batch envelope decoding (base64, gzip, JSON)
//! - Per-batch averaging of CPU and memory utilization
//! - Publishing the averaged datapoints to the metrics backend
//!
//! Every batch is handled independently with no shared mutable state,
//! so any number of invocations may run in parallel.

mod aggregator;
mod decoder;
mod publisher;


pub use aggregator::{
    parse_sample, MetricAggregator, SampleRejection, DIMENSION_CLUSTER, DIMENSION_CONTAINER,
    DIMENSION_SERVICE, METRIC_UNIT,
};
pub use decoder::{
    encode_payload, DecodedBatch, LogBatchDecoder, LogBatchEvent, PayloadEncoding, RawRecord,
};
pub use publisher::MetricPublisher;

use crate::backends::MetricsBackend;
use crate::error::ScalerError;
use crate::models::{AggregatedMetrics, InvocationResult, TargetConfig};
use crate::observability::{ScalerMetrics, StructuredLogger};
use std::sync::Arc;
use tracing::debug;

/// What happened to one log batch
#[derive(Debug, Clone, PartialEq)]
pub enum BatchOutcome {
    /// Both datapoints were accepted by the backend
    Published(AggregatedMetrics),
    /// Delivery probe with no records; nothing to publish
    Skipped,
    /// The batch could not be decoded or had no valid samples
    Rejected(ScalerError),
    /// Aggregation succeeded but the backend refused the datapoints
    PublishFailed {
        metrics: AggregatedMetrics,
        error: ScalerError,
    },
}

impl BatchOutcome {
    pub fn label(&self) -> &'static str {
        match self {
            BatchOutcome::Published(_) => "published",
            BatchOutcome::Skipped => "skipped",
            BatchOutcome::Rejected(_) => "rejected",
            BatchOutcome::PublishFailed { .. } => "publish_failed",
        }
    }

    /// Convert into the result handed back to the dispatcher
    pub fn to_result(&self) -> InvocationResult {
        match self {
            BatchOutcome::Published(m) => InvocationResult::success(format!(
                "Successfully processed {} log events (cpu avg {}, memory avg {}, {} skipped)",
                m.sample_count + m.skipped_count,
                m.cpu.value,
                m.memory.value,
                m.skipped_count
            )),
            BatchOutcome::Skipped => {
                InvocationResult::success("Control message acknowledged, nothing to publish")
            }
            BatchOutcome::Rejected(e) => InvocationResult::failure(format!("Batch rejected: {}", e)),
            BatchOutcome::PublishFailed { error, .. } => {
                InvocationResult::failure(format!("Batch aggregated but not published: {}", error))
            }
        }
    }
}

/// Decode, aggregate and publish one log batch per call
#[derive(Clone)]
pub struct MetricsPipeline {
    target: TargetConfig,
    decoder: LogBatchDecoder,
    aggregator: MetricAggregator,
    publisher: MetricPublisher,
    metrics: ScalerMetrics,
    logger: StructuredLogger,
}

impl MetricsPipeline {
    pub fn new(
        target: TargetConfig,
        backend: Arc<dyn MetricsBackend>,
        metrics: ScalerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        Self {
            aggregator: MetricAggregator::new(target.container_name.clone()),
            publisher: MetricPublisher::new(backend, metrics.clone()),
            decoder: LogBatchDecoder::new(),
            target,
            metrics,
            logger,
        }
    }

    pub fn with_decoder(mut self, decoder: LogBatchDecoder) -> Self {
        self.decoder = decoder;
        self
    }

    pub fn with_publisher(mut self, publisher: MetricPublisher) -> Self {
        self.publisher = publisher;
        self
    }

    /// Handle one log batch. Never panics and never returns an error:
    /// every failure is folded into the outcome.
    pub async fn handle(&self, event: &LogBatchEvent) -> BatchOutcome {
        let outcome = self.process(event).await;

        self.metrics.inc_batches(outcome.label());
        match &outcome {
            BatchOutcome::Published(m) => {
                self.metrics.inc_samples_skipped(m.skipped_count as u64);
                self.logger.log_batch_published(
                    &self.target.namespace,
                    m.sample_count,
                    m.skipped_count,
                    m.cpu.value,
                    m.memory.value,
                );
            }
            BatchOutcome::Skipped => {}
            BatchOutcome::Rejected(error) => {
                if let ScalerError::EmptyBatch { skipped } = error {
                    self.metrics.inc_samples_skipped(*skipped as u64);
                }
                self.logger.log_batch_rejected(error);
            }
            BatchOutcome::PublishFailed { metrics, error } => {
                self.metrics.inc_samples_skipped(metrics.skipped_count as u64);
                self.logger.log_publish_failed(&self.target.namespace, error);
            }
        }

        outcome
    }

    async fn process(&self, event: &LogBatchEvent) -> BatchOutcome {
        let batch = match self.decoder.decode(event) {
            Ok(batch) => batch,
            Err(e) => return BatchOutcome::Rejected(e),
        };

        debug!(
            log_group = batch.log_group.as_deref().unwrap_or("-"),
            log_stream = batch.log_stream.as_deref().unwrap_or("-"),
            records = batch.len(),
            control = batch.control,
            "Decoded log batch"
        );

        if batch.control {
            return BatchOutcome::Skipped;
        }

        let aggregated = match self.aggregator.aggregate(batch.records()) {
            Ok(aggregated) => aggregated,
            Err(e) => return BatchOutcome::Rejected(e),
        };

        match self
            .publisher
            .publish(&aggregated, &self.target.namespace)
            .await
        {
            Ok(()) => BatchOutcome::Published(aggregated),
            Err(error) => BatchOutcome::PublishFailed {
                metrics: aggregated,
                error,
            },
        }
    }
}
