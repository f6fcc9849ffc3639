//! HTTP API: invocation endpoints, health checks and Prometheus metrics
//!
//! Every POST is one independent invocation. Nothing is queued: the
//! response carries the invocation result.

use crate::config::ScalerConfig;
use axum::{
    extract::State,
    http::StatusCode,
    response::IntoResponse,
    routing::{get, post},
    Json, Router,
};
use prometheus::{Encoder, TextEncoder};
use scaler_lib::{
    backends::Backends,
    controller::{ScalingController, ScalingOutcome, ScalingReport, ScalingState},
    health::{ComponentStatus, HealthRegistry},
    models::TargetConfig,
    observability::{ScalerMetrics, StructuredLogger},
    pipeline::{BatchOutcome, LogBatchDecoder, LogBatchEvent, MetricPublisher, MetricsPipeline},
};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{error, info};

/// Shared application state
#[derive(Clone)]
pub struct AppState {
    pub target: TargetConfig,
    pub pipeline: MetricsPipeline,
    pub controller: ScalingController,
    pub health_registry: HealthRegistry,
}

impl AppState {
    pub fn new(
        target: TargetConfig,
        pipeline: MetricsPipeline,
        controller: ScalingController,
        health_registry: HealthRegistry,
    ) -> Self {
        Self {
            target,
            pipeline,
            controller,
            health_registry,
        }
    }

    /// Wire the pipeline and controller from configuration
    pub fn from_config(
        config: &ScalerConfig,
        backends: Backends,
        health_registry: HealthRegistry,
        metrics: ScalerMetrics,
        logger: StructuredLogger,
    ) -> Self {
        let target = config.target();

        let mut decoder = LogBatchDecoder::new();
        if let Some(limit) = config.max_decompressed_bytes {
            decoder = decoder.with_max_decompressed_bytes(limit);
        }
        let publisher = MetricPublisher::new(backends.metrics.clone(), metrics.clone())
            .with_timeout(config.publish_timeout());
        let pipeline = MetricsPipeline::new(
            target.clone(),
            backends.metrics.clone(),
            metrics.clone(),
            logger.clone(),
        )
        .with_decoder(decoder)
        .with_publisher(publisher);

        let controller = ScalingController::new(backends, metrics, logger)
            .with_policy(config.scaling.clone())
            .with_alarm_policy(config.alarm)
            .with_retry(config.retry.policy());

        Self::new(target, pipeline, controller, health_registry)
    }
}

/// Response to a log batch invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub success: bool,
    pub summary: String,
    pub outcome: String,
}

/// Response to an alarm notification invocation
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingResponse {
    pub success: bool,
    pub summary: String,
    pub outcome: String,
    pub transitions: Vec<ScalingState>,
}

fn batch_status(outcome: &BatchOutcome) -> StatusCode {
    match outcome {
        BatchOutcome::Published(_) | BatchOutcome::Skipped => StatusCode::OK,
        BatchOutcome::Rejected(_) => StatusCode::UNPROCESSABLE_ENTITY,
        BatchOutcome::PublishFailed { .. } => StatusCode::BAD_GATEWAY,
    }
}

fn scaling_status(report: &ScalingReport) -> StatusCode {
    match &report.outcome {
        // The notification itself was unusable
        ScalingOutcome::Failed {
            state: ScalingState::Idle,
            ..
        } => StatusCode::UNPROCESSABLE_ENTITY,
        _ if report.to_result().success => StatusCode::OK,
        _ => StatusCode::BAD_GATEWAY,
    }
}

async fn log_batches(
    State(state): State<Arc<AppState>>,
    Json(event): Json<LogBatchEvent>,
) -> impl IntoResponse {
    let outcome = state.pipeline.handle(&event).await;
    state.health_registry.record_batch(&outcome).await;

    let result = outcome.to_result();
    (
        batch_status(&outcome),
        Json(BatchResponse {
            success: result.success,
            summary: result.summary,
            outcome: outcome.label().to_string(),
        }),
    )
}

async fn alarm_notifications(State(state): State<Arc<AppState>>, body: String) -> impl IntoResponse {
    let report = state
        .controller
        .handle_notification(&body, &state.target)
        .await;
    state.health_registry.record_scaling(&report).await;

    let result = report.to_result();
    (
        scaling_status(&report),
        Json(ScalingResponse {
            success: result.success,
            summary: result.summary,
            outcome: report.label().to_string(),
            transitions: report.transitions,
        }),
    )
}

/// 200 while operational (healthy or degraded), 503 when unhealthy
async fn healthz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let health = state.health_registry.health().await;

    let status_code = match health.status {
        ComponentStatus::Healthy | ComponentStatus::Degraded => StatusCode::OK,
        ComponentStatus::Unhealthy => StatusCode::SERVICE_UNAVAILABLE,
    };

    (status_code, Json(health))
}

async fn readyz(State(state): State<Arc<AppState>>) -> impl IntoResponse {
    let readiness = state.health_registry.readiness().await;

    let status_code = if readiness.ready {
        StatusCode::OK
    } else {
        StatusCode::SERVICE_UNAVAILABLE
    };

    (status_code, Json(readiness))
}

async fn metrics() -> impl IntoResponse {
    let encoder = TextEncoder::new();
    let metric_families = prometheus::gather();
    let mut buffer = Vec::new();

    if let Err(e) = encoder.encode(&metric_families, &mut buffer) {
        error!(error = %e, "Failed to encode metrics");
        return (
            StatusCode::INTERNAL_SERVER_ERROR,
            [("content-type", "text/plain; charset=utf-8")],
            Vec::new(),
        );
    }

    (
        StatusCode::OK,
        [("content-type", "text/plain; charset=utf-8")],
        buffer,
    )
}

pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/v1/log-batches", post(log_batches))
        .route("/v1/alarm-notifications", post(alarm_notifications))
        .route("/healthz", get(healthz))
        .route("/readyz", get(readyz))
        .route("/metrics", get(metrics))
        .with_state(state)
}

/// Serve until `shutdown` resolves
pub async fn serve<F>(port: u16, state: Arc<AppState>, shutdown: F) -> anyhow::Result<()>
where
    F: std::future::Future<Output = ()> + Send + 'static,
{
    let app = create_router(state);

    let addr = format!("0.0.0.0:{}", port);
    info!(addr = %addr, "Starting API server");

    let listener = tokio::net::TcpListener::bind(&addr).await?;
    axum::serve(listener, app)
        .with_graceful_shutdown(shutdown)
        .await?;

    Ok(())
}
