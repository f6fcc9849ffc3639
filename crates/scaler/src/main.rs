//! Resource Scaler - closed-loop memory scaling for a container service
//!
//! Receives utilization log batches and alarm notifications over HTTP,
//! republishes averaged metrics and grows the service's task definition
//! when its alarm fires.

use anyhow::{Context, Result};
use resource_scaler::{api, config::ScalerConfig};
use scaler_lib::{
    health::HealthRegistry,
    observability::{ScalerMetrics, StructuredLogger},
};
use std::sync::Arc;
use tracing::{error, info};
use tracing_subscriber::{fmt, prelude::*, EnvFilter};

const SCALER_VERSION: &str = env!("CARGO_PKG_VERSION");

#[tokio::main]
async fn main() -> Result<()> {
    tracing_subscriber::registry()
        .with(EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")))
        .with(fmt::layer().json())
        .init();

    info!("Starting resource-scaler");

    let config = ScalerConfig::load().context("failed to load configuration")?;
    info!(
        cluster = %config.cluster_name,
        service = %config.service_name,
        container = %config.container_name,
        family = %config.family,
        backend = config.backend.as_str(),
        "Scaler configured"
    );

    let health_registry = HealthRegistry::with_scaler_components().await;
    let metrics = ScalerMetrics::new();
    let logger = StructuredLogger::new(&config.cluster_name, &config.service_name);
    logger.log_startup(SCALER_VERSION, config.backend.as_str());

    let backends = config.backends()?;
    let app_state = Arc::new(api::AppState::from_config(
        &config,
        backends,
        health_registry.clone(),
        metrics,
        logger.clone(),
    ));

    health_registry.set_ready(true).await;

    let shutdown_logger = logger.clone();
    let shutdown = async move {
        if let Err(e) = tokio::signal::ctrl_c().await {
            error!(error = %e, "Failed to listen for shutdown signal");
        }
        shutdown_logger.log_shutdown("SIGINT received");
    };

    api::serve(config.api_port, app_state, shutdown).await?;
    info!("Shutting down");

    Ok(())
}
