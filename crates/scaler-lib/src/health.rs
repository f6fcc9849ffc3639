//! Component health for liveness and readiness probes
//!
//! Each invocation's outcome feeds back into the registry: publish
//! failures degrade the metrics backend, failed scaling cycles degrade
//! the controller, and the next success restores them.

use crate::controller::{AlarmUpdate, ScalingOutcome, ScalingReport};
use crate::pipeline::BatchOutcome;
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ComponentStatus {
    Healthy,
    /// Last operation failed but the component still accepts work
    Degraded,
    Unhealthy,
}

impl ComponentStatus {
    pub fn is_operational(&self) -> bool {
        !matches!(self, ComponentStatus::Unhealthy)
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ComponentHealth {
    pub status: ComponentStatus,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message: Option<String>,
    /// Unix seconds of the last status change
    pub updated_at: i64,
}

impl ComponentHealth {
    fn with_status(status: ComponentStatus, message: Option<String>) -> Self {
        Self {
            status,
            message,
            updated_at: chrono::Utc::now().timestamp(),
        }
    }

    pub fn healthy() -> Self {
        Self::with_status(ComponentStatus::Healthy, None)
    }

    pub fn degraded(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Degraded, Some(message.into()))
    }

    pub fn unhealthy(message: impl Into<String>) -> Self {
        Self::with_status(ComponentStatus::Unhealthy, Some(message.into()))
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: ComponentStatus,
    pub components: HashMap<String, ComponentHealth>,
}

impl HealthResponse {
    /// Worst status across all components
    pub fn overall(components: &HashMap<String, ComponentHealth>) -> ComponentStatus {
        components
            .values()
            .map(|c| c.status)
            .fold(ComponentStatus::Healthy, |worst, s| match (worst, s) {
                (ComponentStatus::Unhealthy, _) | (_, ComponentStatus::Unhealthy) => {
                    ComponentStatus::Unhealthy
                }
                (ComponentStatus::Degraded, _) | (_, ComponentStatus::Degraded) => {
                    ComponentStatus::Degraded
                }
                _ => ComponentStatus::Healthy,
            })
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ReadinessResponse {
    pub ready: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
}

pub mod components {
    pub const PIPELINE: &str = "pipeline";
    pub const CONTROLLER: &str = "controller";
    pub const ALLOCATION_STORE: &str = "allocation_store";
    pub const METRICS_BACKEND: &str = "metrics_backend";

    pub const ALL: [&str; 4] = [PIPELINE, CONTROLLER, ALLOCATION_STORE, METRICS_BACKEND];
}

/// Shared, cloneable view of component health
#[derive(Debug, Clone, Default)]
pub struct HealthRegistry {
    components: Arc<RwLock<HashMap<String, ComponentHealth>>>,
    ready: Arc<RwLock<bool>>,
}

impl HealthRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Registry with every scaler component registered as healthy
    pub async fn with_scaler_components() -> Self {
        let registry = Self::new();
        for name in components::ALL {
            registry.register(name).await;
        }
        registry
    }

    pub async fn register(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn update(&self, name: &str, health: ComponentHealth) {
        self.components
            .write()
            .await
            .insert(name.to_string(), health);
    }

    pub async fn set_healthy(&self, name: &str) {
        self.update(name, ComponentHealth::healthy()).await;
    }

    pub async fn set_degraded(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::degraded(message)).await;
    }

    pub async fn set_unhealthy(&self, name: &str, message: impl Into<String>) {
        self.update(name, ComponentHealth::unhealthy(message)).await;
    }

    pub async fn set_ready(&self, ready: bool) {
        *self.ready.write().await = ready;
    }

    /// Reflect a log batch outcome. Rejected batches are the sender's
    /// problem and leave health untouched.
    pub async fn record_batch(&self, outcome: &BatchOutcome) {
        match outcome {
            BatchOutcome::Published(_) => {
                self.set_healthy(components::PIPELINE).await;
                self.set_healthy(components::METRICS_BACKEND).await;
            }
            BatchOutcome::PublishFailed { error, .. } => {
                self.set_degraded(components::METRICS_BACKEND, error.to_string())
                    .await;
            }
            BatchOutcome::Skipped | BatchOutcome::Rejected(_) => {}
        }
    }

    /// Reflect a scaling cycle outcome
    pub async fn record_scaling(&self, report: &ScalingReport) {
        match &report.outcome {
            ScalingOutcome::Failed { error, .. } => {
                self.set_degraded(components::CONTROLLER, error.to_string())
                    .await;
                // A transient error here has already exhausted its retries
                if error.is_transient() {
                    self.set_unhealthy(
                        components::ALLOCATION_STORE,
                        format!("unreachable after retries: {}", error),
                    )
                    .await;
                }
            }
            ScalingOutcome::Scaled {
                alarm: AlarmUpdate::Stale { .. },
                ..
            } => {
                self.set_healthy(components::CONTROLLER).await;
                self.set_healthy(components::ALLOCATION_STORE).await;
                self.set_degraded(
                    components::METRICS_BACKEND,
                    report.to_result().summary,
                )
                .await;
            }
            ScalingOutcome::Ignored { .. } => {}
            _ => {
                self.set_healthy(components::CONTROLLER).await;
                self.set_healthy(components::ALLOCATION_STORE).await;
            }
        }
    }

    pub async fn health(&self) -> HealthResponse {
        let components = self.components.read().await.clone();
        HealthResponse {
            status: HealthResponse::overall(&components),
            components,
        }
    }

    pub async fn readiness(&self) -> ReadinessResponse {
        if !*self.ready.read().await {
            return ReadinessResponse {
                ready: false,
                reason: Some("Scaler not yet initialized".to_string()),
            };
        }
        if !self.health().await.status.is_operational() {
            return ReadinessResponse {
                ready: false,
                reason: Some("Component unhealthy".to_string()),
            };
        }
        ReadinessResponse {
            ready: true,
            reason: None,
        }
    }
}
