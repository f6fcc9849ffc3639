//! External collaborators of the scaler
//!
//! The task-definition registry, the orchestrator's service bindings and
//! the metrics backend are consumed only through these traits. Two
//! implementations are provided:
//! - in-memory stores for local runs and tests
//! - HTTP clients for a JSON gateway in front of the real services

mod http;
mod memory;

pub use http::{HttpBackend, HttpBackendConfig};
pub use memory::{InMemoryAllocationStore, InMemoryMetricsBackend, InMemoryOrchestrator};

use crate::error::ScalerResult;
use crate::models::{AggregatedMetric, AllocationRef, ResourceAllocation, ServiceBinding};
use std::sync::Arc;

pub use async_trait::async_trait;

/// Append-only, versioned task-definition registry
#[async_trait]
pub trait ResourceAllocationStore: Send + Sync {
    /// Fetch the latest registered revision of a family
    async fn describe(&self, family: &str) -> ScalerResult<ResourceAllocation>;

    /// Register a candidate as a new revision of its family.
    /// The candidate's own `revision` field is ignored.
    async fn register(&self, candidate: &ResourceAllocation) -> ScalerResult<AllocationRef>;
}

/// The orchestrator's view of which revision each service runs
#[async_trait]
pub trait Orchestrator: Send + Sync {
    async fn describe_binding(
        &self,
        cluster_name: &str,
        service_name: &str,
    ) -> ScalerResult<ServiceBinding>;

    /// Point the service at `desired` and roll it, but only if it is
    /// still bound to `expected`; otherwise fail with `Conflict`.
    async fn rebind(
        &self,
        cluster_name: &str,
        service_name: &str,
        expected: &AllocationRef,
        desired: &AllocationRef,
    ) -> ScalerResult<()>;
}

/// Time-series backend receiving datapoints and holding alarm thresholds
#[async_trait]
pub trait MetricsBackend: Send + Sync {
    /// Publish all datapoints in a single all-or-nothing request
    async fn publish(&self, namespace: &str, datapoints: &[AggregatedMetric]) -> ScalerResult<()>;

    async fn patch_alarm(&self, alarm_name: &str, threshold: f64) -> ScalerResult<()>;
}

/// The three collaborators wired together
#[derive(Clone)]
pub struct Backends {
    pub allocations: Arc<dyn ResourceAllocationStore>,
    pub orchestrator: Arc<dyn Orchestrator>,
    pub metrics: Arc<dyn MetricsBackend>,
}

impl Backends {
    /// Use one HTTP gateway client for every collaborator
    pub fn http(backend: HttpBackend) -> Self {
        let backend = Arc::new(backend);
        Self {
            allocations: backend.clone(),
            orchestrator: backend.clone(),
            metrics: backend,
        }
    }
}
