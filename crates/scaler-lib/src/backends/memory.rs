//! In-memory collaborators
//!
//! Self-contained implementations that honour the same contracts as the
//! real services: revisions are append-only, rebinding is a
//! compare-and-swap, and alarm patches fail for unknown alarms.

use super::{async_trait, MetricsBackend, Orchestrator, ResourceAllocationStore};
use crate::error::{ScalerError, ScalerResult};
use crate::models::{AggregatedMetric, AlarmConfig, AllocationRef, ResourceAllocation, ServiceBinding};
use dashmap::DashMap;
use std::sync::Mutex;
use tracing::debug;

/// Task-definition registry keeping every revision of every family
#[derive(Debug, Default)]
pub struct InMemoryAllocationStore {
    families: DashMap<String, Vec<ResourceAllocation>>,
}

impl InMemoryAllocationStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Seed revisions directly, bypassing validation. Revision numbers are
    /// reassigned sequentially.
    pub fn seed(&self, allocation: ResourceAllocation) -> AllocationRef {
        let mut history = self.families.entry(allocation.family.clone()).or_default();
        let revision = history.len() as u32 + 1;
        history.push(ResourceAllocation {
            revision,
            ..allocation
        });
        AllocationRef::new(history[0].family.clone(), revision)
    }

    /// All revisions of a family, oldest first
    pub fn revisions(&self, family: &str) -> Vec<ResourceAllocation> {
        self.families
            .get(family)
            .map(|h| h.clone())
            .unwrap_or_default()
    }

    pub fn revision(&self, family: &str, revision: u32) -> Option<ResourceAllocation> {
        self.families.get(family).and_then(|h| {
            h.iter()
                .find(|a| a.revision == revision)
                .cloned()
        })
    }
}

/// Reject candidates the registry would refuse
fn validate_candidate(candidate: &ResourceAllocation) -> ScalerResult<()> {
    if candidate.family.is_empty() {
        return Err(ScalerError::Validation("family must not be empty".into()));
    }
    if candidate.cpu_units == 0 || candidate.memory_units == 0 {
        return Err(ScalerError::Validation(format!(
            "cpu ({}) and memory ({}) must be positive",
            candidate.cpu_units, candidate.memory_units
        )));
    }
    for container in &candidate.container_definitions {
        if let Some(memory) = container.memory {
            if memory > candidate.memory_units {
                return Err(ScalerError::Validation(format!(
                    "container {} memory {} exceeds task memory {}",
                    container.name, memory, candidate.memory_units
                )));
            }
        }
    }
    Ok(())
}

#[async_trait]
impl ResourceAllocationStore for InMemoryAllocationStore {
    async fn describe(&self, family: &str) -> ScalerResult<ResourceAllocation> {
        self.families
            .get(family)
            .and_then(|h| h.last().cloned())
            .ok_or_else(|| ScalerError::NotFound(format!("task definition family {}", family)))
    }

    async fn register(&self, candidate: &ResourceAllocation) -> ScalerResult<AllocationRef> {
        validate_candidate(candidate)?;

        let mut history = self.families.entry(candidate.family.clone()).or_default();
        let revision = history.len() as u32 + 1;
        history.push(ResourceAllocation {
            revision,
            ..candidate.clone()
        });

        debug!(family = %candidate.family, revision, "Registered allocation revision");
        Ok(AllocationRef::new(candidate.family.clone(), revision))
    }
}

/// Orchestrator holding service bindings keyed by (cluster, service)
#[derive(Debug, Default)]
pub struct InMemoryOrchestrator {
    bindings: DashMap<(String, String), ServiceBinding>,
    rollouts: Mutex<Vec<AllocationRef>>,
}

impl InMemoryOrchestrator {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_binding(self, binding: ServiceBinding) -> Self {
        self.insert_binding(binding);
        self
    }

    pub fn insert_binding(&self, binding: ServiceBinding) {
        self.bindings.insert(
            (binding.cluster_name.clone(), binding.service_name.clone()),
            binding,
        );
    }

    pub fn binding(&self, cluster_name: &str, service_name: &str) -> Option<ServiceBinding> {
        self.bindings
            .get(&(cluster_name.to_string(), service_name.to_string()))
            .map(|b| b.clone())
    }

    /// Every revision a service was rolled to, in order
    pub fn rollouts(&self) -> Vec<AllocationRef> {
        self.rollouts.lock().map(|r| r.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl Orchestrator for InMemoryOrchestrator {
    async fn describe_binding(
        &self,
        cluster_name: &str,
        service_name: &str,
    ) -> ScalerResult<ServiceBinding> {
        self.binding(cluster_name, service_name).ok_or_else(|| {
            ScalerError::NotFound(format!("service {}/{}", cluster_name, service_name))
        })
    }

    async fn rebind(
        &self,
        cluster_name: &str,
        service_name: &str,
        expected: &AllocationRef,
        desired: &AllocationRef,
    ) -> ScalerResult<()> {
        let key = (cluster_name.to_string(), service_name.to_string());
        let mut binding = self.bindings.get_mut(&key).ok_or_else(|| {
            ScalerError::NotFound(format!("service {}/{}", cluster_name, service_name))
        })?;

        if binding.active_allocation_ref != *expected {
            return Err(ScalerError::Conflict(format!(
                "service {}/{} is bound to {}, expected {}",
                cluster_name, service_name, binding.active_allocation_ref, expected
            )));
        }

        binding.active_allocation_ref = desired.clone();
        drop(binding);

        if let Ok(mut rollouts) = self.rollouts.lock() {
            rollouts.push(desired.clone());
        }
        Ok(())
    }
}

/// Metrics backend that records published datapoints
#[derive(Debug, Default)]
pub struct InMemoryMetricsBackend {
    published: Mutex<Vec<(String, AggregatedMetric)>>,
    alarms: DashMap<String, AlarmConfig>,
}

impl InMemoryMetricsBackend {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_alarm(self, alarm: AlarmConfig) -> Self {
        self.alarms.insert(alarm.alarm_name.clone(), alarm);
        self
    }

    pub fn alarm(&self, alarm_name: &str) -> Option<AlarmConfig> {
        self.alarms.get(alarm_name).map(|a| a.clone())
    }

    /// Published datapoints with their namespace, in publish order
    pub fn published(&self) -> Vec<(String, AggregatedMetric)> {
        self.published.lock().map(|p| p.clone()).unwrap_or_default()
    }
}

#[async_trait]
impl MetricsBackend for InMemoryMetricsBackend {
    async fn publish(&self, namespace: &str, datapoints: &[AggregatedMetric]) -> ScalerResult<()> {
        if namespace.is_empty() {
            return Err(ScalerError::Publish("namespace must not be empty".into()));
        }
        let mut published = self
            .published
            .lock()
            .map_err(|_| ScalerError::Publish("datapoint log poisoned".into()))?;
        published.extend(
            datapoints
                .iter()
                .map(|d| (namespace.to_string(), d.clone())),
        );
        Ok(())
    }

    async fn patch_alarm(&self, alarm_name: &str, threshold: f64) -> ScalerResult<()> {
        let mut alarm = self
            .alarms
            .get_mut(alarm_name)
            .ok_or_else(|| ScalerError::NotFound(format!("alarm {}", alarm_name)))?;
        alarm.threshold = threshold;
        Ok(())
    }
}
