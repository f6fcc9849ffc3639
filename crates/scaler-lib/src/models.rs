//! Core data models for the resource scaler

use serde::{Deserialize, Serialize};
use std::fmt;

/// Identity of the service whose resources are being scaled.
///
/// Built once per invocation and passed explicitly to every component.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TargetConfig {
    pub cluster_name: String,
    pub service_name: String,
    pub container_name: String,
    /// Task-definition family holding the service's allocations
    pub family: String,
    /// Metric namespace the aggregated datapoints are published under
    pub namespace: String,
    /// Alarm to re-tune after a scale-up, unless the notification names one
    pub alarm_name: String,
}

/// One decoded per-task utilization record
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct UtilizationSample {
    pub cluster_name: String,
    pub service_name: String,
    pub container_name: Option<String>,
    pub cpu_utilized: f64,
    pub memory_utilized: f64,
    /// Epoch milliseconds
    pub timestamp: i64,
}

/// Name of a published utilization metric
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum MetricName {
    CpuUtilized,
    MemoryUtilized,
}

impl MetricName {
    pub fn as_str(&self) -> &'static str {
        match self {
            MetricName::CpuUtilized => "CpuUtilized",
            MetricName::MemoryUtilized => "MemoryUtilized",
        }
    }
}

impl fmt::Display for MetricName {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct Dimension {
    pub name: String,
    pub value: String,
}

impl Dimension {
    pub fn new(name: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            value: value.into(),
        }
    }
}

/// A single averaged datapoint ready for the metrics backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "PascalCase")]
pub struct AggregatedMetric {
    pub metric_name: MetricName,
    /// Ordered: ClusterName, ServiceName, ContainerName
    pub dimensions: Vec<Dimension>,
    pub value: f64,
    pub unit: String,
    /// Epoch milliseconds of the newest sample in the batch
    pub timestamp: i64,
}

impl AggregatedMetric {
    /// Look up a dimension value by name
    pub fn dimension(&self, name: &str) -> Option<&str> {
        self.dimensions
            .iter()
            .find(|d| d.name == name)
            .map(|d| d.value.as_str())
    }
}

/// The CPU and memory datapoints produced from one batch
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct AggregatedMetrics {
    pub cpu: AggregatedMetric,
    pub memory: AggregatedMetric,
    /// Number of records that contributed to the averages
    pub sample_count: usize,
    /// Number of records dropped by field validation
    pub skipped_count: usize,
}

impl AggregatedMetrics {
    pub fn datapoints(&self) -> [&AggregatedMetric; 2] {
        [&self.cpu, &self.memory]
    }
}

/// Reference to one registered allocation revision
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct AllocationRef {
    pub family: String,
    pub revision: u32,
}

impl AllocationRef {
    pub fn new(family: impl Into<String>, revision: u32) -> Self {
        Self {
            family: family.into(),
            revision,
        }
    }
}

impl fmt::Display for AllocationRef {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}:{}", self.family, self.revision)
    }
}

/// Per-container settings inside an allocation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ContainerDefinition {
    pub name: String,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub image: Option<String>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub cpu: Option<u32>,
    /// Hard memory limit in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory: Option<u32>,
    /// Soft memory limit in MiB
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub memory_reservation: Option<u32>,
}

/// A versioned task definition. Immutable once registered.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ResourceAllocation {
    pub family: String,
    /// Assigned by the store on registration; ignored on candidates
    pub revision: u32,
    pub cpu_units: u32,
    /// MiB
    pub memory_units: u32,
    #[serde(default)]
    pub container_definitions: Vec<ContainerDefinition>,
}

impl ResourceAllocation {
    pub fn allocation_ref(&self) -> AllocationRef {
        AllocationRef::new(self.family.clone(), self.revision)
    }
}

/// The orchestrator's record of which revision a service runs
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct ServiceBinding {
    pub cluster_name: String,
    pub service_name: String,
    pub container_name: String,
    pub active_allocation_ref: AllocationRef,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum ComparisonOperator {
    GreaterThanThreshold,
    GreaterThanOrEqualToThreshold,
    LessThanThreshold,
    LessThanOrEqualToThreshold,
}

/// Alarm configuration held by the metrics backend
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(rename_all = "camelCase")]
pub struct AlarmConfig {
    pub alarm_name: String,
    pub metric_name: MetricName,
    pub namespace: String,
    pub dimensions: Vec<Dimension>,
    pub comparison_operator: ComparisonOperator,
    pub threshold: f64,
}

/// Input for one run of the scaling controller. Never persisted.
#[derive(Debug, Clone, PartialEq)]
pub struct ScalingRequest {
    pub cluster_name: String,
    pub service_name: String,
    pub container_name: String,
    pub family: String,
    pub alarm_name: String,
    pub reason: Option<String>,
    pub raw_notification_payload: String,
}

impl ScalingRequest {
    /// Build a request for the configured target
    pub fn for_target(target: &TargetConfig, raw_notification_payload: impl Into<String>) -> Self {
        Self {
            cluster_name: target.cluster_name.clone(),
            service_name: target.service_name.clone(),
            container_name: target.container_name.clone(),
            family: target.family.clone(),
            alarm_name: target.alarm_name.clone(),
            reason: None,
            raw_notification_payload: raw_notification_payload.into(),
        }
    }

    /// Key used to serialize cycles for the same target
    pub fn target_key(&self) -> String {
        format!(
            "{}/{}/{}",
            self.cluster_name, self.service_name, self.container_name
        )
    }
}

/// Result of one invocation, returned to the dispatcher
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct InvocationResult {
    pub success: bool,
    pub summary: String,
}

impl InvocationResult {
    pub fn success(summary: impl Into<String>) -> Self {
        Self {
            success: true,
            summary: summary.into(),
        }
    }

    pub fn failure(summary: impl Into<String>) -> Self {
        Self {
            success: false,
            summary: summary.into(),
        }
    }
}
