//! Scaler configuration
//!
//! Layers, lowest precedence first: legacy unprefixed variables
//! (`ECS_CLUSTER_NAME`, ...), the optional file named by
//! `SCALER_CONFIG_FILE`, then `SCALER_*` variables with `__` separating
//! nested keys (`SCALER_SCALING__MAX_MEMORY_UNITS=8192`).

use anyhow::{bail, Context, Result};
use scaler_lib::backends::{
    Backends, HttpBackend, HttpBackendConfig, InMemoryAllocationStore, InMemoryMetricsBackend,
    InMemoryOrchestrator,
};
use scaler_lib::controller::{AlarmThresholdPolicy, RetryPolicy, ScalingPolicy};
use scaler_lib::models::{
    AlarmConfig, ComparisonOperator, ContainerDefinition, Dimension, MetricName,
    ResourceAllocation, ServiceBinding, TargetConfig,
};
use scaler_lib::pipeline::{DIMENSION_CLUSTER, DIMENSION_CONTAINER, DIMENSION_SERVICE};
use serde::Deserialize;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;

const ENV_PREFIX: &str = "SCALER";
const CONFIG_FILE_VAR: &str = "SCALER_CONFIG_FILE";

/// Unprefixed variables still honoured, mapped to config keys. Later
/// entries win when both are set.
const LEGACY_ENV: &[(&str, &str)] = &[
    ("CONTAINER_NAME", "container_name"),
    ("ECS_CLUSTER_NAME", "cluster_name"),
    ("ECS_SERVICE_NAME", "service_name"),
    ("ECS_CONTAINER_NAME", "container_name"),
    ("TASK_DEFINITION_FAMILY", "family"),
    ("METRIC_NAMESPACE", "namespace"),
];

#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum BackendKind {
    /// Self-contained stores seeded from `seed`
    #[default]
    Memory,
    /// JSON gateways configured under `http`
    Http,
}

impl BackendKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            BackendKind::Memory => "memory",
            BackendKind::Http => "http",
        }
    }
}

/// Retry settings in milliseconds, as they appear in config
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct RetrySettings {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub max_backoff_ms: u64,
    pub call_timeout_ms: u64,
}

impl Default for RetrySettings {
    fn default() -> Self {
        let policy = RetryPolicy::default();
        Self {
            max_attempts: policy.max_attempts,
            initial_backoff_ms: policy.initial_backoff.as_millis() as u64,
            max_backoff_ms: policy.max_backoff.as_millis() as u64,
            call_timeout_ms: policy.call_timeout.as_millis() as u64,
        }
    }
}

impl RetrySettings {
    pub fn policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.max_attempts,
            initial_backoff: Duration::from_millis(self.initial_backoff_ms),
            max_backoff: Duration::from_millis(self.max_backoff_ms),
            call_timeout: Duration::from_millis(self.call_timeout_ms),
        }
    }
}

/// Initial revision registered by the memory backend
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct MemorySeed {
    pub cpu_units: u32,
    pub memory_units: u32,
    pub image: Option<String>,
}

impl Default for MemorySeed {
    fn default() -> Self {
        Self {
            cpu_units: 256,
            memory_units: 512,
            image: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize)]
pub struct ScalerConfig {
    pub cluster_name: String,
    pub service_name: String,
    pub container_name: String,
    /// Task-definition family
    pub family: String,

    #[serde(default = "default_namespace")]
    pub namespace: String,

    /// Defaults to `<service_name>-memory-high`
    #[serde(default)]
    pub alarm_name: Option<String>,

    #[serde(default = "default_api_port")]
    pub api_port: u16,

    #[serde(default)]
    pub backend: BackendKind,

    #[serde(default)]
    pub http: Option<HttpBackendConfig>,

    #[serde(default)]
    pub seed: MemorySeed,

    #[serde(default)]
    pub scaling: ScalingPolicy,

    #[serde(default)]
    pub alarm: AlarmThresholdPolicy,

    #[serde(default)]
    pub retry: RetrySettings,

    #[serde(default = "default_publish_timeout_ms")]
    pub publish_timeout_ms: u64,

    /// Upper bound on a decompressed log batch
    #[serde(default)]
    pub max_decompressed_bytes: Option<usize>,
}

fn default_namespace() -> String {
    "ECS/ContainerInsights".to_string()
}

fn default_api_port() -> u16 {
    8080
}

fn default_publish_timeout_ms() -> u64 {
    10_000
}

impl ScalerConfig {
    /// Load from the process environment
    pub fn load() -> Result<Self> {
        let vars: config::Map<String, String> = std::env::vars().collect();
        let file = vars.get(CONFIG_FILE_VAR).map(PathBuf::from);
        Self::load_from(file.as_deref(), vars)
    }

    /// Load from an explicit file and variable set
    pub fn load_from(file: Option<&Path>, vars: config::Map<String, String>) -> Result<Self> {
        let mut builder = config::Config::builder();

        for (var, key) in LEGACY_ENV {
            if let Some(value) = vars.get(*var) {
                builder = builder.set_default(*key, value.as_str())?;
            }
        }

        if let Some(path) = file {
            builder = builder.add_source(config::File::from(path).required(true));
        }

        let config: ScalerConfig = builder
            .add_source(
                config::Environment::with_prefix(ENV_PREFIX)
                    .prefix_separator("_")
                    .separator("__")
                    .try_parsing(true)
                    .source(Some(vars)),
            )
            .build()
            .context("failed to read configuration")?
            .try_deserialize()
            .context("invalid configuration")?;

        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        for (name, value) in [
            ("cluster_name", &self.cluster_name),
            ("service_name", &self.service_name),
            ("container_name", &self.container_name),
            ("family", &self.family),
            ("namespace", &self.namespace),
        ] {
            if value.trim().is_empty() {
                bail!("{} must not be empty", name);
            }
        }

        if self.backend == BackendKind::Http && self.http.is_none() {
            bail!("backend 'http' requires http.orchestrator_url and http.metrics_url");
        }
        if self.retry.max_attempts == 0 {
            bail!("retry.max_attempts must be at least 1");
        }
        if self.seed.cpu_units == 0 || self.seed.memory_units == 0 {
            bail!("seed cpu_units and memory_units must be positive");
        }

        self.scaling.validate().context("invalid scaling policy")?;
        self.alarm.validate().context("invalid alarm policy")?;
        Ok(())
    }

    pub fn target(&self) -> TargetConfig {
        TargetConfig {
            cluster_name: self.cluster_name.clone(),
            service_name: self.service_name.clone(),
            container_name: self.container_name.clone(),
            family: self.family.clone(),
            namespace: self.namespace.clone(),
            alarm_name: self
                .alarm_name
                .clone()
                .unwrap_or_else(|| format!("{}-memory-high", self.service_name)),
        }
    }

    pub fn publish_timeout(&self) -> Duration {
        Duration::from_millis(self.publish_timeout_ms)
    }

    fn seed_allocation(&self) -> ResourceAllocation {
        ResourceAllocation {
            family: self.family.clone(),
            revision: 1,
            cpu_units: self.seed.cpu_units,
            memory_units: self.seed.memory_units,
            container_definitions: vec![ContainerDefinition {
                name: self.container_name.clone(),
                image: self.seed.image.clone(),
                cpu: None,
                memory: Some(self.seed.memory_units),
                memory_reservation: None,
            }],
        }
    }

    /// Build the collaborators named by `backend`
    pub fn backends(&self) -> Result<Backends> {
        match self.backend {
            BackendKind::Http => {
                let http = self
                    .http
                    .as_ref()
                    .context("backend 'http' requires an http section")?;
                let client = HttpBackend::new(http).context("failed to create gateway client")?;
                Ok(Backends::http(client))
            }
            BackendKind::Memory => {
                let target = self.target();
                let allocation = self.seed_allocation();

                let allocations = InMemoryAllocationStore::new();
                let active = allocations.seed(allocation.clone());

                let orchestrator = InMemoryOrchestrator::new().with_binding(ServiceBinding {
                    cluster_name: target.cluster_name.clone(),
                    service_name: target.service_name.clone(),
                    container_name: target.container_name.clone(),
                    active_allocation_ref: active,
                });

                let metrics = InMemoryMetricsBackend::new().with_alarm(AlarmConfig {
                    alarm_name: target.alarm_name.clone(),
                    metric_name: MetricName::MemoryUtilized,
                    namespace: target.namespace.clone(),
                    dimensions: vec![
                        Dimension::new(DIMENSION_CLUSTER, &target.cluster_name),
                        Dimension::new(DIMENSION_SERVICE, &target.service_name),
                        Dimension::new(DIMENSION_CONTAINER, &target.container_name),
                    ],
                    comparison_operator: ComparisonOperator::GreaterThanThreshold,
                    threshold: self.alarm.threshold(&allocation),
                });

                Ok(Backends {
                    allocations: Arc::new(allocations),
                    orchestrator: Arc::new(orchestrator),
                    metrics: Arc::new(metrics),
                })
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use scaler_lib::backends::{MetricsBackend, Orchestrator, ResourceAllocationStore};
    use scaler_lib::controller::Step;
    use std::io::Write;

    fn vars(pairs: &[(&str, &str)]) -> config::Map<String, String> {
        pairs
            .iter()
            .map(|(k, v)| (k.to_string(), v.to_string()))
            .collect()
    }

    fn required() -> Vec<(&'static str, &'static str)> {
        vec![
            ("SCALER_CLUSTER_NAME", "ConsumerCluster"),
            ("SCALER_SERVICE_NAME", "ConsumerService"),
            ("SCALER_CONTAINER_NAME", "BackendContainer"),
            ("SCALER_FAMILY", "ConsumerTask"),
        ]
    }

    #[test]
    fn test_prefixed_env_with_defaults() {
        let config = ScalerConfig::load_from(None, vars(&required())).unwrap();

        assert_eq!(config.cluster_name, "ConsumerCluster");
        assert_eq!(config.namespace, "ECS/ContainerInsights");
        assert_eq!(config.api_port, 8080);
        assert_eq!(config.backend, BackendKind::Memory);
        assert_eq!(config.scaling, ScalingPolicy::default());
        assert_eq!(config.target().alarm_name, "ConsumerService-memory-high");
        assert_eq!(config.retry.policy().max_attempts, 4);
    }

    #[test]
    fn test_nested_keys_use_double_underscore() {
        let mut pairs = required();
        pairs.push(("SCALER_SCALING__MAX_MEMORY_UNITS", "8192"));
        pairs.push(("SCALER_ALARM__UTILIZATION_RATIO", "0.9"));
        pairs.push(("SCALER_RETRY__MAX_ATTEMPTS", "2"));

        let config = ScalerConfig::load_from(None, vars(&pairs)).unwrap();
        assert_eq!(config.scaling.max_memory_units, 8192);
        assert_eq!(config.scaling.step, Step::Fixed { memory_units: 256 });
        assert!((config.alarm.utilization_ratio - 0.9).abs() < 1e-9);
        assert_eq!(config.retry.max_attempts, 2);
    }

    #[test]
    fn test_legacy_variable_names() {
        let config = ScalerConfig::load_from(
            None,
            vars(&[
                ("ECS_CLUSTER_NAME", "LegacyCluster"),
                ("ECS_SERVICE_NAME", "LegacyService"),
                ("CONTAINER_NAME", "LegacyContainer"),
                ("TASK_DEFINITION_FAMILY", "LegacyTask"),
                ("METRIC_NAMESPACE", "Custom/Namespace"),
            ]),
        )
        .unwrap();

        assert_eq!(config.cluster_name, "LegacyCluster");
        assert_eq!(config.container_name, "LegacyContainer");
        assert_eq!(config.family, "LegacyTask");
        assert_eq!(config.namespace, "Custom/Namespace");
    }

    #[test]
    fn test_prefixed_variables_override_legacy() {
        let mut pairs = required();
        pairs.push(("ECS_CLUSTER_NAME", "LegacyCluster"));

        let config = ScalerConfig::load_from(None, vars(&pairs)).unwrap();
        assert_eq!(config.cluster_name, "ConsumerCluster");
    }

    #[test]
    fn test_file_layer_under_env() {
        let mut file = tempfile::Builder::new().suffix(".json").tempfile().unwrap();
        write!(
            file,
            r#"{{
                "cluster_name": "FileCluster",
                "service_name": "FileService",
                "container_name": "FileContainer",
                "family": "FileTask",
                "alarm_name": "FileAlarm",
                "scaling": {{"step": {{"kind": "factor", "factor": 1.5}}, "max_memory_units": 16384, "platform": "fargate"}}
            }}"#
        )
        .unwrap();

        let config = ScalerConfig::load_from(
            Some(file.path()),
            vars(&[("SCALER_CLUSTER_NAME", "EnvCluster")]),
        )
        .unwrap();

        assert_eq!(config.cluster_name, "EnvCluster");
        assert_eq!(config.service_name, "FileService");
        assert_eq!(config.target().alarm_name, "FileAlarm");
        assert_eq!(config.scaling.step, Step::Factor { factor: 1.5 });
        assert_eq!(config.scaling.max_memory_units, 16384);
    }

    #[test]
    fn test_missing_identity_is_an_error() {
        let err = ScalerConfig::load_from(None, vars(&[("SCALER_CLUSTER_NAME", "c")]));
        assert!(err.is_err());
    }

    #[test]
    fn test_http_backend_requires_urls() {
        let mut pairs = required();
        pairs.push(("SCALER_BACKEND", "http"));
        assert!(ScalerConfig::load_from(None, vars(&pairs)).is_err());

        pairs.push(("SCALER_HTTP__ORCHESTRATOR_URL", "http://orchestrator:8080"));
        pairs.push(("SCALER_HTTP__METRICS_URL", "http://metrics:8080"));
        let config = ScalerConfig::load_from(None, vars(&pairs)).unwrap();
        assert_eq!(config.backend, BackendKind::Http);
        assert!(config.backends().is_ok());
    }

    #[test]
    fn test_invalid_policy_is_rejected() {
        let mut pairs = required();
        pairs.push(("SCALER_ALARM__UTILIZATION_RATIO", "-1"));
        assert!(ScalerConfig::load_from(None, vars(&pairs)).is_err());
    }

    #[tokio::test]
    async fn test_memory_backend_is_seeded() {
        let config = ScalerConfig::load_from(None, vars(&required())).unwrap();
        let backends = config.backends().unwrap();

        let current = backends.allocations.describe("ConsumerTask").await.unwrap();
        assert_eq!(current.revision, 1);
        assert_eq!(current.memory_units, 512);

        let binding = backends
            .orchestrator
            .describe_binding("ConsumerCluster", "ConsumerService")
            .await
            .unwrap();
        assert_eq!(binding.active_allocation_ref, current.allocation_ref());

        backends
            .metrics
            .patch_alarm("ConsumerService-memory-high", 500.0)
            .await
            .unwrap();
    }
}
