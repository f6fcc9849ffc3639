//! HTTP clients for the orchestrator and metrics gateways
//!
//! Maps gateway status codes onto the scaler's error taxonomy so the
//! retry layer can tell transient failures from permanent ones.

use super::{async_trait, MetricsBackend, Orchestrator, ResourceAllocationStore};
use crate::error::{ScalerError, ScalerResult};
use crate::models::{AggregatedMetric, AllocationRef, ResourceAllocation, ServiceBinding};
use reqwest::{Client, Response, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use std::time::Duration;
use tracing::debug;
use url::Url;

/// Configuration for the gateway clients
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct HttpBackendConfig {
    /// Base URL of the orchestrator gateway (task definitions and services)
    pub orchestrator_url: String,
    /// Base URL of the metrics gateway (datapoints and alarms)
    pub metrics_url: String,
    /// Per-request timeout
    #[serde(default = "default_request_timeout_secs")]
    pub request_timeout_secs: u64,
}

fn default_request_timeout_secs() -> u64 {
    10
}

#[derive(Debug, Serialize)]
struct RebindRequest<'a> {
    expected: &'a AllocationRef,
    desired: &'a AllocationRef,
}

#[derive(Debug, Serialize)]
#[serde(rename_all = "camelCase")]
struct PutMetricDataRequest<'a> {
    metric_data: &'a [AggregatedMetric],
}

#[derive(Debug, Serialize)]
struct ThresholdRequest {
    threshold: f64,
}

/// Which error a non-transient failure maps to
#[derive(Debug, Clone, Copy)]
enum Endpoint {
    Orchestrator,
    Metrics,
}

/// Gateway client implementing every collaborator trait
#[derive(Debug, Clone)]
pub struct HttpBackend {
    client: Client,
    orchestrator_url: Url,
    metrics_url: Url,
}

impl HttpBackend {
    pub fn new(config: &HttpBackendConfig) -> ScalerResult<Self> {
        let client = Client::builder()
            .timeout(Duration::from_secs(config.request_timeout_secs))
            .build()
            .map_err(|e| ScalerError::Validation(format!("failed to create HTTP client: {}", e)))?;

        Ok(Self {
            client,
            orchestrator_url: parse_base(&config.orchestrator_url)?,
            metrics_url: parse_base(&config.metrics_url)?,
        })
    }

    async fn send(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: Endpoint,
    ) -> ScalerResult<Response> {
        let response = request
            .send()
            .await
            .map_err(|e| ScalerError::Transient(format!("request failed: {}", e)))?;

        let status = response.status();
        if status.is_success() {
            return Ok(response);
        }

        let body = response.text().await.unwrap_or_default();
        debug!(status = %status, body = %body, "Gateway returned an error");
        Err(classify(status, body, endpoint))
    }

    async fn send_json<T: DeserializeOwned>(
        &self,
        request: reqwest::RequestBuilder,
        endpoint: Endpoint,
    ) -> ScalerResult<T> {
        self.send(request, endpoint)
            .await?
            .json()
            .await
            .map_err(|e| ScalerError::Transient(format!("failed to parse response: {}", e)))
    }
}

fn parse_base(raw: &str) -> ScalerResult<Url> {
    let url = Url::parse(raw)
        .map_err(|e| ScalerError::Validation(format!("invalid gateway URL {}: {}", raw, e)))?;
    if url.cannot_be_a_base() {
        return Err(ScalerError::Validation(format!(
            "gateway URL {} cannot be a base",
            raw
        )));
    }
    Ok(url)
}

/// Append percent-encoded path segments to a base URL
fn endpoint_url(base: &Url, segments: &[&str]) -> Url {
    let mut url = base.clone();
    if let Ok(mut path) = url.path_segments_mut() {
        path.pop_if_empty().extend(segments);
    }
    url
}

fn classify(status: StatusCode, body: String, endpoint: Endpoint) -> ScalerError {
    let message = if body.is_empty() {
        status.to_string()
    } else {
        format!("{}: {}", status, body)
    };

    match status {
        StatusCode::NOT_FOUND => ScalerError::NotFound(message),
        StatusCode::CONFLICT => ScalerError::Conflict(message),
        StatusCode::REQUEST_TIMEOUT | StatusCode::TOO_MANY_REQUESTS => {
            ScalerError::Transient(message)
        }
        s if s.is_server_error() => ScalerError::Transient(message),
        StatusCode::BAD_REQUEST | StatusCode::UNPROCESSABLE_ENTITY => {
            ScalerError::Validation(message)
        }
        _ => match endpoint {
            Endpoint::Metrics => ScalerError::Publish(message),
            Endpoint::Orchestrator => ScalerError::Validation(message),
        },
    }
}

#[async_trait]
impl ResourceAllocationStore for HttpBackend {
    async fn describe(&self, family: &str) -> ScalerResult<ResourceAllocation> {
        let url = endpoint_url(&self.orchestrator_url, &["task-definitions", family]);
        self.send_json(self.client.get(url), Endpoint::Orchestrator)
            .await
    }

    async fn register(&self, candidate: &ResourceAllocation) -> ScalerResult<AllocationRef> {
        let url = endpoint_url(&self.orchestrator_url, &["task-definitions"]);
        self.send_json(self.client.post(url).json(candidate), Endpoint::Orchestrator)
            .await
    }
}

#[async_trait]
impl Orchestrator for HttpBackend {
    async fn describe_binding(
        &self,
        cluster_name: &str,
        service_name: &str,
    ) -> ScalerResult<ServiceBinding> {
        let url = endpoint_url(
            &self.orchestrator_url,
            &["clusters", cluster_name, "services", service_name],
        );
        self.send_json(self.client.get(url), Endpoint::Orchestrator)
            .await
    }

    async fn rebind(
        &self,
        cluster_name: &str,
        service_name: &str,
        expected: &AllocationRef,
        desired: &AllocationRef,
    ) -> ScalerResult<()> {
        let url = endpoint_url(
            &self.orchestrator_url,
            &[
                "clusters",
                cluster_name,
                "services",
                service_name,
                "task-definition",
            ],
        );
        let body = RebindRequest { expected, desired };
        self.send(self.client.put(url).json(&body), Endpoint::Orchestrator)
            .await?;
        Ok(())
    }
}

#[async_trait]
impl MetricsBackend for HttpBackend {
    async fn publish(&self, namespace: &str, datapoints: &[AggregatedMetric]) -> ScalerResult<()> {
        let url = endpoint_url(&self.metrics_url, &["metrics", namespace]);
        let body = PutMetricDataRequest {
            metric_data: datapoints,
        };
        self.send(self.client.post(url).json(&body), Endpoint::Metrics)
            .await?;
        Ok(())
    }

    async fn patch_alarm(&self, alarm_name: &str, threshold: f64) -> ScalerResult<()> {
        let url = endpoint_url(&self.metrics_url, &["alarms", alarm_name, "threshold"]);
        self.send(
            self.client.put(url).json(&ThresholdRequest { threshold }),
            Endpoint::Metrics,
        )
        .await?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::models::{Dimension, MetricName};
    use mockito::Matcher;

    fn backend(server: &mockito::ServerGuard) -> HttpBackend {
        HttpBackend::new(&HttpBackendConfig {
            orchestrator_url: server.url(),
            metrics_url: format!("{}/cw/", server.url()),
            request_timeout_secs: 5,
        })
        .unwrap()
    }

    #[tokio::test]
    async fn test_describe_parses_allocation() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("GET", "/task-definitions/ConsumerTask")
            .with_status(200)
            .with_header("content-type", "application/json")
            .with_body(
                r#"{"family":"ConsumerTask","revision":3,"cpuUnits":256,"memoryUnits":512,
                    "containerDefinitions":[{"name":"BackendContainer","memory":512}]}"#,
            )
            .create_async()
            .await;

        let allocation = backend(&server).describe("ConsumerTask").await.unwrap();
        assert_eq!(allocation.revision, 3);
        assert_eq!(allocation.memory_units, 512);
        assert_eq!(allocation.container_definitions[0].memory, Some(512));
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_status_codes_map_to_error_kinds() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/task-definitions/Missing")
            .with_status(404)
            .create_async()
            .await;
        server
            .mock("GET", "/task-definitions/Throttled")
            .with_status(429)
            .create_async()
            .await;
        server
            .mock("GET", "/task-definitions/Broken")
            .with_status(503)
            .create_async()
            .await;

        let backend = backend(&server);
        assert!(matches!(
            backend.describe("Missing").await,
            Err(ScalerError::NotFound(_))
        ));
        assert!(matches!(
            backend.describe("Throttled").await,
            Err(ScalerError::Transient(_))
        ));
        assert!(matches!(
            backend.describe("Broken").await,
            Err(ScalerError::Transient(_))
        ));
    }

    #[tokio::test]
    async fn test_rebind_sends_expected_and_desired() {
        let mut server = mockito::Server::new_async().await;
        let ok = server
            .mock(
                "PUT",
                "/clusters/ConsumerCluster/services/ConsumerService/task-definition",
            )
            .match_body(Matcher::Json(serde_json::json!({
                "expected": {"family": "ConsumerTask", "revision": 3},
                "desired": {"family": "ConsumerTask", "revision": 4}
            })))
            .with_status(204)
            .create_async()
            .await;

        backend(&server)
            .rebind(
                "ConsumerCluster",
                "ConsumerService",
                &AllocationRef::new("ConsumerTask", 3),
                &AllocationRef::new("ConsumerTask", 4),
            )
            .await
            .unwrap();
        ok.assert_async().await;
    }

    #[tokio::test]
    async fn test_rebind_conflict() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock(
                "PUT",
                "/clusters/ConsumerCluster/services/ConsumerService/task-definition",
            )
            .with_status(409)
            .with_body("binding moved")
            .create_async()
            .await;

        let err = backend(&server)
            .rebind(
                "ConsumerCluster",
                "ConsumerService",
                &AllocationRef::new("ConsumerTask", 3),
                &AllocationRef::new("ConsumerTask", 4),
            )
            .await
            .unwrap_err();
        assert!(matches!(err, ScalerError::Conflict(ref m) if m.contains("binding moved")));
    }

    #[tokio::test]
    async fn test_publish_posts_both_datapoints_under_namespace() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/cw/metrics/ECS%2FConsumer")
            .match_body(Matcher::PartialJson(serde_json::json!({
                "metricData": [
                    {"MetricName": "CpuUtilized", "Value": 20.0},
                    {"MetricName": "MemoryUtilized", "Value": 200.0}
                ]
            })))
            .with_status(200)
            .create_async()
            .await;

        let dims = vec![Dimension::new("ClusterName", "ConsumerCluster")];
        let points = vec![
            AggregatedMetric {
                metric_name: MetricName::CpuUtilized,
                dimensions: dims.clone(),
                value: 20.0,
                unit: "None".to_string(),
                timestamp: 1,
            },
            AggregatedMetric {
                metric_name: MetricName::MemoryUtilized,
                dimensions: dims,
                value: 200.0,
                unit: "None".to_string(),
                timestamp: 1,
            },
        ];

        backend(&server)
            .publish("ECS/Consumer", &points)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[tokio::test]
    async fn test_metrics_rejection_is_publish_error() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("POST", "/cw/metrics/Consumer")
            .with_status(403)
            .create_async()
            .await;

        let err = backend(&server).publish("Consumer", &[]).await.unwrap_err();
        assert!(matches!(err, ScalerError::Publish(_)));
    }

    #[tokio::test]
    async fn test_patch_alarm_sends_threshold() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("PUT", "/cw/alarms/ConsumerMemoryHigh/threshold")
            .match_body(Matcher::Json(serde_json::json!({"threshold": 614.4})))
            .with_status(200)
            .create_async()
            .await;

        backend(&server)
            .patch_alarm("ConsumerMemoryHigh", 614.4)
            .await
            .unwrap();
        mock.assert_async().await;
    }

    #[test]
    fn test_invalid_base_url_is_rejected() {
        let err = HttpBackend::new(&HttpBackendConfig {
            orchestrator_url: "not a url".to_string(),
            metrics_url: "http://localhost".to_string(),
            request_timeout_secs: 1,
        })
        .unwrap_err();
        assert!(matches!(err, ScalerError::Validation(_)));
    }
}
