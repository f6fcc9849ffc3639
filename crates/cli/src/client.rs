//! API client for the resource-scaler dispatcher endpoint

use anyhow::{Context, Result};
use reqwest::{Client, RequestBuilder, StatusCode};
use serde::{de::DeserializeOwned, Deserialize, Serialize};
use url::Url;

/// A decoded response together with its HTTP status.
///
/// Invocation endpoints answer failed invocations with a non-2xx status
/// and a regular result body, so both are kept.
#[derive(Debug)]
pub struct Reply<T> {
    pub status: StatusCode,
    pub body: T,
}

pub struct ApiClient {
    client: Client,
    base_url: Url,
}

impl ApiClient {
    pub fn new(base_url: &str) -> Result<Self> {
        let client = Client::builder()
            .timeout(std::time::Duration::from_secs(30))
            .build()
            .context("Failed to create HTTP client")?;

        let base_url = Url::parse(base_url).context("Invalid API URL")?;

        Ok(Self { client, base_url })
    }

    fn url(&self, path: &str) -> Result<Url> {
        self.base_url.join(path).context("Invalid path")
    }

    async fn send<T: DeserializeOwned>(&self, request: RequestBuilder) -> Result<Reply<T>> {
        let response = request.send().await.context("Failed to send request")?;
        let status = response.status();
        let text = response.text().await.context("Failed to read response")?;

        match serde_json::from_str(&text) {
            Ok(body) => Ok(Reply { status, body }),
            Err(_) if !status.is_success() => anyhow::bail!("API error ({}): {}", status, text),
            Err(e) => Err(e).context("Failed to parse response"),
        }
    }

    pub async fn get<T: DeserializeOwned>(&self, path: &str) -> Result<Reply<T>> {
        let url = self.url(path)?;
        self.send(self.client.get(url)).await
    }

    pub async fn post_json<T: DeserializeOwned, B: Serialize>(
        &self,
        path: &str,
        body: &B,
    ) -> Result<Reply<T>> {
        let url = self.url(path)?;
        self.send(self.client.post(url).json(body)).await
    }

    /// POST a body verbatim; notifications are forwarded untouched
    pub async fn post_raw<T: DeserializeOwned>(&self, path: &str, body: String) -> Result<Reply<T>> {
        let url = self.url(path)?;
        self.send(
            self.client
                .post(url)
                .header("content-type", "application/json")
                .body(body),
        )
        .await
    }
}

// API response types

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BatchResponse {
    pub success: bool,
    pub summary: String,
    pub outcome: String,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ScalingResponse {
    pub success: bool,
    pub summary: String,
    pub outcome: String,
    #[serde(default)]
    pub transitions: Vec<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use scaler_lib::HealthResponse;

    #[tokio::test]
    async fn test_failed_invocation_keeps_body() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/log-batches")
            .with_status(422)
            .with_header("content-type", "application/json")
            .with_body(r#"{"success":false,"summary":"Batch rejected: bad","outcome":"rejected"}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let reply: Reply<BatchResponse> = client
            .post_json("v1/log-batches", &serde_json::json!({"payload": ""}))
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.status, StatusCode::UNPROCESSABLE_ENTITY);
        assert!(!reply.body.success);
        assert_eq!(reply.body.outcome, "rejected");
    }

    #[tokio::test]
    async fn test_non_json_error_is_reported() {
        let mut server = mockito::Server::new_async().await;
        server
            .mock("GET", "/healthz")
            .with_status(500)
            .with_body("internal error")
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let err = client.get::<HealthResponse>("healthz").await.unwrap_err();
        assert!(err.to_string().contains("500"));
    }

    #[tokio::test]
    async fn test_raw_notification_is_forwarded() {
        let mut server = mockito::Server::new_async().await;
        let mock = server
            .mock("POST", "/v1/alarm-notifications")
            .match_body(r#"{"AlarmName":"ConsumerMemoryHigh"}"#)
            .with_status(200)
            .with_body(r#"{"success":true,"summary":"ok","outcome":"ignored","transitions":["Idle"]}"#)
            .create_async()
            .await;

        let client = ApiClient::new(&server.url()).unwrap();
        let reply: Reply<ScalingResponse> = client
            .post_raw(
                "v1/alarm-notifications",
                r#"{"AlarmName":"ConsumerMemoryHigh"}"#.to_string(),
            )
            .await
            .unwrap();

        mock.assert_async().await;
        assert_eq!(reply.body.transitions, vec!["Idle"]);
    }

    #[test]
    fn test_invalid_base_url() {
        assert!(ApiClient::new("not a url").is_err());
    }
}
