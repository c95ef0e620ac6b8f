//! Inference capability used by the classification engine
//!
//! The service is opaque: a prompt goes in, a short text comes out. Any error
//! or timeout is reported as `InferenceError` and handled by the caller's
//! fallback.

use async_trait::async_trait;
use mailrouter_common::config::InferenceConfig;
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use thiserror::Error;
use tracing::debug;

/// Inference errors
#[derive(Debug, Error)]
pub enum InferenceError {
    #[error("Inference client configuration error: {0}")]
    Config(String),
    #[error("Inference request failed: {0}")]
    Request(String),
    #[error("Inference request timed out")]
    Timeout,
    #[error("Inference service returned status {0}")]
    Status(u16),
    #[error("Invalid inference response: {0}")]
    InvalidResponse(String),
}

impl From<reqwest::Error> for InferenceError {
    fn from(e: reqwest::Error) -> Self {
        if e.is_timeout() {
            InferenceError::Timeout
        } else {
            InferenceError::Request(e.to_string())
        }
    }
}

/// Narrow interface to a text-generation service
#[async_trait]
pub trait InferenceClient: Send + Sync {
    /// Run a prompt, returning the raw response text
    async fn run(&self, prompt: &str, max_tokens: u32) -> Result<String, InferenceError>;
}

#[derive(Debug, Serialize)]
struct InferenceRequest<'a> {
    model: &'a str,
    prompt: &'a str,
    max_tokens: u32,
}

/// HTTP inference client
pub struct HttpInferenceClient {
    client: Client,
    endpoint: String,
    api_key: Option<String>,
    model: String,
}

impl HttpInferenceClient {
    /// Create a client for the configured endpoint
    pub fn new(config: &InferenceConfig) -> Result<Self, InferenceError> {
        let endpoint = config
            .endpoint
            .clone()
            .ok_or_else(|| InferenceError::Config("inference.endpoint is not set".to_string()))?;

        let client = Client::builder()
            .timeout(Duration::from_millis(config.timeout_ms))
            .build()
            .map_err(|e| InferenceError::Config(e.to_string()))?;

        Ok(Self {
            client,
            endpoint,
            api_key: config.api_key.clone(),
            model: config.model.clone(),
        })
    }

    /// Pull the generated text out of the known response shapes:
    /// `{"response": ..}` or `{"result": {"response": ..}}`.
    fn extract_text(body: &serde_json::Value) -> Option<&str> {
        body.get("response")
            .or_else(|| body.get("result").and_then(|r| r.get("response")))
            .and_then(|v| v.as_str())
    }
}

#[async_trait]
impl InferenceClient for HttpInferenceClient {
    async fn run(&self, prompt: &str, max_tokens: u32) -> Result<String, InferenceError> {
        let request = InferenceRequest {
            model: &self.model,
            prompt,
            max_tokens,
        };

        let mut http_request = self.client.post(&self.endpoint).json(&request);
        if let Some(ref key) = self.api_key {
            http_request = http_request.bearer_auth(key);
        }

        let response = http_request.send().await?;

        if !response.status().is_success() {
            return Err(InferenceError::Status(response.status().as_u16()));
        }

        let body: serde_json::Value = response
            .json()
            .await
            .map_err(|e| InferenceError::InvalidResponse(e.to_string()))?;

        let text = Self::extract_text(&body)
            .ok_or_else(|| InferenceError::InvalidResponse("missing response text".to_string()))?;

        debug!(chars = text.len(), "Inference response received");
        Ok(text.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use wiremock::matchers::{body_partial_json, header, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    fn config(endpoint: String) -> InferenceConfig {
        InferenceConfig {
            endpoint: Some(endpoint),
            api_key: Some("token-1".to_string()),
            timeout_ms: 500,
            ..InferenceConfig::default()
        }
    }

    #[tokio::test]
    async fn test_run_returns_response_text() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .and(path("/ai/run"))
            .and(header("authorization", "Bearer token-1"))
            .and(body_partial_json(serde_json::json!({"max_tokens": 10})))
            .respond_with(
                ResponseTemplate::new(200).set_body_json(serde_json::json!({"response": "invoice"})),
            )
            .expect(1)
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&config(format!("{}/ai/run", server.uri()))).unwrap();
        assert_eq!(client.run("prompt", 10).await.unwrap(), "invoice");
    }

    #[tokio::test]
    async fn test_run_accepts_wrapped_result() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(200).set_body_json(
                serde_json::json!({"success": true, "result": {"response": "neutral"}}),
            ))
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&config(server.uri())).unwrap();
        assert_eq!(client.run("prompt", 10).await.unwrap(), "neutral");
    }

    #[tokio::test]
    async fn test_error_status() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(503))
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&config(server.uri())).unwrap();
        assert!(matches!(
            client.run("prompt", 10).await,
            Err(InferenceError::Status(503))
        ));
    }

    #[tokio::test]
    async fn test_timeout() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(
                ResponseTemplate::new(200)
                    .set_body_json(serde_json::json!({"response": "late"}))
                    .set_delay(Duration::from_secs(2)),
            )
            .mount(&server)
            .await;

        let client = HttpInferenceClient::new(&config(server.uri())).unwrap();
        assert!(matches!(
            client.run("prompt", 10).await,
            Err(InferenceError::Timeout)
        ));
    }

    #[test]
    fn test_missing_endpoint() {
        assert!(matches!(
            HttpInferenceClient::new(&InferenceConfig::default()),
            Err(InferenceError::Config(_))
        ));
    }
}
