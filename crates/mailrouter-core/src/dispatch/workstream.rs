//! Workstream dispatcher - posts qualifying messages to intake services

use crate::webhook::{sign_payload, validate_webhook_url, SIGNATURE_HEADER, TRANSACTION_HEADER};
use base64::Engine as _;
use chrono::{DateTime, Utc};
use mailrouter_common::config::{WorkstreamEndpoint, WorkstreamsConfig};
use mailrouter_common::types::{
    ClassificationResult, HeaderMap, InboundMessage, TransactionId, Workstream,
};
use reqwest::Client;
use serde::Serialize;
use std::time::Duration;
use tracing::{info, warn};

/// JSON body sent to an intake endpoint
#[derive(Debug, Clone, Serialize)]
pub struct DispatchPayload<'a> {
    pub transaction_id: TransactionId,
    pub workstream: Workstream,
    pub sender: &'a str,
    pub recipient: &'a str,
    pub subject: &'a str,
    pub timestamp: DateTime<Utc>,
    pub classification: &'a ClassificationResult,
    pub headers: &'a HeaderMap,
    pub body: &'a str,
    /// Base64 of the raw message, when the source kept it
    #[serde(skip_serializing_if = "Option::is_none")]
    pub raw_message: Option<String>,
}

impl<'a> DispatchPayload<'a> {
    pub fn new(
        transaction_id: TransactionId,
        workstream: Workstream,
        message: &'a InboundMessage,
        classification: &'a ClassificationResult,
    ) -> Self {
        Self {
            transaction_id,
            workstream,
            sender: &message.sender,
            recipient: &message.recipient,
            subject: &message.subject,
            timestamp: Utc::now(),
            classification,
            headers: &message.headers,
            body: &message.body,
            raw_message: message
                .raw
                .as_ref()
                .map(|raw| base64::engine::general_purpose::STANDARD.encode(raw)),
        }
    }
}

/// Result of one dispatch attempt
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DispatchOutcome {
    /// The intake service accepted the message
    Delivered { workstream: Workstream, status: u16 },
    /// The message must be forwarded to the management address instead
    Fallback {
        workstream: Workstream,
        management_address: String,
        error: String,
    },
}

impl DispatchOutcome {
    pub fn is_delivered(&self) -> bool {
        matches!(self, DispatchOutcome::Delivered { .. })
    }
}

/// Workstream dispatcher
pub struct WorkstreamDispatcher {
    http_client: Client,
    endpoints: WorkstreamsConfig,
    management_address: String,
}

impl WorkstreamDispatcher {
    /// Create a dispatcher for the configured endpoints
    pub fn new(endpoints: WorkstreamsConfig, management_address: impl Into<String>) -> Self {
        Self {
            http_client: Client::new(),
            endpoints,
            management_address: management_address.into(),
        }
    }

    /// Post a message to its workstream. Never fails: any problem turns into
    /// `DispatchOutcome::Fallback`.
    pub async fn dispatch(
        &self,
        transaction_id: TransactionId,
        message: &InboundMessage,
        classification: &ClassificationResult,
        workstream: Workstream,
    ) -> DispatchOutcome {
        let result = match self.endpoints.endpoint(workstream) {
            Some(endpoint) => {
                let payload =
                    DispatchPayload::new(transaction_id, workstream, message, classification);
                self.post(endpoint, transaction_id, &payload).await
            }
            None => Err(format!("workstream {} is not configured", workstream)),
        };

        match result {
            Ok(status) => {
                info!(
                    transaction_id = %transaction_id,
                    workstream = %workstream,
                    status,
                    "Message dispatched to workstream"
                );
                DispatchOutcome::Delivered { workstream, status }
            }
            Err(error) => {
                warn!(
                    transaction_id = %transaction_id,
                    workstream = %workstream,
                    "Workstream dispatch failed, falling back to management: {}",
                    error
                );
                DispatchOutcome::Fallback {
                    workstream,
                    management_address: self.management_address.clone(),
                    error,
                }
            }
        }
    }

    async fn post(
        &self,
        endpoint: &WorkstreamEndpoint,
        transaction_id: TransactionId,
        payload: &DispatchPayload<'_>,
    ) -> Result<u16, String> {
        // Intake services usually live on the internal network
        let url = validate_webhook_url(&endpoint.url, true).map_err(|e| e.to_string())?;
        let body = serde_json::to_vec(payload).map_err(|e| e.to_string())?;

        let mut request = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .header(TRANSACTION_HEADER, transaction_id.to_string())
            .timeout(Duration::from_millis(endpoint.timeout_ms));

        if let Some(ref secret) = endpoint.secret {
            let signature = sign_payload(secret, &body).map_err(|e| e.to_string())?;
            request = request.header(SIGNATURE_HEADER, signature);
        }

        let response = request.body(body).send().await.map_err(|e| e.to_string())?;
        let status = response.status();
        if !status.is_success() {
            return Err(format!("intake returned status {}", status));
        }
        Ok(status.as_u16())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use mailrouter_common::types::Category;
    use pretty_assertions::assert_eq;
    use uuid::Uuid;
    use wiremock::matchers::{header, header_exists, method, path};
    use wiremock::{Mock, MockServer, ResponseTemplate};

    const MANAGEMENT: &str = "ops@corp.example";

    fn endpoints(url: String, secret: Option<&str>) -> WorkstreamsConfig {
        WorkstreamsConfig {
            finance: Some(WorkstreamEndpoint {
                url,
                secret: secret.map(str::to_string),
                timeout_ms: 500,
            }),
            ..WorkstreamsConfig::default()
        }
    }

    fn invoice() -> (InboundMessage, ClassificationResult) {
        let message = InboundMessage::new("vendor@supplier.example", "invoice@corp.example", "Invoice 7", "Due")
            .with_raw(b"Subject: Invoice 7\r\n\r\nDue".to_vec());
        let classification = ClassificationResult {
            category: Category::Invoice,
            ..ClassificationResult::default()
        };
        (message, classification)
    }

    #[tokio::test]
    async fn test_dispatch_delivered() {
        let server = MockServer::start().await;
        let transaction_id = Uuid::new_v4();
        Mock::given(method("POST"))
            .and(path("/finance"))
            .and(header("x-transaction-id", transaction_id.to_string().as_str()))
            .and(header_exists("x-webhook-signature"))
            .respond_with(ResponseTemplate::new(202))
            .expect(1)
            .mount(&server)
            .await;

        let dispatcher = WorkstreamDispatcher::new(
            endpoints(format!("{}/finance", server.uri()), Some("s3cret")),
            MANAGEMENT,
        );
        let (message, classification) = invoice();
        let outcome = dispatcher
            .dispatch(transaction_id, &message, &classification, Workstream::Finance)
            .await;

        assert_eq!(
            outcome,
            DispatchOutcome::Delivered {
                workstream: Workstream::Finance,
                status: 202
            }
        );

        let requests = server.received_requests().await.unwrap();
        let body: serde_json::Value = serde_json::from_slice(&requests[0].body).unwrap();
        assert_eq!(body["workstream"], "finance");
        assert_eq!(body["classification"]["category"], "invoice");
        assert_eq!(body["raw_message"], "U3ViamVjdDogSW52b2ljZSA3DQoNCkR1ZQ==");
    }

    #[tokio::test]
    async fn test_dispatch_error_status_falls_back() {
        let server = MockServer::start().await;
        Mock::given(method("POST"))
            .respond_with(ResponseTemplate::new(500))
            .mount(&server)
            .await;

        let dispatcher = WorkstreamDispatcher::new(endpoints(server.uri(), None), MANAGEMENT);
        let (message, classification) = invoice();
        let outcome = dispatcher
            .dispatch(Uuid::new_v4(), &message, &classification, Workstream::Finance)
            .await;

        match outcome {
            DispatchOutcome::Fallback {
                management_address,
                workstream,
                ..
            } => {
                assert_eq!(management_address, MANAGEMENT);
                assert_eq!(workstream, Workstream::Finance);
            }
            other => panic!("expected fallback, got {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_dispatch_transport_error_falls_back() {
        // Nothing listens on the discard port
        let dispatcher =
            WorkstreamDispatcher::new(endpoints("http://127.0.0.1:9/".to_string(), None), MANAGEMENT);
        let (message, classification) = invoice();
        let outcome = dispatcher
            .dispatch(Uuid::new_v4(), &message, &classification, Workstream::Finance)
            .await;
        assert!(!outcome.is_delivered());
    }

    #[tokio::test]
    async fn test_dispatch_unconfigured_falls_back() {
        let dispatcher = WorkstreamDispatcher::new(WorkstreamsConfig::default(), MANAGEMENT);
        let (message, classification) = invoice();
        let outcome = dispatcher
            .dispatch(Uuid::new_v4(), &message, &classification, Workstream::Litigation)
            .await;
        assert!(!outcome.is_delivered());
    }
}
