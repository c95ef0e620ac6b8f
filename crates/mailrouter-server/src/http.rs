//! HTTP ingest API

use crate::relay::{prepend_headers, Relay};
use async_trait::async_trait;
use axum::{
    extract::State,
    http::StatusCode,
    routing::{get, post},
    Json, Router,
};
use mailrouter_common::types::{HeaderMap, InboundMessage, RoutingDecision, TransactionId, Workstream};
use mailrouter_core::pipeline::{ExtraHeaders, MessageProcessor, MessageSource};
use mailrouter_storage::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::{Arc, Mutex};
use tower_http::trace::TraceLayer;
use tracing::warn;

/// SMTP reply code handed back for rejected messages
const REJECT_SMTP_CODE: u16 = 550;

/// Shared state for handlers
pub struct AppState {
    pub processor: Arc<MessageProcessor>,
    pub relay: Arc<dyn Relay>,
    pub store: Arc<dyn KvStore>,
}

/// Create the HTTP router
pub fn create_router(state: Arc<AppState>) -> Router {
    Router::new()
        .route("/health", get(health))
        .route("/health/live", get(liveness))
        .route("/health/ready", get(readiness))
        .route("/v1/messages", post(ingest_message))
        .layer(TraceLayer::new_for_http())
        .with_state(state)
}

/// Message submitted for routing
#[derive(Debug, Clone, Deserialize)]
pub struct IngestRequest {
    /// Envelope sender; empty for bounces
    #[serde(default)]
    pub from: String,
    /// Envelope recipient
    pub to: String,
    /// RFC 5322 message text
    pub raw: String,
}

/// Routing result
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct IngestResponse {
    pub transaction_id: TransactionId,
    /// forward, discard, dispatch or reject
    pub action: String,
    /// What was actually done, e.g. dispatch_fallback
    pub outcome: String,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub destination: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub workstream: Option<Workstream>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub reason: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_code: Option<u16>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub smtp_message: Option<String>,
    pub priority: bool,
}

/// Error response
#[derive(Debug, Serialize)]
pub struct ErrorResponse {
    pub error: String,
    pub message: String,
}

fn bad_request(message: &str) -> (StatusCode, Json<ErrorResponse>) {
    (
        StatusCode::BAD_REQUEST,
        Json(ErrorResponse {
            error: "validation_error".to_string(),
            message: message.to_string(),
        }),
    )
}

/// Route one message
///
/// POST /v1/messages
pub async fn ingest_message(
    State(state): State<Arc<AppState>>,
    Json(input): Json<IngestRequest>,
) -> Result<Json<IngestResponse>, (StatusCode, Json<ErrorResponse>)> {
    if input.to.trim().is_empty() {
        return Err(bad_request("Recipient is required"));
    }
    if input.raw.is_empty() {
        return Err(bad_request("Raw message is required"));
    }

    let raw = input.raw.into_bytes();
    let message = parse_message(&input.from, &input.to, &raw);
    let source = IngestSource {
        message,
        relay: state.relay.clone(),
        rejection: Mutex::new(None),
    };

    let outcome = state.processor.process(&source).await;

    let mut response = IngestResponse {
        transaction_id: outcome.transaction_id,
        action: outcome.decision.label().to_string(),
        outcome: outcome.action.as_str().to_string(),
        destination: outcome.destination.clone(),
        workstream: None,
        reason: None,
        smtp_code: None,
        smtp_message: None,
        priority: outcome.priority,
    };

    if let RoutingDecision::Dispatch { workstream } = outcome.decision {
        response.workstream = Some(workstream);
    }
    if let Some(reason) = source.rejection() {
        response.smtp_code = Some(REJECT_SMTP_CODE);
        response.smtp_message = Some(reason.clone());
        response.reason = Some(reason);
    }

    Ok(Json(response))
}

/// Basic health response
#[derive(Debug, Serialize, Deserialize)]
pub struct HealthResponse {
    pub status: String,
}

pub async fn health() -> Json<HealthResponse> {
    Json(HealthResponse {
        status: "healthy".to_string(),
    })
}

/// Liveness check (is the process running)
pub async fn liveness() -> StatusCode {
    StatusCode::OK
}

/// Readiness check (is the key-value store reachable)
pub async fn readiness(State(state): State<Arc<AppState>>) -> Result<StatusCode, StatusCode> {
    state.store.ping().await.map_err(|e| {
        warn!("Readiness probe failed: {}", e);
        StatusCode::SERVICE_UNAVAILABLE
    })?;
    Ok(StatusCode::OK)
}

/// Message submitted over HTTP. Forwards go out through the relay; a
/// rejection is handed back in the response.
struct IngestSource {
    message: InboundMessage,
    relay: Arc<dyn Relay>,
    rejection: Mutex<Option<String>>,
}

impl IngestSource {
    /// Reason handed to `reject`, if the pipeline rejected the message
    fn rejection(&self) -> Option<String> {
        self.rejection.lock().ok().and_then(|r| r.clone())
    }
}

#[async_trait]
impl MessageSource for IngestSource {
    fn message(&self) -> &InboundMessage {
        &self.message
    }

    async fn forward(&self, address: &str, headers: &ExtraHeaders) -> anyhow::Result<()> {
        let raw = self.message.raw.as_deref().unwrap_or_default();
        let data = prepend_headers(headers, raw);
        self.relay.relay(&self.message.sender, address, &data).await
    }

    async fn reject(&self, reason: &str) -> anyhow::Result<()> {
        let mut rejection = self
            .rejection
            .lock()
            .map_err(|_| anyhow::anyhow!("rejection lock poisoned"))?;
        *rejection = Some(reason.to_string());
        Ok(())
    }
}

/// Build an `InboundMessage` from envelope data and raw bytes
pub fn parse_message(from: &str, to: &str, raw: &[u8]) -> InboundMessage {
    let (subject, body) = match mail_parser::MessageParser::default().parse(raw) {
        Some(parsed) => (
            parsed.subject().unwrap_or_default().to_string(),
            parsed
                .body_text(0)
                .map(|b| b.into_owned())
                .unwrap_or_default(),
        ),
        None => (String::new(), String::from_utf8_lossy(raw).into_owned()),
    };

    InboundMessage::new(from.trim(), to.trim(), subject, body)
        .with_headers(parse_header_block(raw))
        .with_raw(raw.to_vec())
}

/// Raw header values from the header block, with folded lines joined
fn parse_header_block(raw: &[u8]) -> HeaderMap {
    let text = String::from_utf8_lossy(raw);
    let mut headers = HeaderMap::new();
    let mut current: Option<(String, String)> = None;

    for line in text.split('\n') {
        let line = line.strip_suffix('\r').unwrap_or(line);
        if line.is_empty() {
            break;
        }
        if line.starts_with(' ') || line.starts_with('\t') {
            if let Some((_, ref mut value)) = current {
                value.push(' ');
                value.push_str(line.trim());
            }
            continue;
        }
        if let Some((name, value)) = current.take() {
            headers.insert(&name, value);
        }
        if let Some((name, value)) = line.split_once(':') {
            current = Some((name.trim().to_string(), value.trim().to_string()));
        }
    }
    if let Some((name, value)) = current {
        headers.insert(&name, value);
    }

    headers
}

#[cfg(test)]
mod tests {
    use super::*;
    use axum::body::{to_bytes, Body};
    use axum::http::Request;
    use mailrouter_common::types::DomainConfig;
    use mailrouter_common::Config;
    use mailrouter_storage::MemoryKvStore;
    use pretty_assertions::assert_eq;
    use tower::ServiceExt;

    const RAW: &str = "From: Alice <alice@sender.example>\r\n\
                       Subject: Quarterly\r\n \
                       numbers\r\n\
                       Message-ID: <1@sender.example>\r\n\
                       \r\n\
                       Numbers attached.\r\n";

    #[derive(Default)]
    struct RecordingRelay {
        sent: Mutex<Vec<(String, String, Vec<u8>)>>,
    }

    #[async_trait]
    impl Relay for RecordingRelay {
        async fn relay(&self, sender: &str, recipient: &str, raw: &[u8]) -> anyhow::Result<()> {
            self.sent
                .lock()
                .unwrap()
                .push((sender.to_string(), recipient.to_string(), raw.to_vec()));
            Ok(())
        }
    }

    fn app() -> (Router, Arc<RecordingRelay>) {
        let mut config = Config::default();
        config.routing.management_address = "ops@corp.example".to_string();
        config.routing.domains.insert(
            "corp.example".to_string(),
            DomainConfig {
                priority: false,
                default_forward: Some("inbox@corp.example".to_string()),
            },
        );

        let store: Arc<dyn KvStore> = Arc::new(MemoryKvStore::new());
        let relay = Arc::new(RecordingRelay::default());
        let processor = MessageProcessor::new(&config, store.clone()).unwrap();
        let state = Arc::new(AppState {
            processor: Arc::new(processor),
            relay: relay.clone(),
            store,
        });
        (create_router(state), relay)
    }

    async fn post_message(app: Router, body: serde_json::Value) -> (StatusCode, serde_json::Value) {
        let request = Request::builder()
            .method("POST")
            .uri("/v1/messages")
            .header("content-type", "application/json")
            .body(Body::from(body.to_string()))
            .unwrap();
        let response = app.oneshot(request).await.unwrap();
        let status = response.status();
        let bytes = to_bytes(response.into_body(), usize::MAX).await.unwrap();
        (status, serde_json::from_slice(&bytes).unwrap())
    }

    #[test]
    fn test_parse_message() {
        let message = parse_message(" bob@sender.example ", "hello@corp.example", RAW.as_bytes());
        assert_eq!(message.sender, "bob@sender.example");
        assert_eq!(message.subject, "Quarterly numbers");
        assert!(message.body.contains("Numbers attached."));
        assert_eq!(message.header("message-id"), Some("<1@sender.example>"));
        assert_eq!(message.header("SUBJECT"), Some("Quarterly numbers"));
        assert_eq!(message.raw_size, RAW.len());
    }

    #[tokio::test]
    async fn test_forwarded_through_relay() {
        let (app, relay) = app();
        let (status, body) = post_message(
            app,
            serde_json::json!({"from": "bob@sender.example", "to": "hello@corp.example", "raw": RAW}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "forward");
        assert_eq!(body["destination"], "inbox@corp.example");
        assert_eq!(body["priority"], false);

        let sent = relay.sent.lock().unwrap();
        assert_eq!(sent.len(), 1);
        assert_eq!(sent[0].1, "inbox@corp.example");
        let data = String::from_utf8(sent[0].2.clone()).unwrap();
        assert!(data.starts_with("X-MailRouter-Transaction: "));
        assert!(data.contains("X-MailRouter-Rule: domain_default\r\n"));
        assert!(data.ends_with(RAW));
    }

    #[tokio::test]
    async fn test_unconfigured_domain_rejected_with_550() {
        let (app, relay) = app();
        let (status, body) = post_message(
            app,
            serde_json::json!({"from": "bob@sender.example", "to": "hello@other.example", "raw": RAW}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "reject");
        assert_eq!(body["smtp_code"], 550);
        assert_eq!(body["smtp_message"], "domain not configured");
        assert!(relay.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_spam_rejected_with_550() {
        let (app, relay) = app();
        let raw = "From: promo@sender.example\r\nSubject: You have WON the lottery\r\n\r\nClaim now.\r\n";
        let (status, body) = post_message(
            app,
            serde_json::json!({"from": "promo@sender.example", "to": "hello@corp.example", "raw": raw}),
        )
        .await;

        assert_eq!(status, StatusCode::OK);
        assert_eq!(body["action"], "reject");
        assert_eq!(body["outcome"], "rejected");
        assert_eq!(body["smtp_code"], 550);
        assert_eq!(body["smtp_message"], "spam");
        assert_eq!(body["reason"], "spam");
        assert!(relay.sent.lock().unwrap().is_empty());
    }

    #[tokio::test]
    async fn test_forwarded_message_has_no_smtp_reply() {
        let (app, _) = app();
        let (_, body) = post_message(
            app,
            serde_json::json!({"from": "bob@sender.example", "to": "hello@corp.example", "raw": RAW}),
        )
        .await;
        assert!(body.get("smtp_code").is_none());
        assert!(body.get("reason").is_none());
    }

    #[tokio::test]
    async fn test_missing_recipient_is_bad_request() {
        let (app, _) = app();
        let (status, body) = post_message(
            app,
            serde_json::json!({"from": "bob@sender.example", "to": " ", "raw": RAW}),
        )
        .await;
        assert_eq!(status, StatusCode::BAD_REQUEST);
        assert_eq!(body["error"], "validation_error");
    }

    #[tokio::test]
    async fn test_health_endpoints() {
        for uri in ["/health", "/health/live", "/health/ready"] {
            let (app, _) = app();
            let response = app
                .oneshot(Request::builder().uri(uri).body(Body::empty()).unwrap())
                .await
                .unwrap();
            assert_eq!(response.status(), StatusCode::OK, "{}", uri);
        }
    }
}
