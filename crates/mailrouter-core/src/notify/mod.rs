//! Notifier/Recorder - analytics and alert webhooks
//!
//! Both side channels are best-effort: failures are logged and swallowed, and
//! they only ever see a decision that is already final.

use crate::pipeline::ProcessingAction;
use crate::webhook::{sign_payload, validate_webhook_url, SIGNATURE_HEADER, TRANSACTION_HEADER};
use chrono::{DateTime, Utc};
use mailrouter_common::config::NotifierConfig;
use mailrouter_common::types::{
    Category, Entity, RouteRule, RoutingDecision, Sentiment, TransactionId, Urgency,
};
use mailrouter_storage::KvStore;
use reqwest::Client;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tokio::task::JoinHandle;
use tracing::{debug, warn};

/// What happened to one message
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingEvent {
    pub transaction_id: TransactionId,
    pub timestamp: DateTime<Utc>,
    pub sender: String,
    pub recipient: String,
    pub subject: String,
    pub decision: RoutingDecision,
    pub action: ProcessingAction,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub rule: Option<RouteRule>,
    pub priority: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub category: Option<Category>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub sentiment: Option<Sentiment>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub urgency: Option<Urgency>,
    /// Only filled when the routing rule asks for entity accounting
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub entities: Vec<Entity>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl RoutingEvent {
    /// Whether this event warrants an alert webhook
    pub fn is_alert(&self, alert_on_priority: bool) -> bool {
        matches!(
            self.action,
            ProcessingAction::DispatchFallback | ProcessingAction::Fallback
        ) || (alert_on_priority && self.priority)
    }

    fn day(&self) -> String {
        self.timestamp.format("%Y-%m-%d").to_string()
    }

    /// Key of the event record
    pub fn analytics_key(&self) -> String {
        format!("analytics:{}:{}", self.day(), self.transaction_id)
    }

    /// Key of the per-day counter for this event's action
    pub fn counter_key(&self) -> String {
        format!("analytics:{}:count:{}", self.day(), self.action.as_str())
    }
}

/// Best-effort recorder and alerter
#[derive(Clone)]
pub struct Notifier {
    store: Option<Arc<dyn KvStore>>,
    config: NotifierConfig,
    http_client: Client,
}

impl Notifier {
    pub fn new(store: Option<Arc<dyn KvStore>>, config: NotifierConfig) -> Self {
        Self {
            store,
            config,
            http_client: Client::new(),
        }
    }

    /// Notifier that does nothing
    pub fn disabled() -> Self {
        Self::new(
            None,
            NotifierConfig {
                analytics_enabled: false,
                webhook_url: None,
                ..NotifierConfig::default()
            },
        )
    }

    /// Record and notify in the background
    pub fn spawn(&self, event: RoutingEvent) -> JoinHandle<()> {
        let notifier = self.clone();
        tokio::spawn(async move {
            notifier.record(&event).await;
            notifier.notify(&event).await;
        })
    }

    /// Write the event and bump the day counter
    pub async fn record(&self, event: &RoutingEvent) {
        if let Err(e) = self.try_record(event).await {
            warn!(transaction_id = %event.transaction_id, "Failed to record routing event: {}", e);
        }
    }

    async fn try_record(&self, event: &RoutingEvent) -> anyhow::Result<()> {
        let store = match self.store {
            Some(ref store) if self.config.analytics_enabled => store,
            _ => return Ok(()),
        };

        let ttl = self.config.analytics_ttl_secs;
        let value = serde_json::to_vec(event)?;
        store.put(&event.analytics_key(), &value, ttl).await?;

        // Read-modify-write; concurrent events may lose an increment
        let counter_key = event.counter_key();
        let current = store
            .get(&counter_key)
            .await?
            .and_then(|raw| String::from_utf8(raw).ok())
            .and_then(|s| s.trim().parse::<u64>().ok())
            .unwrap_or(0);
        store
            .put(&counter_key, (current + 1).to_string().as_bytes(), ttl)
            .await?;

        debug!(key = %event.analytics_key(), "Routing event recorded");
        Ok(())
    }

    /// Send an alert webhook when the event calls for one
    pub async fn notify(&self, event: &RoutingEvent) {
        if !event.is_alert(self.config.alert_on_priority) {
            return;
        }
        let url = match self.config.webhook_url {
            Some(ref url) => url,
            None => return,
        };

        if let Err(e) = self.send_webhook(url, event).await {
            warn!(transaction_id = %event.transaction_id, "Alert webhook failed: {}", e);
        }
    }

    async fn send_webhook(&self, url: &str, event: &RoutingEvent) -> anyhow::Result<()> {
        let url = validate_webhook_url(url, self.config.allow_private)?;
        let body = serde_json::to_vec(event)?;

        let mut request = self
            .http_client
            .post(url)
            .header("Content-Type", "application/json")
            .header(TRANSACTION_HEADER, event.transaction_id.to_string())
            .timeout(Duration::from_millis(self.config.timeout_ms));

        if let Some(ref secret) = self.config.webhook_secret {
            request = request.header(SIGNATURE_HEADER, sign_payload(secret, &body)?);
        }

        let response = request.body(body).send().await?;
        if !response.status().is_success() {
            anyhow::bail!("webhook returned status {}", response.status());
        }

        debug!(transaction_id = %event.transaction_id, "Alert webhook delivered");
        Ok(())
    }
}
