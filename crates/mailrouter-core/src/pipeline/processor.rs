//! Message Processor - runs one message through the routing pipeline
//!
//! rate limit → obvious spam → domain check → classification → classifier spam
//! → resolution → execution → (spawned) analytics and alerts
//!
//! Every invocation ends in exactly one of forward, discard or reject. Internal
//! errors and timeouts forward the message to the safe fallback address.

use super::headers::routing_headers;
use super::source::{MessageSource, TerminalGuard};
use crate::classify::{ClassificationEngine, HttpInferenceClient};
use crate::dispatch::{DispatchOutcome, WorkstreamDispatcher};
use crate::notify::{Notifier, RoutingEvent};
use crate::ratelimit::{RateLimiter, RATE_LIMIT_REASON};
use crate::routing::{RoutingResolver, DOMAIN_NOT_CONFIGURED};
use crate::spam::{SpamFilter, SPAM_REASON};
use anyhow::{Context, Result};
use chrono::Utc;
use mailrouter_common::types::{
    ClassificationResult, RouteRule, RoutingDecision, TransactionId, Workstream,
};
use mailrouter_common::Config;
use mailrouter_storage::KvStore;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

/// What was actually done with a message
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProcessingAction {
    Forwarded,
    Discarded,
    Dispatched,
    /// Dispatch failed; forwarded to the management address instead
    DispatchFallback,
    Rejected,
    /// Internal error or timeout; forwarded to the safe fallback address
    Fallback,
}

impl ProcessingAction {
    pub fn as_str(&self) -> &'static str {
        match self {
            ProcessingAction::Forwarded => "forwarded",
            ProcessingAction::Discarded => "discarded",
            ProcessingAction::Dispatched => "dispatched",
            ProcessingAction::DispatchFallback => "dispatch_fallback",
            ProcessingAction::Rejected => "rejected",
            ProcessingAction::Fallback => "fallback",
        }
    }
}

/// Result of one invocation
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessingOutcome {
    pub transaction_id: TransactionId,
    /// The routing decision; never revised after it is made
    pub decision: RoutingDecision,
    pub action: ProcessingAction,
    /// Address the message was forwarded to, if any
    pub destination: Option<String>,
    pub rule: Option<RouteRule>,
    pub priority: bool,
    pub classification: Option<ClassificationResult>,
    pub record_entities: bool,
    pub error: Option<String>,
}

impl ProcessingOutcome {
    fn new(transaction_id: TransactionId, decision: RoutingDecision, action: ProcessingAction) -> Self {
        Self {
            transaction_id,
            decision,
            action,
            destination: None,
            rule: None,
            priority: false,
            classification: None,
            record_entities: false,
            error: None,
        }
    }

    fn rejected(transaction_id: TransactionId, reason: &str) -> Self {
        Self::new(
            transaction_id,
            RoutingDecision::reject(reason),
            ProcessingAction::Rejected,
        )
    }
}

/// Message processor
pub struct MessageProcessor {
    rate_limiter: Option<RateLimiter>,
    spam_filter: SpamFilter,
    classifier: ClassificationEngine,
    resolver: RoutingResolver,
    dispatcher: WorkstreamDispatcher,
    notifier: Notifier,
    safe_fallback_address: String,
    timeout: Duration,
}

impl MessageProcessor {
    /// Build a processor from configuration
    pub fn new(config: &Config, store: Arc<dyn KvStore>) -> Result<Self> {
        let classifier = match config.inference.endpoint {
            Some(_) => {
                let client = HttpInferenceClient::new(&config.inference)
                    .context("Failed to create inference client")?;
                ClassificationEngine::new(Arc::new(client))
            }
            None => {
                info!("No inference endpoint configured, classification uses fallbacks");
                ClassificationEngine::disabled()
            }
        };

        let rate_limiter = if config.rate_limit.enabled {
            Some(RateLimiter::new(store.clone(), &config.rate_limit))
        } else {
            None
        };

        Ok(Self {
            rate_limiter,
            spam_filter: SpamFilter::new(&config.spam),
            classifier,
            resolver: RoutingResolver::new(&config.routing, &config.workstreams),
            dispatcher: WorkstreamDispatcher::new(
                config.workstreams.clone(),
                config.routing.management_address.clone(),
            ),
            notifier: Notifier::new(Some(store), config.notifier.clone()),
            safe_fallback_address: config.routing.safe_fallback_address.clone(),
            timeout: Duration::from_millis(config.server.processing_timeout_ms),
        })
    }

    /// Replace the classification engine
    pub fn with_classifier(mut self, classifier: ClassificationEngine) -> Self {
        self.classifier = classifier;
        self
    }

    /// Replace the notifier
    pub fn with_notifier(mut self, notifier: Notifier) -> Self {
        self.notifier = notifier;
        self
    }

    /// Process one message. Always yields an outcome.
    pub async fn process(&self, source: &dyn MessageSource) -> ProcessingOutcome {
        let transaction_id = Uuid::new_v4();
        let guard = TerminalGuard::new(source);

        let outcome = match tokio::time::timeout(self.timeout, self.route(transaction_id, &guard)).await {
            Ok(Ok(outcome)) => outcome,
            Ok(Err(e)) => self.fallback(transaction_id, &guard, format!("{:#}", e)).await,
            Err(_) => {
                self.fallback(transaction_id, &guard, "processing timed out".to_string())
                    .await
            }
        };

        info!(
            transaction_id = %transaction_id,
            action = outcome.action.as_str(),
            decision = outcome.decision.label(),
            rule = outcome.rule.map(|r| r.as_str()).unwrap_or("-"),
            priority = outcome.priority,
            "Message routed"
        );

        self.notifier.spawn(self.event(&guard, &outcome));
        outcome
    }

    async fn route(
        &self,
        transaction_id: TransactionId,
        guard: &TerminalGuard<'_>,
    ) -> Result<ProcessingOutcome> {
        let message = guard.message();

        if let Some(ref limiter) = self.rate_limiter {
            if self.over_rate_limit(limiter, &message.sender).await {
                info!(transaction_id = %transaction_id, sender = %message.sender, "Sender over rate limit");
                return self.reject(transaction_id, guard, RATE_LIMIT_REASON).await;
            }
        }

        if let Some(hit) = self.spam_filter.check_rules(message) {
            info!(transaction_id = %transaction_id, "Obvious spam: {:?}", hit);
            return self.reject(transaction_id, guard, SPAM_REASON).await;
        }

        if !self.resolver.accepts(message) {
            info!(transaction_id = %transaction_id, recipient = %message.recipient, "Recipient domain not configured");
            let mut outcome = self.reject(transaction_id, guard, DOMAIN_NOT_CONFIGURED).await?;
            outcome.rule = Some(RouteRule::UnconfiguredDomain);
            return Ok(outcome);
        }

        let classification = self.classifier.classify(&message.subject, &message.body).await;

        if self.spam_filter.is_ai_spam(&classification) {
            info!(transaction_id = %transaction_id, "Classifier labelled message as spam");
            let mut outcome = self.reject(transaction_id, guard, SPAM_REASON).await?;
            outcome.classification = Some(classification);
            return Ok(outcome);
        }

        let resolution = self.resolver.resolve(message, &classification);
        debug!(
            transaction_id = %transaction_id,
            rule = %resolution.rule,
            decision = resolution.decision.label(),
            "Routing resolved"
        );

        let mut outcome = match resolution.decision {
            RoutingDecision::Forward { ref address } => {
                self.forward(transaction_id, guard, address, resolution.rule, &classification, resolution.priority)
                    .await?;
                let mut outcome = ProcessingOutcome::new(
                    transaction_id,
                    resolution.decision.clone(),
                    ProcessingAction::Forwarded,
                );
                outcome.destination = Some(address.clone());
                outcome
            }
            RoutingDecision::Discard => ProcessingOutcome::new(
                transaction_id,
                RoutingDecision::Discard,
                ProcessingAction::Discarded,
            ),
            RoutingDecision::Dispatch { workstream } => {
                self.dispatch(transaction_id, guard, workstream, resolution.rule, &classification, resolution.priority)
                    .await?
            }
            RoutingDecision::Reject { ref reason } => {
                self.reject(transaction_id, guard, reason).await?
            }
        };

        outcome.rule = Some(resolution.rule);
        outcome.priority = resolution.priority;
        outcome.record_entities = resolution.record_entities;
        outcome.classification = Some(classification);
        Ok(outcome)
    }

    /// Count the send, then check it. Store failures let the message through.
    async fn over_rate_limit(&self, limiter: &RateLimiter, sender: &str) -> bool {
        if let Err(e) = limiter.record_send(sender).await {
            warn!("Rate limiter update failed for {}: {}", sender, e);
            return false;
        }
        match limiter.should_reject(sender).await {
            Ok(reject) => reject,
            Err(e) => {
                warn!("Rate limiter check failed for {}: {}", sender, e);
                false
            }
        }
    }

    async fn reject(
        &self,
        transaction_id: TransactionId,
        guard: &TerminalGuard<'_>,
        reason: &str,
    ) -> Result<ProcessingOutcome> {
        guard.reject(reason).await.context("Reject failed")?;
        Ok(ProcessingOutcome::rejected(transaction_id, reason))
    }

    async fn forward(
        &self,
        transaction_id: TransactionId,
        guard: &TerminalGuard<'_>,
        address: &str,
        rule: RouteRule,
        classification: &ClassificationResult,
        priority: bool,
    ) -> Result<()> {
        let headers = routing_headers(transaction_id, Some(rule), Some(classification), priority);
        guard
            .forward(address, &headers)
            .await
            .with_context(|| format!("Forward to {} failed", address))?;
        Ok(())
    }

    async fn dispatch(
        &self,
        transaction_id: TransactionId,
        guard: &TerminalGuard<'_>,
        workstream: Workstream,
        rule: RouteRule,
        classification: &ClassificationResult,
        priority: bool,
    ) -> Result<ProcessingOutcome> {
        let decision = RoutingDecision::Dispatch { workstream };
        let dispatched = self
            .dispatcher
            .dispatch(transaction_id, guard.message(), classification, workstream)
            .await;

        match dispatched {
            DispatchOutcome::Delivered { .. } => Ok(ProcessingOutcome::new(
                transaction_id,
                decision,
                ProcessingAction::Dispatched,
            )),
            DispatchOutcome::Fallback {
                management_address,
                error,
                ..
            } => {
                self.forward(transaction_id, guard, &management_address, rule, classification, priority)
                    .await?;
                let mut outcome =
                    ProcessingOutcome::new(transaction_id, decision, ProcessingAction::DispatchFallback);
                outcome.destination = Some(management_address);
                outcome.error = Some(error);
                Ok(outcome)
            }
        }
    }

    /// Forward to the safe fallback address after an internal failure. A
    /// failing fallback is recorded and not retried.
    async fn fallback(
        &self,
        transaction_id: TransactionId,
        guard: &TerminalGuard<'_>,
        error: String,
    ) -> ProcessingOutcome {
        error!(transaction_id = %transaction_id, "Routing failed, using safe fallback: {}", error);

        let mut outcome = ProcessingOutcome::new(
            transaction_id,
            RoutingDecision::forward(&self.safe_fallback_address),
            ProcessingAction::Fallback,
        );

        if guard.is_taken() {
            outcome.error = Some(error);
            return outcome;
        }

        let headers = routing_headers(transaction_id, None, None, false);
        match guard.forward(&self.safe_fallback_address, &headers).await {
            Ok(()) => {
                outcome.destination = Some(self.safe_fallback_address.clone());
                outcome.error = Some(error);
            }
            Err(e) => {
                error!(transaction_id = %transaction_id, "Safe fallback forward failed: {}", e);
                outcome.error = Some(format!("{}; fallback forward failed: {}", error, e));
            }
        }
        outcome
    }

    fn event(&self, guard: &TerminalGuard<'_>, outcome: &ProcessingOutcome) -> RoutingEvent {
        let message = guard.message();
        let classification = outcome.classification.as_ref();
        RoutingEvent {
            transaction_id: outcome.transaction_id,
            timestamp: Utc::now(),
            sender: message.sender.clone(),
            recipient: message.recipient.clone(),
            subject: message.subject.clone(),
            decision: outcome.decision.clone(),
            action: outcome.action,
            rule: outcome.rule,
            priority: outcome.priority,
            category: classification.map(|c| c.category),
            sentiment: classification.map(|c| c.sentiment),
            urgency: classification.map(|c| c.urgency),
            entities: match classification {
                Some(c) if outcome.record_entities => c.entities.clone(),
                _ => Vec::new(),
            },
            error: outcome.error.clone(),
        }
    }
}
