//! Routing resolver - maps a classified message to exactly one decision
//!
//! Rules are evaluated in order and the first match wins:
//!
//! 1. no-reply recipients are discarded
//! 2. workstream trigger local-parts go to their workstream
//! 3. static routes
//! 4. classification overrides (legal, angry complaint, urgency, invoices, compliance)
//! 5. domain default, then global default, then the management address
//!
//! A recipient domain without configuration is rejected after rule 1 unless a
//! global default exists, in which case it runs the same rules with the global
//! default as its rule 5 address.
//!
//! Resolution never performs I/O. Priority is computed alongside the decision
//! and only affects outbound annotation.

use mailrouter_common::config::{RoutingConfig, WorkstreamsConfig};
use mailrouter_common::types::{
    Category, ClassificationResult, EmailAddress, InboundMessage, Resolution, RouteEntry,
    RouteRule, RoutingDecision, Sentiment, Workstream,
};
use std::collections::{HashMap, HashSet};

/// Reject reason for mail to a domain nobody configured
pub const DOMAIN_NOT_CONFIGURED: &str = "domain not configured";

/// Local-parts that always mark a message as priority
const PRIORITY_LOCAL_PARTS: &[&str] = &["legal", "security", "abuse"];

/// Immutable routing tables for one invocation
#[derive(Debug, Clone)]
pub struct RoutingResolver {
    routing: RoutingConfig,
    configured: HashSet<Workstream>,
    trusted_senders: Vec<EmailAddress>,
    exemptions: HashSet<String>,
    /// Static routes keyed by lowercased local-part
    routes: HashMap<String, RouteEntry>,
}

impl RoutingResolver {
    /// Build a resolver from configuration
    pub fn new(routing: &RoutingConfig, workstreams: &WorkstreamsConfig) -> Self {
        let configured = Workstream::ALL
            .iter()
            .copied()
            .filter(|w| workstreams.is_configured(*w))
            .collect();

        Self {
            trusted_senders: routing
                .trusted_senders
                .iter()
                .filter_map(|s| EmailAddress::parse(s))
                .collect(),
            exemptions: routing
                .personal_exemptions
                .iter()
                .map(|l| l.trim().to_lowercase())
                .collect(),
            routes: routing
                .routes
                .iter()
                .map(|(local, entry)| (local.trim().to_lowercase(), entry.clone()))
                .collect(),
            routing: routing.clone(),
            configured,
        }
    }

    pub fn management_address(&self) -> &str {
        &self.routing.management_address
    }

    /// Whether mail for `domain` is accepted at all
    pub fn accepts_domain(&self, domain: &str) -> bool {
        self.routing.domains.contains_key(&domain.to_lowercase())
            || self.routing.default_forward.is_some()
    }

    /// Whether `message` can be routed at all. No-reply recipients always
    /// can, since they are discarded whatever their domain.
    pub fn accepts(&self, message: &InboundMessage) -> bool {
        match message.recipient_address() {
            Some(recipient) => {
                is_noreply(&recipient.routing_local()) || self.accepts_domain(&recipient.domain)
            }
            None => self.routing.default_forward.is_some(),
        }
    }

    fn is_trusted(&self, message: &InboundMessage) -> bool {
        message
            .sender_address()
            .map(|sender| self.trusted_senders.iter().any(|t| t.same_mailbox(&sender)))
            .unwrap_or(false)
    }

    /// Resolve the routing decision for a classified message
    pub fn resolve(
        &self,
        message: &InboundMessage,
        classification: &ClassificationResult,
    ) -> Resolution {
        let recipient = message.recipient_address();
        let local = recipient
            .as_ref()
            .map(EmailAddress::routing_local)
            .unwrap_or_default();

        let domain_config = recipient
            .as_ref()
            .and_then(|r| self.routing.domains.get(&r.domain));

        let priority = domain_config.map(|d| d.priority).unwrap_or(false)
            || PRIORITY_LOCAL_PARTS.contains(&local.as_str())
            || self.is_trusted(message)
            || classification.urgency.is_elevated();

        let resolution = |decision, rule| Resolution {
            decision,
            rule,
            priority,
            record_entities: false,
        };

        // 1. no-reply
        if is_noreply(&local) {
            return resolution(RoutingDecision::Discard, RouteRule::NoReply);
        }

        if domain_config.is_none() && self.routing.default_forward.is_none() {
            return resolution(
                RoutingDecision::reject(DOMAIN_NOT_CONFIGURED),
                RouteRule::UnconfiguredDomain,
            );
        }

        let domain_default = domain_config.and_then(|d| d.default_forward.as_ref());
        let default_address = domain_default
            .or(self.routing.default_forward.as_ref())
            .unwrap_or(&self.routing.management_address);
        let default_rule = if domain_default.is_some() {
            RouteRule::DomainDefault
        } else {
            RouteRule::GlobalDefault
        };

        // 2. workstream triggers
        if let Some(workstream) = Workstream::for_local_part(&local) {
            return resolution(
                self.dispatch_or_management(workstream),
                RouteRule::WorkstreamTrigger,
            );
        }

        // 3. static routes
        if let Some(entry) = self.routes.get(&local) {
            let decision = match entry {
                RouteEntry::Forward(address) => RoutingDecision::forward(address),
                RouteEntry::Discard => RoutingDecision::Discard,
                RouteEntry::Workstream(workstream) => self.dispatch_or_management(*workstream),
            };
            return resolution(decision, RouteRule::StaticRoute);
        }

        // 4. classification overrides
        let category = classification.category;

        if matches!(category, Category::Legal | Category::Contract) {
            return resolution(
                self.dispatch_or_management(Workstream::Litigation),
                RouteRule::LegalCategory,
            );
        }

        if category == Category::Complaint && classification.sentiment == Sentiment::Angry {
            return resolution(
                RoutingDecision::forward(self.management_address()),
                RouteRule::AngryComplaint,
            );
        }

        if classification.urgency.is_elevated() && !self.exemptions.contains(&local) {
            return resolution(
                RoutingDecision::forward(self.management_address()),
                RouteRule::ElevatedUrgency,
            );
        }

        if matches!(category, Category::Invoice | Category::Receipt) {
            let decision = if self.configured.contains(&Workstream::Finance) {
                RoutingDecision::Dispatch {
                    workstream: Workstream::Finance,
                }
            } else {
                RoutingDecision::forward(default_address)
            };
            return Resolution {
                record_entities: true,
                ..resolution(decision, RouteRule::FinancialCategory)
            };
        }

        if matches!(
            category,
            Category::Compliance | Category::Audit | Category::Regulatory | Category::Governance
        ) && self.configured.contains(&Workstream::Compliance)
        {
            return resolution(
                RoutingDecision::Dispatch {
                    workstream: Workstream::Compliance,
                },
                RouteRule::ComplianceCategory,
            );
        }

        // 5. defaults
        resolution(RoutingDecision::forward(default_address), default_rule)
    }

    fn dispatch_or_management(&self, workstream: Workstream) -> RoutingDecision {
        if self.configured.contains(&workstream) {
            RoutingDecision::Dispatch { workstream }
        } else {
            RoutingDecision::forward(self.management_address())
        }
    }
}

/// Resolve without keeping a resolver around
pub fn resolve(
    message: &InboundMessage,
    routing: &RoutingConfig,
    workstreams: &WorkstreamsConfig,
    classification: &ClassificationResult,
) -> Resolution {
    RoutingResolver::new(routing, workstreams).resolve(message, classification)
}

fn is_noreply(local: &str) -> bool {
    local.contains("noreply") || local.contains("no-reply")
}
