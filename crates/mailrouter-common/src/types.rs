//! Common types for MailRouter

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::fmt;
use std::str::FromStr;
use uuid::Uuid;

/// Unique identifier for one routing invocation
pub type TransactionId = Uuid;

/// Timestamp wrapper
pub type Timestamp = DateTime<Utc>;

/// Email address
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct EmailAddress {
    pub local: String,
    pub domain: String,
}

impl EmailAddress {
    /// Create a new email address
    pub fn new(local: impl Into<String>, domain: impl Into<String>) -> Self {
        Self {
            local: local.into(),
            domain: domain.into(),
        }
    }

    /// Parse an email address from a string.
    ///
    /// Accepts a bare address, `<addr>` or `Display Name <addr>`. The domain is
    /// lowercased. The split is on the last `@` so quoted local-parts
    /// containing `@` survive.
    pub fn parse(s: &str) -> Option<Self> {
        let s = s.trim();
        let s = match (s.rfind('<'), s.rfind('>')) {
            (Some(open), Some(close)) if open < close => s[open + 1..close].trim(),
            _ => s,
        };
        let (local, domain) = s.rsplit_once('@')?;
        if local.is_empty() || domain.is_empty() || domain.contains(char::is_whitespace) {
            return None;
        }
        Some(Self::new(local, domain.to_lowercase()))
    }

    /// Same mailbox regardless of local-part case
    pub fn same_mailbox(&self, other: &EmailAddress) -> bool {
        self.domain == other.domain && self.local.eq_ignore_ascii_case(&other.local)
    }

    /// Local-part used for routing: lowercased, with any `+tag` suffix removed
    pub fn routing_local(&self) -> String {
        let local = self.local.to_lowercase();
        match local.split_once('+') {
            Some((base, _)) if !base.is_empty() => base.to_string(),
            _ => local,
        }
    }
}

impl fmt::Display for EmailAddress {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}@{}", self.local, self.domain)
    }
}

impl FromStr for EmailAddress {
    type Err = crate::Error;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        Self::parse(s)
            .ok_or_else(|| crate::Error::Validation(format!("Invalid email address: {}", s)))
    }
}

/// Message header map with case-insensitive lookup.
///
/// Names are stored lowercased; the first occurrence of a repeated header wins.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
#[serde(from = "HashMap<String, String>", into = "HashMap<String, String>")]
pub struct HeaderMap {
    entries: HashMap<String, String>,
}

impl HeaderMap {
    pub fn new() -> Self {
        Self::default()
    }

    /// Insert a header unless one with the same name is already present
    pub fn insert(&mut self, name: &str, value: impl Into<String>) {
        self.entries
            .entry(name.to_ascii_lowercase())
            .or_insert_with(|| value.into());
    }

    pub fn get(&self, name: &str) -> Option<&str> {
        self.entries
            .get(&name.to_ascii_lowercase())
            .map(String::as_str)
    }

    pub fn contains(&self, name: &str) -> bool {
        self.entries.contains_key(&name.to_ascii_lowercase())
    }

    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }

    pub fn iter(&self) -> impl Iterator<Item = (&str, &str)> {
        self.entries.iter().map(|(k, v)| (k.as_str(), v.as_str()))
    }
}

impl From<HashMap<String, String>> for HeaderMap {
    fn from(map: HashMap<String, String>) -> Self {
        let mut headers = HeaderMap::new();
        for (name, value) in map {
            headers.insert(&name, value);
        }
        headers
    }
}

impl From<HeaderMap> for HashMap<String, String> {
    fn from(headers: HeaderMap) -> Self {
        headers.entries
    }
}

/// An inbound message as seen by the routing pipeline
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct InboundMessage {
    /// Envelope sender
    pub sender: String,
    /// Envelope recipient
    pub recipient: String,
    pub subject: String,
    pub headers: HeaderMap,
    /// Decoded text body
    pub body: String,
    /// Size of the raw message in bytes
    pub raw_size: usize,
    /// Raw RFC 5322 bytes, when the source kept them
    #[serde(default, skip_serializing)]
    pub raw: Option<Vec<u8>>,
    pub received_at: Timestamp,
}

impl InboundMessage {
    /// Build a message without raw bytes; `raw_size` is the body length
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        subject: impl Into<String>,
        body: impl Into<String>,
    ) -> Self {
        let body = body.into();
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            subject: subject.into(),
            headers: HeaderMap::new(),
            raw_size: body.len(),
            body,
            raw: None,
            received_at: Utc::now(),
        }
    }

    pub fn with_headers(mut self, headers: HeaderMap) -> Self {
        self.headers = headers;
        self
    }

    pub fn with_raw(mut self, raw: Vec<u8>) -> Self {
        self.raw_size = raw.len();
        self.raw = Some(raw);
        self
    }

    pub fn header(&self, name: &str) -> Option<&str> {
        self.headers.get(name)
    }

    pub fn recipient_address(&self) -> Option<EmailAddress> {
        EmailAddress::parse(&self.recipient)
    }

    pub fn sender_address(&self) -> Option<EmailAddress> {
        EmailAddress::parse(&self.sender)
    }
}

/// Message category (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "kebab-case")]
pub enum Category {
    Invoice,
    Receipt,
    Contract,
    Legal,
    Support,
    Complaint,
    Meeting,
    Calendar,
    Newsletter,
    Marketing,
    Personal,
    Business,
    ApiNotification,
    SecurityAlert,
    Compliance,
    Audit,
    Regulatory,
    Governance,
    Spam,
    General,
}

impl Category {
    pub const ALL: [Category; 20] = [
        Category::Invoice,
        Category::Receipt,
        Category::Contract,
        Category::Legal,
        Category::Support,
        Category::Complaint,
        Category::Meeting,
        Category::Calendar,
        Category::Newsletter,
        Category::Marketing,
        Category::Personal,
        Category::Business,
        Category::ApiNotification,
        Category::SecurityAlert,
        Category::Compliance,
        Category::Audit,
        Category::Regulatory,
        Category::Governance,
        Category::Spam,
        Category::General,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Category::Invoice => "invoice",
            Category::Receipt => "receipt",
            Category::Contract => "contract",
            Category::Legal => "legal",
            Category::Support => "support",
            Category::Complaint => "complaint",
            Category::Meeting => "meeting",
            Category::Calendar => "calendar",
            Category::Newsletter => "newsletter",
            Category::Marketing => "marketing",
            Category::Personal => "personal",
            Category::Business => "business",
            Category::ApiNotification => "api-notification",
            Category::SecurityAlert => "security-alert",
            Category::Compliance => "compliance",
            Category::Audit => "audit",
            Category::Regulatory => "regulatory",
            Category::Governance => "governance",
            Category::Spam => "spam",
            Category::General => "general",
        }
    }
}

/// Message sentiment (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Sentiment {
    Positive,
    Negative,
    Neutral,
    Urgent,
    Angry,
}

impl Sentiment {
    pub const ALL: [Sentiment; 5] = [
        Sentiment::Positive,
        Sentiment::Negative,
        Sentiment::Neutral,
        Sentiment::Urgent,
        Sentiment::Angry,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Sentiment::Positive => "positive",
            Sentiment::Negative => "negative",
            Sentiment::Neutral => "neutral",
            Sentiment::Urgent => "urgent",
            Sentiment::Angry => "angry",
        }
    }
}

/// Message urgency (closed set)
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Urgency {
    Critical,
    High,
    Normal,
    Low,
}

impl Urgency {
    pub const ALL: [Urgency; 4] = [Urgency::Critical, Urgency::High, Urgency::Normal, Urgency::Low];

    pub fn as_str(&self) -> &'static str {
        match self {
            Urgency::Critical => "critical",
            Urgency::High => "high",
            Urgency::Normal => "normal",
            Urgency::Low => "low",
        }
    }

    /// Critical or high
    pub fn is_elevated(&self) -> bool {
        matches!(self, Urgency::Critical | Urgency::High)
    }
}

macro_rules! impl_closed_set {
    ($ty:ty) => {
        impl fmt::Display for $ty {
            fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
                f.write_str(self.as_str())
            }
        }

        impl FromStr for $ty {
            type Err = crate::Error;

            fn from_str(s: &str) -> Result<Self, Self::Err> {
                let wanted = s.trim().to_ascii_lowercase();
                <$ty>::ALL
                    .iter()
                    .copied()
                    .find(|v| v.as_str() == wanted)
                    .ok_or_else(|| {
                        crate::Error::Validation(format!(
                            "Unknown {}: {}",
                            stringify!($ty).to_lowercase(),
                            s
                        ))
                    })
            }
        }
    };
}

impl_closed_set!(Category);
impl_closed_set!(Sentiment);
impl_closed_set!(Urgency);

/// An extracted entity, e.g. `amount: $1,200`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Entity {
    #[serde(rename = "type")]
    pub kind: String,
    pub value: String,
}

impl Entity {
    pub fn new(kind: impl Into<String>, value: impl Into<String>) -> Self {
        Self {
            kind: kind.into(),
            value: value.into(),
        }
    }
}

/// Where a classification came from
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ClassificationSource {
    /// At least one analysis was answered by the inference service
    Inference,
    /// Every field is a heuristic default
    Fallback,
}

/// Output of the classification engine
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ClassificationResult {
    pub category: Category,
    pub sentiment: Sentiment,
    pub urgency: Urgency,
    /// At most five entries
    pub entities: Vec<Entity>,
    pub source: ClassificationSource,
}

impl ClassificationResult {
    /// Heuristic defaults used when the inference service is absent or fails
    pub fn fallback(urgency_keyword_present: bool) -> Self {
        Self {
            category: Category::General,
            sentiment: Sentiment::Neutral,
            urgency: if urgency_keyword_present {
                Urgency::High
            } else {
                Urgency::Normal
            },
            entities: Vec::new(),
            source: ClassificationSource::Fallback,
        }
    }
}

impl Default for ClassificationResult {
    fn default() -> Self {
        Self::fallback(false)
    }
}

/// Downstream intake processes
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum Workstream {
    Litigation,
    Finance,
    Compliance,
}

impl Workstream {
    pub const ALL: [Workstream; 3] = [
        Workstream::Litigation,
        Workstream::Finance,
        Workstream::Compliance,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Workstream::Litigation => "litigation",
            Workstream::Finance => "finance",
            Workstream::Compliance => "compliance",
        }
    }

    /// Recipient local-parts that send a message straight to this workstream
    pub fn triggers(&self) -> &'static [&'static str] {
        match self {
            Workstream::Litigation => &["evidence", "litigation", "intake"],
            Workstream::Finance => &["finance", "accounting", "invoice", "billing", "payment"],
            Workstream::Compliance => &["compliance", "audit", "regulatory", "governance"],
        }
    }

    /// Workstream whose trigger set contains `local`
    pub fn for_local_part(local: &str) -> Option<Workstream> {
        Workstream::ALL
            .iter()
            .copied()
            .find(|w| w.triggers().contains(&local))
    }
}

impl_closed_set!(Workstream);

/// Static route table entry, keyed by recipient local-part.
///
/// Written in configuration as a plain string: `"discard"`,
/// `"workstream:<name>"` or an email address.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(try_from = "String", into = "String")]
pub enum RouteEntry {
    Forward(String),
    Discard,
    Workstream(Workstream),
}

impl TryFrom<String> for RouteEntry {
    type Error = crate::Error;

    fn try_from(value: String) -> Result<Self, Self::Error> {
        let trimmed = value.trim();
        if trimmed.eq_ignore_ascii_case("discard") {
            return Ok(RouteEntry::Discard);
        }
        if let Some(name) = trimmed.strip_prefix("workstream:") {
            return Ok(RouteEntry::Workstream(name.parse()?));
        }
        let address: EmailAddress = trimmed.parse()?;
        Ok(RouteEntry::Forward(address.to_string()))
    }
}

impl From<RouteEntry> for String {
    fn from(entry: RouteEntry) -> Self {
        match entry {
            RouteEntry::Forward(address) => address,
            RouteEntry::Discard => "discard".to_string(),
            RouteEntry::Workstream(w) => format!("workstream:{}", w),
        }
    }
}

/// Per-domain routing configuration
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct DomainConfig {
    /// Mark every message to this domain as priority
    #[serde(default)]
    pub priority: bool,
    /// Where unmatched mail for this domain goes
    pub default_forward: Option<String>,
}

/// The final destination of a message. Exactly one per message.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "action", rename_all = "snake_case")]
pub enum RoutingDecision {
    Forward { address: String },
    Discard,
    Dispatch { workstream: Workstream },
    Reject { reason: String },
}

impl RoutingDecision {
    pub fn forward(address: impl Into<String>) -> Self {
        RoutingDecision::Forward {
            address: address.into(),
        }
    }

    pub fn reject(reason: impl Into<String>) -> Self {
        RoutingDecision::Reject {
            reason: reason.into(),
        }
    }

    pub fn label(&self) -> &'static str {
        match self {
            RoutingDecision::Forward { .. } => "forward",
            RoutingDecision::Discard => "discard",
            RoutingDecision::Dispatch { .. } => "dispatch",
            RoutingDecision::Reject { .. } => "reject",
        }
    }
}

/// Which routing rule produced a decision
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RouteRule {
    UnconfiguredDomain,
    NoReply,
    WorkstreamTrigger,
    StaticRoute,
    LegalCategory,
    AngryComplaint,
    ElevatedUrgency,
    FinancialCategory,
    ComplianceCategory,
    DomainDefault,
    GlobalDefault,
}

impl RouteRule {
    pub fn as_str(&self) -> &'static str {
        match self {
            RouteRule::UnconfiguredDomain => "unconfigured_domain",
            RouteRule::NoReply => "no_reply",
            RouteRule::WorkstreamTrigger => "workstream_trigger",
            RouteRule::StaticRoute => "static_route",
            RouteRule::LegalCategory => "legal_category",
            RouteRule::AngryComplaint => "angry_complaint",
            RouteRule::ElevatedUrgency => "elevated_urgency",
            RouteRule::FinancialCategory => "financial_category",
            RouteRule::ComplianceCategory => "compliance_category",
            RouteRule::DomainDefault => "domain_default",
            RouteRule::GlobalDefault => "global_default",
        }
    }
}

impl fmt::Display for RouteRule {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// A routing decision plus metadata that never alters it
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct Resolution {
    pub decision: RoutingDecision,
    pub rule: RouteRule,
    /// Outbound annotation only
    pub priority: bool,
    /// Extracted entities should be kept for accounting
    pub record_entities: bool,
}
