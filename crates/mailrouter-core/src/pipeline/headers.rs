//! Routing headers added to forwarded messages

use mailrouter_common::types::{ClassificationResult, RouteRule, TransactionId};

pub const TRANSACTION: &str = "X-MailRouter-Transaction";
pub const RULE: &str = "X-MailRouter-Rule";
pub const CATEGORY: &str = "X-MailRouter-Category";
pub const SENTIMENT: &str = "X-MailRouter-Sentiment";
pub const URGENCY: &str = "X-MailRouter-Urgency";
pub const PRIORITY: &str = "X-MailRouter-Priority";

/// Build the outbound header block for a forward
pub fn routing_headers(
    transaction_id: TransactionId,
    rule: Option<RouteRule>,
    classification: Option<&ClassificationResult>,
    priority: bool,
) -> Vec<(String, String)> {
    let mut headers = vec![(TRANSACTION.to_string(), transaction_id.to_string())];

    if let Some(rule) = rule {
        headers.push((RULE.to_string(), rule.to_string()));
    }

    if let Some(classification) = classification {
        headers.push((CATEGORY.to_string(), classification.category.to_string()));
        headers.push((SENTIMENT.to_string(), classification.sentiment.to_string()));
        headers.push((URGENCY.to_string(), classification.urgency.to_string()));
    }

    if priority {
        headers.push(("X-Priority".to_string(), "1 (Highest)".to_string()));
        headers.push(("Importance".to_string(), "high".to_string()));
        headers.push((PRIORITY.to_string(), "high".to_string()));
    }

    headers
}
