//! Prompt construction and response validation for the four analyses
//!
//! Every prompt carries the subject plus at most `BODY_PREVIEW_CHARS`
//! characters of body. Responses are expected to be a single token (or, for
//! entities, a few `type:value` lines) and are validated against closed sets.

use mailrouter_common::types::{Category, Entity, Sentiment, Urgency};
use std::str::FromStr;

/// Body characters sent to the inference service
pub const BODY_PREVIEW_CHARS: usize = 500;

/// Maximum entities kept per message
pub const MAX_ENTITIES: usize = 5;

pub const LABEL_MAX_TOKENS: u32 = 10;
pub const ENTITIES_MAX_TOKENS: u32 = 100;

/// Words that make a message a candidate for elevated urgency
pub const URGENCY_KEYWORDS: &[&str] = &[
    "urgent",
    "asap",
    "emergency",
    "critical",
    "immediately",
    "immediate action",
    "deadline",
    "time-sensitive",
    "time sensitive",
    "action required",
    "outage",
    "breach",
];

/// First `max_chars` characters of `body`
pub fn truncate_body(body: &str, max_chars: usize) -> &str {
    match body.char_indices().nth(max_chars) {
        Some((idx, _)) => &body[..idx],
        None => body,
    }
}

/// Whether subject or body mention any urgency keyword
pub fn has_urgency_keyword(subject: &str, body: &str) -> bool {
    let subject = subject.to_lowercase();
    let body = body.to_lowercase();
    URGENCY_KEYWORDS
        .iter()
        .any(|k| subject.contains(k) || body.contains(k))
}

fn join_labels<'a>(labels: impl Iterator<Item = &'a str>) -> String {
    labels.collect::<Vec<_>>().join(", ")
}

fn email_block(subject: &str, body: &str) -> String {
    format!("Subject: {}\nBody: {}", subject, body)
}

pub fn category_prompt(subject: &str, body: &str) -> String {
    format!(
        "Classify the email into exactly one category.\nCategories: {}\n\
         Answer with the category name only.\n\n{}",
        join_labels(Category::ALL.iter().map(|c| c.as_str())),
        email_block(subject, body)
    )
}

pub fn sentiment_prompt(subject: &str, body: &str) -> String {
    format!(
        "Rate the sentiment of the email.\nSentiments: {}\n\
         Answer with one word only.\n\n{}",
        join_labels(Sentiment::ALL.iter().map(|s| s.as_str())),
        email_block(subject, body)
    )
}

pub fn urgency_prompt(subject: &str, body: &str) -> String {
    format!(
        "How urgent is this email for the recipient?\nUrgency levels: {}\n\
         Answer with one word only.\n\n{}",
        join_labels(Urgency::ALL.iter().map(|u| u.as_str())),
        email_block(subject, body)
    )
}

pub fn entities_prompt(subject: &str, body: &str) -> String {
    format!(
        "Extract up to {} key entities (people, companies, amounts, dates, case or invoice numbers) \
         from the email.\nWrite one per line as type:value and nothing else.\n\n{}",
        MAX_ENTITIES,
        email_block(subject, body)
    )
}

/// Normalize a one-word answer: first non-empty line, surrounding quotes and
/// punctuation removed.
fn normalize_label(response: &str) -> Option<String> {
    let line = response.lines().map(str::trim).find(|l| !l.is_empty())?;
    let cleaned = line
        .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-')
        .to_ascii_lowercase();
    if cleaned.is_empty() {
        None
    } else {
        Some(cleaned)
    }
}

/// Validate a label against a closed set. The whole answer is tried first,
/// then its first word ("invoice." or "Invoice - it bills").
pub fn parse_label<T: FromStr>(response: &str) -> Option<T> {
    let label = normalize_label(response)?;
    if let Ok(value) = label.parse() {
        return Some(value);
    }
    let first = label
        .split(|c: char| c.is_whitespace() || c == ':' || c == ',')
        .next()?
        .trim_matches(|c: char| !c.is_ascii_alphanumeric() && c != '-');
    first.parse().ok()
}

/// Parse `type:value` lines; lines without a colon are dropped
pub fn parse_entities(response: &str) -> Vec<Entity> {
    response
        .lines()
        .filter_map(|line| {
            let line = line.trim().trim_start_matches(|c: char| c == '-' || c == '*').trim();
            let (kind, value) = line.split_once(':')?;
            let (kind, value) = (kind.trim(), value.trim());
            if kind.is_empty() || value.is_empty() {
                return None;
            }
            Some(Entity::new(kind.to_lowercase(), value))
        })
        .take(MAX_ENTITIES)
        .collect()
}
