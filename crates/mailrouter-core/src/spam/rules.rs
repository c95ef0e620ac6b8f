//! Cheap spam heuristics over sender and subject
//!
//! These run before classification, so they must never touch the network.

use mailrouter_common::types::InboundMessage;
use regex::Regex;
use tracing::{debug, warn};

/// Built-in subject keywords, matched as case-insensitive substrings
pub const DEFAULT_SPAM_KEYWORDS: &[&str] = &[
    "viagra",
    "cialis",
    "lottery",
    "you have won",
    "you've won",
    "casino",
    "crypto giveaway",
    "free money",
    "make money fast",
    "work from home",
    "nigerian prince",
    "weight loss",
    "100% free",
    "act now",
    "limited time offer",
    "claim your prize",
    "double your income",
    "risk-free",
];

/// Which heuristic flagged a message
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum SpamMatch {
    /// Subject contained a keyword
    SubjectKeyword(String),
    /// Sender matched a suspicious pattern
    SenderPattern(&'static str),
}

/// Sender patterns applied to the whole envelope sender
const SENDER_PATTERNS: &[(&str, &str)] = &[
    // Long runs of digits right before the domain, e.g. 839201@
    ("SENDER_NUMERIC_LOCAL", r"\d{5,}@"),
];

/// Rule-based obvious-spam detector
pub struct SpamRules {
    keywords: Vec<String>,
    sender_patterns: Vec<(&'static str, Regex)>,
}

impl SpamRules {
    /// Create rules with the given keywords, or the built-in list when empty
    pub fn new(keywords: &[String]) -> Self {
        let keywords: Vec<String> = if keywords.is_empty() {
            DEFAULT_SPAM_KEYWORDS.iter().map(|k| k.to_string()).collect()
        } else {
            keywords
                .iter()
                .map(|k| k.trim().to_lowercase())
                .filter(|k| !k.is_empty())
                .collect()
        };

        let mut sender_patterns = Vec::with_capacity(SENDER_PATTERNS.len());
        for (name, pattern) in SENDER_PATTERNS {
            match Regex::new(pattern) {
                Ok(regex) => sender_patterns.push((*name, regex)),
                Err(e) => warn!("Skipping invalid sender pattern {}: {}", name, e),
            }
        }

        Self {
            keywords,
            sender_patterns,
        }
    }

    pub fn keywords(&self) -> &[String] {
        &self.keywords
    }

    /// First heuristic that flags the message, if any
    pub fn check(&self, message: &InboundMessage) -> Option<SpamMatch> {
        let subject = message.subject.to_lowercase();
        if let Some(keyword) = self.keywords.iter().find(|k| subject.contains(k.as_str())) {
            debug!("Subject keyword '{}' matched", keyword);
            return Some(SpamMatch::SubjectKeyword(keyword.clone()));
        }

        let sender = message.sender.trim();
        for (name, regex) in &self.sender_patterns {
            if regex.is_match(sender) {
                debug!("Sender pattern {} matched {}", name, sender);
                return Some(SpamMatch::SenderPattern(name));
            }
        }

        let local = sender.rsplit_once('@').map(|(l, _)| l).unwrap_or(sender);
        if local.contains("..") {
            return Some(SpamMatch::SenderPattern("SENDER_DOUBLE_DOT"));
        }

        None
    }
}

impl Default for SpamRules {
    fn default() -> Self {
        Self::new(&[])
    }
}
