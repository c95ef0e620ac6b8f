//! Spam filtering module
//!
//! Two opinions feed the reject decision:
//! - rule-based heuristics on sender and subject, run before classification
//! - the classifier's category, when an inference service is configured

pub mod rules;

pub use rules::{SpamMatch, SpamRules, DEFAULT_SPAM_KEYWORDS};

use mailrouter_common::config::SpamConfig;
use mailrouter_common::types::{Category, ClassificationResult, ClassificationSource, InboundMessage};

/// Reject reason returned to the sender
pub const SPAM_REASON: &str = "spam";

/// Combined spam filter
pub struct SpamFilter {
    rules: SpamRules,
    ai_check: bool,
}

impl SpamFilter {
    /// Create a spam filter from configuration
    pub fn new(config: &SpamConfig) -> Self {
        Self {
            rules: SpamRules::new(&config.keywords),
            ai_check: config.ai_check,
        }
    }

    /// Cheap pre-classification check
    pub fn is_obvious_spam(&self, message: &InboundMessage) -> bool {
        self.check_rules(message).is_some()
    }

    /// Same as `is_obvious_spam`, reporting which heuristic fired
    pub fn check_rules(&self, message: &InboundMessage) -> Option<SpamMatch> {
        self.rules.check(message)
    }

    /// Classifier opinion. Fallback classifications never count, since they
    /// carry no information from the inference service.
    pub fn is_ai_spam(&self, classification: &ClassificationResult) -> bool {
        self.ai_check
            && classification.source == ClassificationSource::Inference
            && classification.category == Category::Spam
    }
}

impl Default for SpamFilter {
    fn default() -> Self {
        Self::new(&SpamConfig::default())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn spam_classification() -> ClassificationResult {
        ClassificationResult {
            category: Category::Spam,
            source: ClassificationSource::Inference,
            ..ClassificationResult::default()
        }
    }

    #[test]
    fn test_obvious_spam() {
        let filter = SpamFilter::default();
        let message = InboundMessage::new("a@b.com", "c@d.com", "FREE MONEY inside", "");
        assert!(filter.is_obvious_spam(&message));

        let message = InboundMessage::new("a@b.com", "c@d.com", "Quarterly report", "");
        assert!(!filter.is_obvious_spam(&message));
    }

    #[test]
    fn test_ai_spam() {
        let filter = SpamFilter::default();
        assert!(filter.is_ai_spam(&spam_classification()));
        assert!(!filter.is_ai_spam(&ClassificationResult::default()));
    }

    #[test]
    fn test_ai_spam_disabled() {
        let filter = SpamFilter::new(&SpamConfig {
            keywords: Vec::new(),
            ai_check: false,
        });
        assert!(!filter.is_ai_spam(&spam_classification()));
    }
}
