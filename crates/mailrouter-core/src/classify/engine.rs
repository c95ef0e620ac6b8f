//! Classification engine
//!
//! Runs the category, sentiment, urgency and entity analyses concurrently and
//! folds their answers into one `ClassificationResult`. Each analysis falls
//! back independently, so one failing call never affects the others.

use super::inference::InferenceClient;
use super::prompts::{
    category_prompt, entities_prompt, has_urgency_keyword, parse_entities, parse_label,
    sentiment_prompt, truncate_body, urgency_prompt, BODY_PREVIEW_CHARS, ENTITIES_MAX_TOKENS,
    LABEL_MAX_TOKENS,
};
use mailrouter_common::types::{
    Category, ClassificationResult, ClassificationSource, Entity, Sentiment, Urgency,
};
use std::sync::Arc;
use tracing::{debug, warn};

/// Classification engine
#[derive(Clone, Default)]
pub struct ClassificationEngine {
    client: Option<Arc<dyn InferenceClient>>,
}

impl ClassificationEngine {
    /// Engine backed by an inference service
    pub fn new(client: Arc<dyn InferenceClient>) -> Self {
        Self {
            client: Some(client),
        }
    }

    /// Engine that always returns fallback results
    pub fn disabled() -> Self {
        Self { client: None }
    }

    /// Classify a message. Never fails.
    pub async fn classify(&self, subject: &str, body: &str) -> ClassificationResult {
        let urgency_keyword = has_urgency_keyword(subject, body);

        let client = match self.client {
            Some(ref client) => client.as_ref(),
            None => return ClassificationResult::fallback(urgency_keyword),
        };

        let body = truncate_body(body, BODY_PREVIEW_CHARS);

        let (category, sentiment, urgency, entities) = tokio::join!(
            self.label::<Category>(client, "category", category_prompt(subject, body)),
            self.label::<Sentiment>(client, "sentiment", sentiment_prompt(subject, body)),
            async {
                if urgency_keyword {
                    self.label::<Urgency>(client, "urgency", urgency_prompt(subject, body))
                        .await
                } else {
                    None
                }
            },
            self.entities(client, entities_prompt(subject, body)),
        );

        let answered =
            category.is_some() || sentiment.is_some() || urgency.is_some() || entities.is_some();

        let result = ClassificationResult {
            category: category.unwrap_or(Category::General),
            sentiment: sentiment.unwrap_or(Sentiment::Neutral),
            urgency: urgency.unwrap_or(if urgency_keyword {
                Urgency::High
            } else {
                Urgency::Normal
            }),
            entities: entities.unwrap_or_default(),
            source: if answered {
                ClassificationSource::Inference
            } else {
                ClassificationSource::Fallback
            },
        };

        debug!(
            category = %result.category,
            sentiment = %result.sentiment,
            urgency = %result.urgency,
            entities = result.entities.len(),
            "Message classified"
        );

        result
    }

    /// One closed-set analysis. `None` on error or an answer outside the set.
    async fn label<T: std::str::FromStr>(
        &self,
        client: &dyn InferenceClient,
        analysis: &'static str,
        prompt: String,
    ) -> Option<T> {
        match client.run(&prompt, LABEL_MAX_TOKENS).await {
            Ok(response) => {
                let parsed = parse_label::<T>(&response);
                if parsed.is_none() {
                    debug!(analysis, response = %response.trim(), "Unrecognized inference answer");
                }
                parsed
            }
            Err(e) => {
                warn!(analysis, "Inference call failed: {}", e);
                None
            }
        }
    }

    /// Entity extraction. `None` only when the call itself failed.
    async fn entities(&self, client: &dyn InferenceClient, prompt: String) -> Option<Vec<Entity>> {
        match client.run(&prompt, ENTITIES_MAX_TOKENS).await {
            Ok(response) => Some(parse_entities(&response)),
            Err(e) => {
                warn!(analysis = "entities", "Inference call failed: {}", e);
                None
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::classify::inference::InferenceError;
    use async_trait::async_trait;
    use pretty_assertions::assert_eq;
    use std::sync::atomic::{AtomicUsize, Ordering};
    use std::time::Duration;

    /// Answers by prompt kind; `None` means the call fails
    #[derive(Default)]
    struct StubClient {
        category: Option<&'static str>,
        sentiment: Option<&'static str>,
        urgency: Option<&'static str>,
        entities: Option<&'static str>,
        delay: Option<Duration>,
        calls: AtomicUsize,
        urgency_calls: AtomicUsize,
    }

    #[async_trait]
    impl InferenceClient for StubClient {
        async fn run(&self, prompt: &str, _max_tokens: u32) -> Result<String, InferenceError> {
            self.calls.fetch_add(1, Ordering::SeqCst);
            if let Some(delay) = self.delay {
                tokio::time::sleep(delay).await;
            }
            let answer = if prompt.contains("Categories:") {
                self.category
            } else if prompt.contains("Sentiments:") {
                self.sentiment
            } else if prompt.contains("Urgency levels:") {
                self.urgency_calls.fetch_add(1, Ordering::SeqCst);
                self.urgency
            } else {
                self.entities
            };
            answer
                .map(str::to_string)
                .ok_or_else(|| InferenceError::Request("unavailable".to_string()))
        }
    }

    #[tokio::test]
    async fn test_disabled_engine_falls_back() {
        let engine = ClassificationEngine::disabled();
        let result = engine.classify("URGENT: call me", "now").await;
        assert_eq!(result, ClassificationResult::fallback(true));

        let result = engine.classify("Lunch", "noon?").await;
        assert_eq!(result, ClassificationResult::fallback(false));
    }

    #[tokio::test]
    async fn test_all_answers_valid() {
        let stub = Arc::new(StubClient {
            category: Some("invoice"),
            sentiment: Some("Positive"),
            urgency: Some("critical"),
            entities: Some("amount: $500\ncompany: Acme"),
            ..StubClient::default()
        });
        let engine = ClassificationEngine::new(stub.clone());

        let result = engine.classify("Invoice due - urgent", "Please pay").await;
        assert_eq!(result.category, Category::Invoice);
        assert_eq!(result.sentiment, Sentiment::Positive);
        assert_eq!(result.urgency, Urgency::Critical);
        assert_eq!(
            result.entities,
            vec![Entity::new("amount", "$500"), Entity::new("company", "Acme")]
        );
        assert_eq!(result.source, ClassificationSource::Inference);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 4);
    }

    #[tokio::test]
    async fn test_no_urgency_keyword_skips_urgency_call() {
        let stub = Arc::new(StubClient {
            category: Some("meeting"),
            sentiment: Some("neutral"),
            urgency: Some("critical"),
            entities: Some(""),
            ..StubClient::default()
        });
        let engine = ClassificationEngine::new(stub.clone());

        let result = engine.classify("Team sync", "Tuesday at 10").await;
        assert_eq!(result.urgency, Urgency::Normal);
        assert_eq!(stub.urgency_calls.load(Ordering::SeqCst), 0);
        assert_eq!(stub.calls.load(Ordering::SeqCst), 3);
    }

    #[tokio::test]
    async fn test_invalid_answers_use_defaults() {
        let stub = Arc::new(StubClient {
            category: Some("banana"),
            sentiment: Some("ecstatic"),
            urgency: Some("whenever"),
            entities: None,
            ..StubClient::default()
        });
        let engine = ClassificationEngine::new(stub);

        let result = engine.classify("Deadline tomorrow", "").await;
        assert_eq!(result, ClassificationResult::fallback(true));
    }

    #[tokio::test]
    async fn test_partial_failure_keeps_other_answers() {
        let stub = Arc::new(StubClient {
            category: None,
            sentiment: Some("angry"),
            urgency: None,
            entities: Some("person: Jane"),
            ..StubClient::default()
        });
        let engine = ClassificationEngine::new(stub);

        let result = engine.classify("This is critical", "fix it").await;
        assert_eq!(result.category, Category::General);
        assert_eq!(result.sentiment, Sentiment::Angry);
        assert_eq!(result.urgency, Urgency::High);
        assert_eq!(result.entities, vec![Entity::new("person", "Jane")]);
        assert_eq!(result.source, ClassificationSource::Inference);
    }

    #[tokio::test]
    async fn test_total_failure_is_deterministic() {
        let engine = ClassificationEngine::new(Arc::new(StubClient::default()));
        let first = engine.classify("hello", "world").await;
        let second = engine.classify("hello", "world").await;
        assert_eq!(first, ClassificationResult::fallback(false));
        assert_eq!(first, second);
    }

    #[tokio::test(start_paused = true)]
    async fn test_analyses_run_concurrently() {
        let stub = Arc::new(StubClient {
            category: Some("support"),
            sentiment: Some("neutral"),
            urgency: Some("high"),
            entities: Some("ticket: 42"),
            delay: Some(Duration::from_secs(5)),
            ..StubClient::default()
        });
        let engine = ClassificationEngine::new(stub);

        let started = tokio::time::Instant::now();
        let result = engine.classify("urgent help", "ticket 42").await;
        assert_eq!(result.category, Category::Support);
        assert!(started.elapsed() < Duration::from_secs(10));
    }
}
