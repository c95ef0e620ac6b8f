//! Rate Limiter - Per-sender sliding counter in the key-value store
//!
//! Each sender has one `RateRecord` holding a count and the start of its
//! window. Reads and writes are not atomic: two concurrent messages from the
//! same sender can both read the old count, so bursts may be under-counted.

use chrono::{DateTime, Utc};
use mailrouter_common::config::RateLimitConfig;
use mailrouter_storage::{KvResult, KvStore};
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use tracing::{debug, warn};

/// Reject reason returned to the sender
pub const RATE_LIMIT_REASON: &str = "rate limit exceeded";

/// Counter for one sender
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateRecord {
    pub sender: String,
    pub count: u32,
    pub window_start: DateTime<Utc>,
}

/// Rate limiter for inbound senders
#[derive(Clone)]
pub struct RateLimiter {
    store: Arc<dyn KvStore>,
    window_secs: u64,
    threshold: u32,
}

impl RateLimiter {
    /// Create a new rate limiter
    pub fn new(store: Arc<dyn KvStore>, config: &RateLimitConfig) -> Self {
        Self {
            store,
            window_secs: config.window_secs,
            threshold: config.threshold,
        }
    }

    /// Whether the sender is over the threshold in its current window
    pub async fn should_reject(&self, sender: &str) -> KvResult<bool> {
        self.should_reject_at(sender, Utc::now()).await
    }

    /// Count one send for the sender
    pub async fn record_send(&self, sender: &str) -> KvResult<()> {
        self.record_send_at(sender, Utc::now()).await
    }

    pub async fn should_reject_at(&self, sender: &str, now: DateTime<Utc>) -> KvResult<bool> {
        let record = match self.load(sender).await? {
            Some(record) => record,
            None => return Ok(false),
        };

        if !self.window_active(&record, now) {
            return Ok(false);
        }

        let reject = record.count > self.threshold;
        if reject {
            debug!(
                "Rate limit hit for {}: {} > {}",
                sender, record.count, self.threshold
            );
        }
        Ok(reject)
    }

    pub async fn record_send_at(&self, sender: &str, now: DateTime<Utc>) -> KvResult<()> {
        let record = match self.load(sender).await? {
            Some(mut record) if self.window_active(&record, now) => {
                record.count = record.count.saturating_add(1);
                record
            }
            _ => RateRecord {
                sender: sender.to_string(),
                count: 1,
                window_start: now,
            },
        };

        let bytes = match serde_json::to_vec(&record) {
            Ok(bytes) => bytes,
            Err(e) => {
                warn!("Failed to encode rate record for {}: {}", sender, e);
                return Ok(());
            }
        };

        self.store
            .put(&Self::key(sender), &bytes, self.window_secs)
            .await
    }

    fn window_active(&self, record: &RateRecord, now: DateTime<Utc>) -> bool {
        let elapsed_ms = now
            .signed_duration_since(record.window_start)
            .num_milliseconds();
        elapsed_ms <= (self.window_secs as i64).saturating_mul(1000)
    }

    async fn load(&self, sender: &str) -> KvResult<Option<RateRecord>> {
        let bytes = match self.store.get(&Self::key(sender)).await? {
            Some(bytes) => bytes,
            None => return Ok(None),
        };

        match serde_json::from_slice(&bytes) {
            Ok(record) => Ok(Some(record)),
            Err(e) => {
                // Treat an unreadable record as absent; the next send overwrites it
                warn!("Discarding unreadable rate record for {}: {}", sender, e);
                Ok(None)
            }
        }
    }

    fn key(sender: &str) -> String {
        format!("ratelimit:{}", sender.trim().to_lowercase())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Duration;
    use mailrouter_storage::MemoryKvStore;
    use pretty_assertions::assert_eq;

    fn limiter(store: Arc<MemoryKvStore>) -> RateLimiter {
        RateLimiter::new(store, &RateLimitConfig::default())
    }

    /// Record-then-check, the order the pipeline uses
    async fn admit(limiter: &RateLimiter, sender: &str, now: DateTime<Utc>) -> bool {
        limiter.record_send_at(sender, now).await.unwrap();
        !limiter.should_reject_at(sender, now).await.unwrap()
    }

    #[tokio::test]
    async fn test_unknown_sender_not_rejected() {
        let limiter = limiter(Arc::new(MemoryKvStore::new()));
        assert!(!limiter.should_reject("new@example.com").await.unwrap());
    }

    #[tokio::test]
    async fn test_fiftieth_passes_fifty_first_rejected() {
        let limiter = limiter(Arc::new(MemoryKvStore::new()));
        let now = Utc::now();

        for i in 1..=50 {
            assert!(admit(&limiter, "bulk@example.com", now).await, "send {} rejected", i);
        }
        assert!(!admit(&limiter, "bulk@example.com", now).await);
    }

    #[tokio::test]
    async fn test_sixty_messages_in_ten_minutes() {
        let limiter = limiter(Arc::new(MemoryKvStore::new()));
        let start = Utc::now();

        let mut rejected = Vec::new();
        for i in 1..=60i64 {
            let at = start + Duration::seconds(i * 10);
            if !admit(&limiter, "burst@example.com", at).await {
                rejected.push(i);
            }
        }

        assert_eq!(rejected, (51..=60).collect::<Vec<_>>());
    }

    #[tokio::test]
    async fn test_window_expiry_resets_count() {
        let store = Arc::new(MemoryKvStore::new());
        let limiter = limiter(store.clone());
        let start = Utc::now();

        for _ in 0..55 {
            limiter.record_send_at("a@example.com", start).await.unwrap();
        }
        assert!(limiter.should_reject_at("a@example.com", start).await.unwrap());

        let later = start + Duration::seconds(3601);
        assert!(!limiter.should_reject_at("a@example.com", later).await.unwrap());

        limiter.record_send_at("a@example.com", later).await.unwrap();
        let bytes = store.get("ratelimit:a@example.com").await.unwrap().unwrap();
        let record: RateRecord = serde_json::from_slice(&bytes).unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.window_start, later);
    }

    #[tokio::test]
    async fn test_window_boundary_is_inclusive() {
        let limiter = limiter(Arc::new(MemoryKvStore::new()));
        let start = Utc::now();

        for _ in 0..51 {
            limiter.record_send_at("edge@example.com", start).await.unwrap();
        }

        let boundary = start + Duration::seconds(3600);
        assert!(limiter.should_reject_at("edge@example.com", boundary).await.unwrap());
    }

    #[tokio::test]
    async fn test_senders_are_independent_and_case_insensitive() {
        let limiter = limiter(Arc::new(MemoryKvStore::new()));
        let now = Utc::now();

        for _ in 0..51 {
            limiter.record_send_at("Loud@Example.com", now).await.unwrap();
        }

        assert!(limiter.should_reject_at("loud@example.com", now).await.unwrap());
        assert!(!limiter.should_reject_at("quiet@example.com", now).await.unwrap());
    }

    #[tokio::test]
    async fn test_corrupt_record_treated_as_absent() {
        let store = Arc::new(MemoryKvStore::new());
        store.put("ratelimit:x@example.com", b"not json", 60).await.unwrap();
        let limiter = limiter(store);

        assert!(!limiter.should_reject("x@example.com").await.unwrap());
        limiter.record_send("x@example.com").await.unwrap();
        assert!(!limiter.should_reject("x@example.com").await.unwrap());
    }
}
