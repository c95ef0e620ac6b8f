//! Message source - where a message comes from and where its terminal action goes

use async_trait::async_trait;
use mailrouter_common::types::InboundMessage;
use std::sync::atomic::{AtomicBool, Ordering};
use thiserror::Error;

/// Extra headers prepended to a forwarded message
pub type ExtraHeaders = [(String, String)];

/// A message handed to the pipeline together with its terminal actions.
///
/// Not calling either action drops the message.
#[async_trait]
pub trait MessageSource: Send + Sync {
    fn message(&self) -> &InboundMessage;

    /// Deliver the message to `address`
    async fn forward(&self, address: &str, headers: &ExtraHeaders) -> anyhow::Result<()>;

    /// Refuse the message
    async fn reject(&self, reason: &str) -> anyhow::Result<()>;
}

#[derive(Debug, Error)]
pub enum TerminalError {
    #[error("a terminal action was already taken for this message")]
    AlreadyTaken,
    #[error(transparent)]
    Source(#[from] anyhow::Error),
}

/// Wraps a source so at most one terminal action succeeds
pub struct TerminalGuard<'a> {
    source: &'a dyn MessageSource,
    taken: AtomicBool,
}

impl<'a> TerminalGuard<'a> {
    pub fn new(source: &'a dyn MessageSource) -> Self {
        Self {
            source,
            taken: AtomicBool::new(false),
        }
    }

    pub fn message(&self) -> &InboundMessage {
        self.source.message()
    }

    /// Whether a terminal action already succeeded
    pub fn is_taken(&self) -> bool {
        self.taken.load(Ordering::SeqCst)
    }

    pub async fn forward(&self, address: &str, headers: &ExtraHeaders) -> Result<(), TerminalError> {
        if self.is_taken() {
            return Err(TerminalError::AlreadyTaken);
        }
        self.source.forward(address, headers).await?;
        self.taken.store(true, Ordering::SeqCst);
        Ok(())
    }

    pub async fn reject(&self, reason: &str) -> Result<(), TerminalError> {
        if self.is_taken() {
            return Err(TerminalError::AlreadyTaken);
        }
        self.source.reject(reason).await?;
        self.taken.store(true, Ordering::SeqCst);
        Ok(())
    }
}


#[cfg(test)]
mod tests {
    use super::testing::{RecordingSource, Terminal};
    use super::*;
    use pretty_assertions::assert_eq;

    fn source() -> RecordingSource {
        RecordingSource::new(InboundMessage::new("a@b.example", "c@d.example", "Hi", ""))
    }

    #[tokio::test]
    async fn test_second_terminal_action_refused() {
        let source = source();
        let guard = TerminalGuard::new(&source);

        guard.forward("x@d.example", &[]).await.unwrap();
        assert!(guard.is_taken());
        assert!(matches!(
            guard.reject("spam").await,
            Err(TerminalError::AlreadyTaken)
        ));
        assert!(matches!(
            guard.forward("y@d.example", &[]).await,
            Err(TerminalError::AlreadyTaken)
        ));

        assert_eq!(
            source.actions(),
            vec![Terminal::Forward {
                address: "x@d.example".to_string(),
                headers: Vec::new()
            }]
        );
    }

    #[tokio::test]
    async fn test_failed_forward_leaves_guard_open() {
        let source = source().failing_forwards(1);
        let guard = TerminalGuard::new(&source);

        assert!(guard.forward("x@d.example", &[]).await.is_err());
        assert!(!guard.is_taken());
        guard.reject("rate limit exceeded").await.unwrap();
        assert_eq!(
            source.actions(),
            vec![Terminal::Reject("rate limit exceeded".to_string())]
        );
    }
}
