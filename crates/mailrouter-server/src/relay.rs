//! Outbound SMTP relay used for the forward terminal action

use anyhow::{Context, Result};
use async_trait::async_trait;
use lettre::{
    address::Envelope, transport::smtp::authentication::Credentials, Address,
    AsyncSmtpTransport, AsyncTransport, Tokio1Executor,
};
use mailrouter_common::config::RelayConfig;
use std::time::Duration;
use tracing::debug;

/// Something that can deliver a raw message to one recipient
#[async_trait]
pub trait Relay: Send + Sync {
    async fn relay(&self, sender: &str, recipient: &str, raw: &[u8]) -> Result<()>;
}

/// Relay through an upstream SMTP server
pub struct SmtpRelay {
    mailer: AsyncSmtpTransport<Tokio1Executor>,
    envelope_from: Option<String>,
}

impl SmtpRelay {
    /// Build the transport from configuration
    pub fn new(config: &RelayConfig) -> Result<Self> {
        let builder = if config.use_tls {
            AsyncSmtpTransport::<Tokio1Executor>::relay(&config.host)
                .context("Failed to create SMTP transport")?
        } else if config.use_starttls {
            AsyncSmtpTransport::<Tokio1Executor>::starttls_relay(&config.host)
                .context("Failed to create SMTP transport")?
        } else {
            AsyncSmtpTransport::<Tokio1Executor>::builder_dangerous(&config.host)
        };
        let mut transport = builder.port(config.port);

        if let (Some(username), Some(password)) = (&config.username, &config.password) {
            transport = transport.credentials(Credentials::new(username.clone(), password.clone()));
        }

        let mailer = transport
            .timeout(Some(Duration::from_secs(config.timeout_secs)))
            .build();

        Ok(Self {
            mailer,
            envelope_from: config.envelope_from.clone(),
        })
    }
}

#[async_trait]
impl Relay for SmtpRelay {
    async fn relay(&self, sender: &str, recipient: &str, raw: &[u8]) -> Result<()> {
        let from = self.envelope_from.as_deref().unwrap_or(sender);
        // Null reverse-path for bounces or unparseable senders
        let from: Option<Address> = from.trim_matches(|c: char| c == '<' || c == '>').parse().ok();
        let to: Address = recipient
            .parse()
            .with_context(|| format!("Invalid forward address: {}", recipient))?;

        let envelope = Envelope::new(from, vec![to]).context("Invalid envelope")?;
        let response = self
            .mailer
            .send_raw(&envelope, raw)
            .await
            .with_context(|| format!("Relay to {} failed", recipient))?;

        debug!("Relayed message to {}: {:?}", recipient, response.code());
        Ok(())
    }
}

/// Prepend header lines to a raw message
pub fn prepend_headers(headers: &[(String, String)], raw: &[u8]) -> Vec<u8> {
    let mut out = Vec::with_capacity(raw.len() + headers.len() * 48);
    for (name, value) in headers {
        // Header values must stay on one line
        let value: String = value.chars().filter(|c| *c != '\r' && *c != '\n').collect();
        out.extend_from_slice(name.as_bytes());
        out.extend_from_slice(b": ");
        out.extend_from_slice(value.as_bytes());
        out.extend_from_slice(b"\r\n");
    }
    out.extend_from_slice(raw);
    out
}
